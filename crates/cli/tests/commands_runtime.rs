use std::env;
use std::sync::{Mutex, OnceLock};

use haulr_cli::commands::{config, doctor, migrate, sweep};
use serde_json::Value;

#[test]
fn migrate_applies_embedded_migrations_with_valid_env() {
    with_env(&[("HAULR_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        let applied = payload["details"]["applied_versions"].as_array().expect("applied versions");
        assert_eq!(applied.len(), 2);
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_policy() {
    with_env(
        &[("HAULR_DATABASE_URL", "sqlite::memory:"), ("HAULR_POLICY_QUOTE_TTL_MINUTES", "0")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn sweep_reports_an_empty_pass_on_a_fresh_database() {
    with_env(&[("HAULR_DATABASE_URL", "sqlite::memory:")], || {
        let result = sweep::run(Some(25));
        assert_eq!(result.exit_code, 0, "expected successful sweep: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "sweep");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["details"]["quotesExpired"], 0);
        assert_eq!(payload["details"]["requestsUnmatched"], 0);
        assert_eq!(payload["details"]["requestsExpired"], 0);
        assert_eq!(payload["details"]["failed"], 0);
    });
}

#[test]
fn sweep_rejects_a_zero_batch_size() {
    with_env(&[("HAULR_DATABASE_URL", "sqlite::memory:")], || {
        let result = sweep::run(Some(0));
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_flags_unapplied_migrations_on_a_fresh_database() {
    with_env(&[("HAULR_DATABASE_URL", "sqlite::memory:")], || {
        let (passed, output) = doctor::run(true);
        assert!(!passed);

        let payload = parse_payload(&output);
        assert_eq!(payload["overall_status"], "fail");
        let checks = payload["checks"].as_array().expect("checks");
        let status_of = |name: &str| {
            checks
                .iter()
                .find(|check| check["name"] == name)
                .map(|check| check["status"].clone())
                .unwrap_or(Value::Null)
        };
        assert_eq!(status_of("config_validation"), "pass");
        assert_eq!(status_of("database_connectivity"), "pass");
        assert_eq!(status_of("migration_state"), "fail");
    });
}

#[test]
fn doctor_skips_database_checks_when_config_is_invalid() {
    with_env(&[("HAULR_SERVER_PORT", "not-a-port")], || {
        let (passed, output) = doctor::run(false);
        assert!(!passed);
        assert!(output.starts_with("doctor: one or more readiness checks failed"));
        assert!(output.contains("- [fail] config_validation"));
        assert!(output.contains("- [skip] database_connectivity"));
        assert!(output.contains("- [skip] migration_state"));
    });
}

#[test]
fn config_attributes_values_to_their_source() {
    with_env(
        &[("HAULR_DATABASE_URL", "sqlite::memory:"), ("HAULR_POLICY_FREE_WINDOW_MINUTES", "15")],
        || {
            let output = config::run();
            assert!(output.contains(
                "- policy.free_window_minutes = 15 (source: env (HAULR_POLICY_FREE_WINDOW_MINUTES))"
            ));
            assert!(output.contains("- policy.quote_ttl_minutes = 60 (source: default)"));
            assert!(output.contains("- logging.format = compact"));
        },
    );
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "HAULR_DATABASE_URL",
        "HAULR_DATABASE_MAX_CONNECTIONS",
        "HAULR_DATABASE_TIMEOUT_SECS",
        "HAULR_SERVER_BIND_ADDRESS",
        "HAULR_SERVER_PORT",
        "HAULR_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "HAULR_POLICY_FREE_WINDOW_MINUTES",
        "HAULR_POLICY_QUOTE_TTL_MINUTES",
        "HAULR_POLICY_MATCHING_WINDOW_MINUTES",
        "HAULR_POLICY_REQUEST_TTL_HOURS",
        "HAULR_POLICY_EDIT_FEE_BASE_CENTS",
        "HAULR_ENGINE_MAX_CONFLICT_RETRIES",
        "HAULR_SWEEPER_ENABLED",
        "HAULR_SWEEPER_INTERVAL_SECS",
        "HAULR_SWEEPER_BATCH_SIZE",
        "HAULR_LOGGING_LEVEL",
        "HAULR_LOGGING_FORMAT",
        "HAULR_LOG_LEVEL",
        "HAULR_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
