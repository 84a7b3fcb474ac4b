use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use haulr_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value) in effective_values(&config) {
        let source = field_source(
            key_path,
            &env_key(key_path),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    let policy = &config.policy;
    vec![
        ("database.url", redact_url(&config.database.url)),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("policy.free_window_minutes", policy.free_window_minutes.to_string()),
        ("policy.quote_ttl_minutes", policy.quote_ttl_minutes.to_string()),
        ("policy.matching_window_minutes", policy.matching_window_minutes.to_string()),
        ("policy.request_ttl_hours", policy.request_ttl_hours.to_string()),
        ("policy.edit_fee_base_cents", policy.edit_fee_base_cents.to_string()),
        ("policy.cancellation_tiers", format!("{} tier(s)", policy.cancellation_tiers.len())),
        ("engine.max_conflict_retries", config.engine.max_conflict_retries.to_string()),
        ("sweeper.enabled", config.sweeper.enabled.to_string()),
        ("sweeper.interval_secs", config.sweeper.interval_secs.to_string()),
        ("sweeper.batch_size", config.sweeper.batch_size.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format).to_lowercase()),
    ]
}

/// `policy.quote_ttl_minutes` -> `HAULR_POLICY_QUOTE_TTL_MINUTES`.
fn env_key(key_path: &str) -> String {
    format!("HAULR_{}", key_path.replace('.', "_").to_uppercase())
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("haulr.toml"), PathBuf::from("config/haulr.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Hides a `user:password@` segment if the URL carries one.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((_, host)) => format!("{scheme}://***@{host}"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, env_key, redact_url};

    #[test]
    fn env_keys_follow_the_section_prefix_convention() {
        assert_eq!(env_key("database.url"), "HAULR_DATABASE_URL");
        assert_eq!(env_key("policy.free_window_minutes"), "HAULR_POLICY_FREE_WINDOW_MINUTES");
    }

    #[test]
    fn credentials_are_redacted_but_plain_urls_pass_through() {
        assert_eq!(redact_url("sqlite://haulr.db?mode=rwc"), "sqlite://haulr.db?mode=rwc");
        assert_eq!(redact_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(redact_url("postgres://ops:hunter2@db:5432/haulr"), "postgres://***@db:5432/haulr");
    }

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: Value = "[policy]\nquote_ttl_minutes = 45\n".parse().expect("toml");
        assert!(contains_path(&doc, "policy.quote_ttl_minutes"));
        assert!(!contains_path(&doc, "policy.free_window_minutes"));
        assert!(!contains_path(&doc, "sweeper.enabled"));
    }
}
