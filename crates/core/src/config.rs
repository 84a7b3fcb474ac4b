use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::{CancellationTier, LifecyclePolicy};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub policy: LifecyclePolicy,
    pub engine: EngineConfig,
    pub sweeper: SweeperConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_conflict_retries: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub batch_size: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub free_window_minutes: Option<u32>,
    pub quote_ttl_minutes: Option<u32>,
    pub sweeper_enabled: Option<bool>,
    pub sweeper_interval_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://haulr.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            policy: LifecyclePolicy::default(),
            engine: EngineConfig::default(),
            sweeper: SweeperConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_conflict_retries: 3 }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { enabled: true, interval_secs: 60, batch_size: 200 }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("haulr.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(policy) = patch.policy {
            if let Some(value) = policy.free_window_minutes {
                self.policy.free_window_minutes = value;
            }
            if let Some(value) = policy.quote_ttl_minutes {
                self.policy.quote_ttl_minutes = value;
            }
            if let Some(value) = policy.matching_window_minutes {
                self.policy.matching_window_minutes = value;
            }
            if let Some(value) = policy.request_ttl_hours {
                self.policy.request_ttl_hours = value;
            }
            if let Some(value) = policy.edit_fee_base_cents {
                self.policy.edit_fee_base_cents = value;
            }
            if let Some(tiers) = policy.cancellation_tiers {
                self.policy.cancellation_tiers = tiers;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(max_conflict_retries) = engine.max_conflict_retries {
                self.engine.max_conflict_retries = max_conflict_retries;
            }
        }

        if let Some(sweeper) = patch.sweeper {
            if let Some(enabled) = sweeper.enabled {
                self.sweeper.enabled = enabled;
            }
            if let Some(interval_secs) = sweeper.interval_secs {
                self.sweeper.interval_secs = interval_secs;
            }
            if let Some(batch_size) = sweeper.batch_size {
                self.sweeper.batch_size = batch_size;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("HAULR_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("HAULR_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("HAULR_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("HAULR_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("HAULR_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("HAULR_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("HAULR_SERVER_PORT") {
            self.server.port = parse_u16("HAULR_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("HAULR_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("HAULR_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("HAULR_POLICY_FREE_WINDOW_MINUTES") {
            self.policy.free_window_minutes = parse_u32("HAULR_POLICY_FREE_WINDOW_MINUTES", &value)?;
        }
        if let Some(value) = read_env("HAULR_POLICY_QUOTE_TTL_MINUTES") {
            self.policy.quote_ttl_minutes = parse_u32("HAULR_POLICY_QUOTE_TTL_MINUTES", &value)?;
        }
        if let Some(value) = read_env("HAULR_POLICY_MATCHING_WINDOW_MINUTES") {
            self.policy.matching_window_minutes =
                parse_u32("HAULR_POLICY_MATCHING_WINDOW_MINUTES", &value)?;
        }
        if let Some(value) = read_env("HAULR_POLICY_REQUEST_TTL_HOURS") {
            self.policy.request_ttl_hours = parse_u32("HAULR_POLICY_REQUEST_TTL_HOURS", &value)?;
        }
        if let Some(value) = read_env("HAULR_POLICY_EDIT_FEE_BASE_CENTS") {
            self.policy.edit_fee_base_cents =
                parse_i64("HAULR_POLICY_EDIT_FEE_BASE_CENTS", &value)?;
        }

        if let Some(value) = read_env("HAULR_ENGINE_MAX_CONFLICT_RETRIES") {
            self.engine.max_conflict_retries =
                parse_u32("HAULR_ENGINE_MAX_CONFLICT_RETRIES", &value)?;
        }

        if let Some(value) = read_env("HAULR_SWEEPER_ENABLED") {
            self.sweeper.enabled = parse_bool("HAULR_SWEEPER_ENABLED", &value)?;
        }
        if let Some(value) = read_env("HAULR_SWEEPER_INTERVAL_SECS") {
            self.sweeper.interval_secs = parse_u64("HAULR_SWEEPER_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("HAULR_SWEEPER_BATCH_SIZE") {
            self.sweeper.batch_size = parse_u32("HAULR_SWEEPER_BATCH_SIZE", &value)?;
        }

        let log_level = read_env("HAULR_LOGGING_LEVEL").or_else(|| read_env("HAULR_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("HAULR_LOGGING_FORMAT").or_else(|| read_env("HAULR_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(free_window_minutes) = overrides.free_window_minutes {
            self.policy.free_window_minutes = free_window_minutes;
        }
        if let Some(quote_ttl_minutes) = overrides.quote_ttl_minutes {
            self.policy.quote_ttl_minutes = quote_ttl_minutes;
        }
        if let Some(enabled) = overrides.sweeper_enabled {
            self.sweeper.enabled = enabled;
        }
        if let Some(interval_secs) = overrides.sweeper_interval_secs {
            self.sweeper.interval_secs = interval_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_policy(&self.policy)?;
        validate_engine(&self.engine)?;
        validate_sweeper(&self.sweeper)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("haulr.toml"), PathBuf::from("config/haulr.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_policy(policy: &LifecyclePolicy) -> Result<(), ConfigError> {
    if policy.quote_ttl_minutes == 0 {
        return Err(ConfigError::Validation(
            "policy.quote_ttl_minutes must be greater than zero".to_string(),
        ));
    }
    if policy.matching_window_minutes == 0 {
        return Err(ConfigError::Validation(
            "policy.matching_window_minutes must be greater than zero".to_string(),
        ));
    }
    if policy.request_ttl_hours == 0 {
        return Err(ConfigError::Validation(
            "policy.request_ttl_hours must be greater than zero".to_string(),
        ));
    }
    if i64::from(policy.request_ttl_hours) * 60 < i64::from(policy.matching_window_minutes) {
        return Err(ConfigError::Validation(
            "policy.request_ttl_hours must not be shorter than policy.matching_window_minutes"
                .to_string(),
        ));
    }
    if policy.edit_fee_base_cents < 0 {
        return Err(ConfigError::Validation(
            "policy.edit_fee_base_cents must not be negative".to_string(),
        ));
    }
    policy.validate_tiers().map_err(ConfigError::Validation)
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.max_conflict_retries > 20 {
        return Err(ConfigError::Validation(
            "engine.max_conflict_retries must be in range 0..=20".to_string(),
        ));
    }
    Ok(())
}

fn validate_sweeper(sweeper: &SweeperConfig) -> Result<(), ConfigError> {
    if sweeper.interval_secs == 0 {
        return Err(ConfigError::Validation(
            "sweeper.interval_secs must be greater than zero".to_string(),
        ));
    }
    if sweeper.batch_size == 0 {
        return Err(ConfigError::Validation(
            "sweeper.batch_size must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    policy: Option<PolicyPatch>,
    engine: Option<EnginePatch>,
    sweeper: Option<SweeperPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyPatch {
    free_window_minutes: Option<u32>,
    quote_ttl_minutes: Option<u32>,
    matching_window_minutes: Option<u32>,
    request_ttl_hours: Option<u32>,
    edit_fee_base_cents: Option<i64>,
    cancellation_tiers: Option<Vec<CancellationTier>>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    max_conflict_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SweeperPatch {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    batch_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;
        ensure(config.policy.free_window_minutes == 10, "default free window is 10 minutes")?;
        ensure(config.sweeper.interval_secs == 60, "default sweep interval is 60 seconds")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation_and_fee_tiers() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_HAULR_DB_URL", "sqlite://from-interpolation.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("haulr.toml");
            fs::write(
                &path,
                r#"
[database]
url = "${TEST_HAULR_DB_URL}"

[policy]
free_window_minutes = 5

[[policy.cancellation_tiers]]
up_to_minutes = 30
unassigned_cents = 300
assigned_cents = 900

[[policy.cancellation_tiers]]
unassigned_cents = 800
assigned_cents = 2000
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-interpolation.db",
                "database url should be interpolated from the environment",
            )?;
            ensure(config.policy.free_window_minutes == 5, "free window should come from file")?;
            ensure(config.policy.cancellation_tiers.len() == 2, "tiers should come from file")?;
            ensure(
                config.policy.cancellation_tiers[1].up_to_minutes.is_none(),
                "last tier should be open-ended",
            )
        })();

        clear_vars(&["TEST_HAULR_DB_URL"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAULR_LOG_LEVEL", "warn");
        env::set_var("HAULR_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["HAULR_LOG_LEVEL", "HAULR_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAULR_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("HAULR_POLICY_QUOTE_TTL_MINUTES", "45");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("haulr.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[policy]
quote_ttl_minutes = 20
free_window_minutes = 15

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.policy.quote_ttl_minutes == 45, "env quote ttl should win over file")?;
            ensure(config.policy.free_window_minutes == 15, "file value should win over default")
        })();

        clear_vars(&["HAULR_DATABASE_URL", "HAULR_POLICY_QUOTE_TTL_MINUTES"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAULR_SWEEPER_INTERVAL_SECS", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("sweeper.interval_secs")
            );
            ensure(has_message, "validation failure should mention sweeper.interval_secs")
        })();

        clear_vars(&["HAULR_SWEEPER_INTERVAL_SECS"]);
        result
    }

    #[test]
    fn malformed_env_override_is_reported_with_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAULR_SERVER_PORT", "not-a-port");

        let result = (|| -> Result<(), String> {
            match AppConfig::load(LoadOptions::default()) {
                Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                    ensure(key == "HAULR_SERVER_PORT", "error should name the env var")
                }
                Err(other) => Err(format!("unexpected error: {other}")),
                Ok(_) => Err("expected malformed port to fail".to_string()),
            }
        })();

        clear_vars(&["HAULR_SERVER_PORT"]);
        result
    }

    #[test]
    fn required_file_must_exist() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist/haulr.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        });
        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }
}
