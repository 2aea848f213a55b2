//! Application configuration
//!
//! Settings come from an optional TOML file (`config/config.toml` unless a
//! path is given) overlaid with `HARBORMASTER__*` environment variables,
//! e.g. `HARBORMASTER__DATABASE__DSN`.

use crate::migration::ManagerConfig;
use crate::notifier::NotifierConfig;
use crate::validate::ValidateOptions;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
const ENV_PREFIX: &str = "HARBORMASTER";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// `production` turns strict hash checking on unless overridden
    #[serde(default = "default_env")]
    pub env: String,
    /// Default actor recorded in history
    #[serde(default)]
    pub user: String,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub dsn: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            dsn: String::new(),
        }
    }
}

/// Where log lines go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSink {
    /// Human-readable lines on stdout
    #[default]
    Stdout,
    /// JSON lines on stdout
    Json,
    /// JSON lines on stdout and appended to `logging.file`
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub sink: LogSink,
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            sink: LogSink::default(),
            file: default_log_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Unset means "on in production"
    #[serde(default)]
    pub strict_hash: Option<bool>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            strict_hash: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Write the Prometheus text exposition here after each command
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

fn default_env() -> String {
    "development".to_string()
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_retries() -> u32 {
    3
}

fn default_driver() -> String {
    "postgres".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("harbormaster.log")
}

fn default_timeout_ms() -> u64 {
    4000
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true)
}

impl AppConfig {
    /// Load from `path` (or the default location) and the environment
    ///
    /// An explicitly named file must exist. The default file is optional; if
    /// it exists but cannot be parsed a warning is printed and only the
    /// environment is used.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            let builder = Config::builder()
                .add_source(File::from(path).required(true))
                .add_source(env_source());
            return Self::from_builder(builder);
        }

        let builder = Config::builder()
            .add_source(File::with_name(DEFAULT_CONFIG_PATH).required(false))
            .add_source(env_source());

        match builder.build() {
            Ok(settings) => Self::from_settings(settings),
            Err(err) => {
                // Logging isn't configured yet at this point
                if Path::new(DEFAULT_CONFIG_PATH).exists() {
                    eprintln!(
                        "Warning: failed to load config file, falling back to env. Error: {}",
                        err
                    );
                }
                let settings = Config::builder().add_source(env_source()).build().map_err(|env_err| {
                    ConfigError::Message(format!(
                        "Failed to load configuration from file and env: {}, then env-only error: {}",
                        err, env_err
                    ))
                })?;
                Self::from_settings(settings)
            }
        }
    }

    fn from_builder(builder: ConfigBuilder<config::builder::DefaultState>) -> Result<Self, ConfigError> {
        Self::from_settings(builder.build()?)
    }

    fn from_settings(settings: Config) -> Result<Self, ConfigError> {
        let cfg: AppConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings no command can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.dsn.trim().is_empty() {
            return Err(ConfigError::Message(
                "database.dsn is required (set it in the config file or HARBORMASTER__DATABASE__DSN)".to_string(),
            ));
        }
        if self.database.driver.trim().is_empty() {
            return Err(ConfigError::Message("database.driver cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn strict_hash(&self) -> bool {
        self.validation
            .strict_hash
            .unwrap_or_else(|| self.env.eq_ignore_ascii_case("production"))
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation.timeout_ms)
    }

    /// Manager settings for `actor`, with validation routed through `validate`
    pub fn manager_config(&self, actor: &str, validate: ValidateOptions) -> ManagerConfig {
        let mut config = ManagerConfig::new(self.database.driver.clone(), self.database.dsn.clone());
        config.migrations_dir = self.migrations_dir.clone();
        config.retries = self.retries;
        config.actor = actor.to_string();
        config.strict_hash = self.strict_hash();
        config.validate = validate.timeout(self.validation_timeout());
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(toml: &str) -> Result<AppConfig, ConfigError> {
        AppConfig::from_builder(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let cfg = parse("[database]\ndsn = \"app.db\"\n").unwrap();
        assert_eq!(cfg.env, "development");
        assert_eq!(cfg.database.driver, "postgres");
        assert_eq!(cfg.migrations_dir, PathBuf::from("migrations"));
        assert_eq!(cfg.retries, 3);
        assert_eq!(cfg.logging.sink, LogSink::Stdout);
        assert_eq!(cfg.validation_timeout(), Duration::from_secs(4));
        assert!(!cfg.notifier.enabled);
        assert!(!cfg.strict_hash());
    }

    #[test]
    fn test_missing_dsn_is_rejected() {
        let err = parse("env = \"staging\"\n").unwrap_err();
        assert!(err.to_string().contains("database.dsn is required"));
    }

    #[test]
    fn test_strict_hash_follows_env_unless_set() {
        let cfg = parse("env = \"production\"\n[database]\ndsn = \"x\"\n").unwrap();
        assert!(cfg.strict_hash());

        let cfg = parse("env = \"production\"\n[database]\ndsn = \"x\"\n[validation]\nstrict_hash = false\n").unwrap();
        assert!(!cfg.strict_hash());
    }

    #[test]
    fn test_full_file() {
        let cfg = parse(
            r#"
            env = "production"
            user = "deploy-bot"
            migrations_dir = "db/migrations"
            retries = 1

            [database]
            driver = "sqlite"
            dsn = "sqlite://app.db"

            [logging]
            level = "debug"
            sink = "file"
            file = "/tmp/hm.log"

            [notifier]
            enabled = true
            kind = "webhook"

            [notifier.webhook]
            url = "https://hooks.example.com/migrate"
            headers = { Authorization = "Bearer t" }

            [metrics]
            textfile = "/tmp/hm.prom"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.logging.sink, LogSink::File);
        assert!(cfg.notifier.webhook.headers.values().any(|v| v == "Bearer t"));
        let manager = cfg.manager_config("alice", ValidateOptions::default());
        assert_eq!(manager.driver, "sqlite");
        assert_eq!(manager.retries, 1);
        assert!(manager.strict_hash);
        assert_eq!(manager.actor, "alice");
    }
}
