//! Runtime configuration for the provider and logging.
//!
//! # Responsibility
//! - Define configuration shapes with defaults for every field.
//! - Load them from JSON documents or `STOREGATE_*` environment variables.
//! - Reject invalid settings before any connection is opened.
//!
//! # Invariants
//! - In-memory databases always run with exactly one pooled connection.
//! - Log directories are absolute paths.

use crate::logging::default_log_level;
use crate::provider::IsolationLevel;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB_PATH: &str = "STOREGATE_DB_PATH";
pub const ENV_POOL_SIZE: &str = "STOREGATE_POOL_SIZE";
pub const ENV_ISOLATION: &str = "STOREGATE_ISOLATION";
pub const ENV_BUSY_TIMEOUT_MS: &str = "STOREGATE_BUSY_TIMEOUT_MS";
pub const ENV_CONNECTION_TIMEOUT_MS: &str = "STOREGATE_CONNECTION_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "STOREGATE_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "STOREGATE_LOG_DIR";

const DEFAULT_POOL_SIZE: u32 = 4;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
    Json(serde_json::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid value `{value}` for {key}: {reason}")
            }
            Self::Json(err) => write!(f, "invalid configuration document: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Connection pool and transaction settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Database file; `None` opens a private in-memory database.
    pub db_path: Option<PathBuf>,
    pub pool_size: u32,
    pub isolation: IsolationLevel,
    pub busy_timeout_ms: u64,
    pub connection_timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            pool_size: DEFAULT_POOL_SIZE,
            isolation: IsolationLevel::default(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
        }
    }
}

impl ProviderConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Pool size actually used; in-memory databases are per connection.
    pub fn effective_pool_size(&self) -> u32 {
        if self.db_path.is_some() {
            self.pool_size
        } else {
            1
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: ENV_POOL_SIZE,
                value: self.pool_size.to_string(),
                reason: "pool size must be positive",
            });
        }
        if self.connection_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: ENV_CONNECTION_TIMEOUT_MS,
                value: self.connection_timeout_ms.to_string(),
                reason: "connection timeout must be positive",
            });
        }
        if let Some(path) = &self.db_path {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: ENV_DB_PATH,
                    value: String::new(),
                    reason: "database path cannot be empty",
                });
            }
        }
        Ok(())
    }
}

/// Logging backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Rolling log directory; `None` logs to stderr.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(dir) = &self.log_dir {
            if !dir.is_absolute() {
                return Err(ConfigError::InvalidValue {
                    key: ENV_LOG_DIR,
                    value: dir.display().to_string(),
                    reason: "log directory must be an absolute path",
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoregateConfig {
    pub provider: ProviderConfig,
    pub logging: LoggingConfig,
}

impl StoregateConfig {
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from a key lookup; unset keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = non_empty(lookup(ENV_DB_PATH)) {
            config.provider.db_path = Some(PathBuf::from(path));
        }
        if let Some(value) = non_empty(lookup(ENV_POOL_SIZE)) {
            config.provider.pool_size = parse_number(ENV_POOL_SIZE, &value)?;
        }
        if let Some(value) = non_empty(lookup(ENV_ISOLATION)) {
            config.provider.isolation =
                IsolationLevel::parse(&value).ok_or(ConfigError::InvalidValue {
                    key: ENV_ISOLATION,
                    value,
                    reason: "expected repeatable_read|serializable|exclusive",
                })?;
        }
        if let Some(value) = non_empty(lookup(ENV_BUSY_TIMEOUT_MS)) {
            config.provider.busy_timeout_ms = parse_number(ENV_BUSY_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = non_empty(lookup(ENV_CONNECTION_TIMEOUT_MS)) {
            config.provider.connection_timeout_ms =
                parse_number(ENV_CONNECTION_TIMEOUT_MS, &value)?;
        }
        if let Some(level) = non_empty(lookup(ENV_LOG_LEVEL)) {
            config.logging.level = level;
        }
        if let Some(dir) = non_empty(lookup(ENV_LOG_DIR)) {
            config.logging.log_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.provider.validate()?;
        self.logging.validate()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: "expected a non-negative integer",
    })
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, StoregateConfig, ENV_DB_PATH, ENV_ISOLATION, ENV_POOL_SIZE};
    use crate::provider::IsolationLevel;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_describe_single_connection_memory_database() {
        let config = StoregateConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.provider.db_path.is_none());
        assert_eq!(config.provider.effective_pool_size(), 1);
        assert_eq!(config.provider.isolation, IsolationLevel::RepeatableRead);
        assert!(config.logging.log_dir.is_none());
    }

    #[test]
    fn environment_overrides_are_applied() {
        let config = StoregateConfig::from_lookup(lookup(&[
            (ENV_DB_PATH, "/tmp/storegate.db"),
            (ENV_POOL_SIZE, "8"),
            (ENV_ISOLATION, "serializable"),
        ]))
        .unwrap();
        assert_eq!(
            config.provider.db_path,
            Some(PathBuf::from("/tmp/storegate.db"))
        );
        assert_eq!(config.provider.effective_pool_size(), 8);
        assert_eq!(config.provider.isolation, IsolationLevel::Serializable);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_pool = StoregateConfig::from_lookup(lookup(&[(ENV_POOL_SIZE, "0")]));
        assert!(matches!(
            zero_pool,
            Err(ConfigError::InvalidValue {
                key: ENV_POOL_SIZE,
                ..
            })
        ));

        let bad_isolation = StoregateConfig::from_lookup(lookup(&[(ENV_ISOLATION, "dirty")]));
        assert!(matches!(
            bad_isolation,
            Err(ConfigError::InvalidValue {
                key: ENV_ISOLATION,
                ..
            })
        ));
    }

    #[test]
    fn json_documents_fill_missing_fields_with_defaults() {
        let config = StoregateConfig::from_json_str(
            r#"{"provider": {"db_path": "/var/lib/app.db", "isolation": "exclusive"}}"#,
        )
        .unwrap();
        assert_eq!(config.provider.isolation, IsolationLevel::Exclusive);
        assert_eq!(config.provider.pool_size, 4);

        let relative_logs =
            StoregateConfig::from_json_str(r#"{"logging": {"log_dir": "logs/dev"}}"#);
        assert!(relative_logs.is_err());
    }
}
