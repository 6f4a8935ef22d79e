//! Runtime configuration for opening a ledger.
//!
//! # Responsibility
//! - Resolve database path, busy timeout and logging settings from defaults
//!   and `MONEYNOTES_*` environment variables.
//!
//! # Invariants
//! - Unset or empty variables fall back to defaults.
//! - Malformed values are reported, never silently replaced.

use crate::db::DEFAULT_BUSY_TIMEOUT;
use crate::logging::{default_log_level, normalize_level};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB_PATH: &str = "MONEYNOTES_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "MONEYNOTES_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "MONEYNOTES_LOG_DIR";
pub const ENV_BUSY_TIMEOUT_MS: &str = "MONEYNOTES_BUSY_TIMEOUT_MS";

const DEFAULT_DB_FILE_NAME: &str = "moneynotes.sqlite3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid value `{value}` for {key}: {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

/// Settings used by [`crate::service::ledger_service::MoneyNotes::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub db_path: PathBuf,
    pub log_level: String,
    /// `None` leaves logging uninitialized.
    pub log_dir: Option<PathBuf>,
    pub busy_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level().to_string(),
            log_dir: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl CoreConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads overrides through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(path) = read(ENV_DB_PATH) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(level) = read(ENV_LOG_LEVEL) {
            config.log_level = normalize_level(&level)
                .map_err(|err| ConfigError::InvalidValue {
                    key: ENV_LOG_LEVEL,
                    value: level.clone(),
                    reason: err.to_string(),
                })?
                .to_string();
        }
        if let Some(dir) = read(ENV_LOG_DIR) {
            config.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = read(ENV_BUSY_TIMEOUT_MS) {
            let millis = raw
                .trim()
                .parse::<u64>()
                .map_err(|err| ConfigError::InvalidValue {
                    key: ENV_BUSY_TIMEOUT_MS,
                    value: raw.clone(),
                    reason: err.to_string(),
                })?;
            config.busy_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }

    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }
}

fn default_db_path() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_DB_FILE_NAME)
}
