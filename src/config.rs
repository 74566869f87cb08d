use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::loader::MAX_UPLOAD_BYTES;

/// Default lifetime of an issued auth token (24 hours)
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest token lifetime accepted from configuration (one year)
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub const ENV_BIND: &str = "EQUIPVIZ_BIND";
pub const ENV_DATA_DIR: &str = "EQUIPVIZ_DATA_DIR";
pub const ENV_MAX_UPLOAD_BYTES: &str = "EQUIPVIZ_MAX_UPLOAD_BYTES";
pub const ENV_HISTORY_LIMIT: &str = "EQUIPVIZ_HISTORY_LIMIT";
pub const ENV_TOKEN_TTL_SECS: &str = "EQUIPVIZ_TOKEN_TTL_SECS";
pub const ENV_ADMIN_USERNAME: &str = "ADMIN_USERNAME";
pub const ENV_ADMIN_PASSWORD: &str = "ADMIN_PASSWORD";
pub const ENV_ADMIN_EMAIL: &str = "ADMIN_EMAIL";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Bootstrap account credentials read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSettings {
    pub username: String,
    pub password: String,
    pub email: String,
}

impl Default for AdminSettings {
    fn default() -> Self {
        AdminSettings {
            username: "admin".to_string(),
            password: "admin123".to_string(),
            email: "admin@example.com".to_string(),
        }
    }
}

/// Runtime configuration for the server
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address the HTTP server listens on
    pub bind: SocketAddr,

    /// Directory holding users and session files
    pub data_dir: PathBuf,

    /// Largest accepted CSV upload in bytes
    pub max_upload_bytes: usize,

    /// Number of sessions returned by the history endpoint
    pub history_limit: usize,

    /// Lifetime of issued auth tokens
    pub token_ttl: Duration,

    /// Admin account to create at startup, if any
    pub admin: Option<AdminSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            data_dir: PathBuf::from("database"),
            max_upload_bytes: MAX_UPLOAD_BYTES,
            history_limit: DEFAULT_HISTORY_LIMIT,
            token_ttl: DEFAULT_TOKEN_TTL,
            admin: None,
        }
    }
}

impl Config {
    /// Build a configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    ///
    /// Unset keys keep their defaults; set but malformed values are errors.
    /// The admin account is enabled as soon as `ADMIN_USERNAME` or
    /// `ADMIN_PASSWORD` is present.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(value) = lookup(ENV_BIND) {
            config.bind = parse(ENV_BIND, &value, "a socket address like 127.0.0.1:8000")?;
        }
        if let Some(value) = lookup(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_MAX_UPLOAD_BYTES) {
            config.max_upload_bytes = parse(ENV_MAX_UPLOAD_BYTES, &value, "a byte count")?;
        }
        if let Some(value) = lookup(ENV_HISTORY_LIMIT) {
            config.history_limit = parse(ENV_HISTORY_LIMIT, &value, "a positive integer")?;
            if config.history_limit == 0 {
                return Err(ConfigError::Invalid {
                    key: ENV_HISTORY_LIMIT,
                    expected: "a positive integer",
                    value,
                });
            }
        }
        if let Some(value) = lookup(ENV_TOKEN_TTL_SECS) {
            let expected = "a number of seconds up to one year";
            let secs: u64 = parse(ENV_TOKEN_TTL_SECS, &value, expected)?;
            config.token_ttl = Duration::from_secs(secs);
            if config.token_ttl > MAX_TOKEN_TTL {
                return Err(ConfigError::Invalid {
                    key: ENV_TOKEN_TTL_SECS,
                    expected,
                    value,
                });
            }
        }

        let username = lookup(ENV_ADMIN_USERNAME);
        let password = lookup(ENV_ADMIN_PASSWORD);
        if username.is_some() || password.is_some() {
            let defaults = AdminSettings::default();
            config.admin = Some(AdminSettings {
                username: username.unwrap_or(defaults.username),
                password: password.unwrap_or(defaults.password),
                email: lookup(ENV_ADMIN_EMAIL).unwrap_or(defaults.email),
            });
        }

        Ok(config)
    }

    /// Turn on the admin bootstrap with defaults if nothing configured it
    pub fn with_default_admin(mut self) -> Self {
        if self.admin.is_none() {
            self.admin = Some(AdminSettings::default());
        }
        self
    }
}

fn parse<T: std::str::FromStr>(
    key: &'static str,
    value: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        expected,
        value: value.to_string(),
    })
}
