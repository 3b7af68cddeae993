//! Database configuration loaded from the environment.
//!
//! Persistence is optional: when neither `ACTIONS_RELAY_DATABASE_URL` nor
//! `ACTIONS_RELAY_DB_HOST` is set, [`StoreConfig::from_env`] returns
//! `Ok(None)` and the service runs without a database.

use std::str::FromStr;
use std::time::Duration;

use runs::ConfigError;
use sqlx::postgres::PgConnectOptions;

// Environment variable names
const ENV_DATABASE_URL: &str = "ACTIONS_RELAY_DATABASE_URL";
const ENV_HOST: &str = "ACTIONS_RELAY_DB_HOST";
const ENV_PORT: &str = "ACTIONS_RELAY_DB_PORT";
const ENV_NAME: &str = "ACTIONS_RELAY_DB_NAME";
const ENV_USER: &str = "ACTIONS_RELAY_DB_USER";
const ENV_PASSWORD: &str = "ACTIONS_RELAY_DB_PASSWORD";
const ENV_POOL_SIZE: &str = "ACTIONS_RELAY_DB_POOL_SIZE";
const ENV_CONNECT_TIMEOUT: &str = "ACTIONS_RELAY_DB_CONNECT_TIMEOUT_SECS";
const ENV_IDLE_TIMEOUT: &str = "ACTIONS_RELAY_DB_IDLE_TIMEOUT_SECS";

// Default configuration values
const DEFAULT_PORT: u16 = 5432;
const DEFAULT_NAME: &str = "actions_relay";
const DEFAULT_USER: &str = "postgres";
const DEFAULT_POOL_SIZE: u32 = 5;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Where the database lives.
#[derive(Clone, PartialEq)]
pub enum ConnectionTarget {
    /// A complete connection URL.
    Url(String),
    /// Individual connection parameters.
    Parts {
        host: String,
        port: u16,
        database: String,
        user: String,
        password: String,
    },
}

/// Connection and pool settings for the PostgreSQL gateway.
#[derive(Clone, PartialEq)]
pub struct StoreConfig {
    pub target: ConnectionTarget,
    pub pool_size: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl StoreConfig {
    /// Loads the configuration from process environment variables.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let target = if let Some(url) = get(ENV_DATABASE_URL) {
            ConnectionTarget::Url(url)
        } else if let Some(host) = get(ENV_HOST) {
            ConnectionTarget::Parts {
                host,
                port: parse_or(get(ENV_PORT), ENV_PORT, DEFAULT_PORT)?,
                database: get(ENV_NAME).unwrap_or_else(|| DEFAULT_NAME.to_string()),
                user: get(ENV_USER).unwrap_or_else(|| DEFAULT_USER.to_string()),
                password: lookup(ENV_PASSWORD).unwrap_or_default(),
            }
        } else {
            return Ok(None);
        };

        let pool_size = parse_or(get(ENV_POOL_SIZE), ENV_POOL_SIZE, DEFAULT_POOL_SIZE)?;
        if pool_size == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_POOL_SIZE.to_string(),
                message: "pool size must be at least 1".to_string(),
            });
        }

        Ok(Some(Self {
            target,
            pool_size,
            connect_timeout: Duration::from_secs(parse_or(
                get(ENV_CONNECT_TIMEOUT),
                ENV_CONNECT_TIMEOUT,
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?),
            idle_timeout: Duration::from_secs(parse_or(
                get(ENV_IDLE_TIMEOUT),
                ENV_IDLE_TIMEOUT,
                DEFAULT_IDLE_TIMEOUT_SECS,
            )?),
        }))
    }

    /// Builds sqlx connection options for this configuration.
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        match &self.target {
            ConnectionTarget::Url(url) => {
                PgConnectOptions::from_str(url).map_err(|e| ConfigError::Invalid {
                    key: ENV_DATABASE_URL.to_string(),
                    message: e.to_string(),
                })
            }
            ConnectionTarget::Parts {
                host,
                port,
                database,
                user,
                password,
            } => Ok(PgConnectOptions::new()
                .host(host)
                .port(*port)
                .database(database)
                .username(user)
                .password(password)),
        }
    }
}

// Passwords and URLs (which may embed one) stay out of Debug output and logs.
impl std::fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionTarget::Url(_) => f.write_str("Url(<redacted>)"),
            ConnectionTarget::Parts {
                host,
                port,
                database,
                user,
                ..
            } => f
                .debug_struct("Parts")
                .field("host", host)
                .field("port", port)
                .field("database", database)
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("target", &self.target)
            .field("pool_size", &self.pool_size)
            .field("connect_timeout", &self.connect_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
    }
}
