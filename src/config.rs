// src/config.rs
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::CoordinatorConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database: DatabaseConfig,
    pub coordinator: CoordinatorConfig,
    /// Deployment environment name, e.g. `development` or `production`.
    pub env: String,
    /// `tracing_subscriber::EnvFilter` directives.
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let db = DatabaseConfig::default();
        let coordinator = CoordinatorConfig::default();

        Ok(Self {
            database: DatabaseConfig {
                name: get("DB_NAME").unwrap_or(db.name),
                user: get("DB_USER").unwrap_or(db.user),
                password: get("DB_PASSWORD").unwrap_or(db.password),
                host: get("DB_HOST").unwrap_or(db.host),
                port: parse(&get, "DB_PORT", db.port)?,
                max_connections: parse(&get, "DB_MAX_CONNECTIONS", db.max_connections)?,
                acquire_timeout: Duration::from_millis(parse(
                    &get,
                    "DB_ACQUIRE_TIMEOUT_MS",
                    db.acquire_timeout.as_millis() as u64,
                )?),
            },
            coordinator: CoordinatorConfig {
                queue_capacity: positive(&get, "CASHBACK_QUEUE_CAPACITY", coordinator.queue_capacity)?,
                max_in_flight: positive(&get, "CASHBACK_MAX_IN_FLIGHT", coordinator.max_in_flight)?,
                submit_timeout: match get("CASHBACK_SUBMIT_TIMEOUT_MS") {
                    None => coordinator.submit_timeout,
                    Some(_) => Some(Duration::from_millis(parse(
                        &get,
                        "CASHBACK_SUBMIT_TIMEOUT_MS",
                        0,
                    )?)),
                },
            },
            env: get("ENV").unwrap_or_else(|| "development".to_string()),
            log_filter: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn positive<G>(get: &G, key: &'static str, default: usize) -> Result<usize, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match parse(get, key, default)? {
        0 => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
        }),
        n => Ok(n),
    }
}
