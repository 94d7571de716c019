//! Process configuration loaded from environment variables.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::identity::TokenSettings;

const DEV_SECRET_KEY: &str = "gatekeep-dev-secret-change-me";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment { Debug, Test, Release }

impl Environment {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Environment::Debug),
            "test" => Some(Environment::Test),
            "release" => Some(Environment::Release),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub environment: Environment,
    pub http_addr: SocketAddr,
    pub secret_key: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Postgres URL; the in-memory store is used when absent.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    /// Deadline applied to every credential store call made for one HTTP request.
    pub request_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("environment", &self.environment)
            .field("http_addr", &self.http_addr)
            .field("secret_key", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("db_max_connections", &self.db_max_connections)
            .field("db_acquire_timeout", &self.db_acquire_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingVar(String),
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
    #[error("invalid listen address: {0}")]
    InvalidAddr(#[from] std::net::AddrParseError),
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_value<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(v) => v.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue { var: name.into(), value: v }),
        None => Ok(default),
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    parse_value(name, var(name), default)
}

fn parse_secs(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    parse_var(name, default.as_secs()).map(Duration::from_secs)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Debug,
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            secret_key: DEV_SECRET_KEY.to_string(),
            access_ttl: Duration::from_secs(24 * 60 * 60),
            refresh_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            database_url: None,
            db_max_connections: 30,
            db_acquire_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    /// A secret key is mandatory in release mode.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let environment = match var("GATEKEEP_ENVIRONMENT") {
            Some(v) => Environment::parse(&v)
                .ok_or(ConfigError::InvalidValue { var: "GATEKEEP_ENVIRONMENT".into(), value: v })?,
            None => defaults.environment,
        };
        let http_addr = match var("GATEKEEP_HTTP_ADDR") {
            Some(v) => v.parse::<SocketAddr>()?,
            None => defaults.http_addr,
        };
        let secret_key = match var("GATEKEEP_SECRET_KEY") {
            Some(v) => v,
            None if environment == Environment::Release => {
                return Err(ConfigError::MissingVar("GATEKEEP_SECRET_KEY".into()));
            }
            None => defaults.secret_key,
        };
        let access_ttl = parse_secs("GATEKEEP_ACCESS_TTL_SECS", defaults.access_ttl)?;
        let refresh_ttl = parse_secs("GATEKEEP_REFRESH_TTL_SECS", defaults.refresh_ttl)?;
        let db_max_connections = parse_var::<u32>("GATEKEEP_DB_MAX_CONNECTIONS", defaults.db_max_connections)?;
        let db_acquire_timeout = parse_secs("GATEKEEP_DB_ACQUIRE_TIMEOUT_SECS", defaults.db_acquire_timeout)?;
        let request_timeout = parse_secs("GATEKEEP_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?;

        Ok(Self {
            environment,
            http_addr,
            secret_key,
            access_ttl,
            refresh_ttl,
            database_url: var("DATABASE_URL"),
            db_max_connections,
            db_acquire_timeout,
            request_timeout,
        })
    }

    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            secret: self.secret_key.clone(),
            access_ttl: chrono::Duration::from_std(self.access_ttl).unwrap_or(chrono::Duration::days(1)),
            refresh_ttl: chrono::Duration::from_std(self.refresh_ttl).unwrap_or(chrono::Duration::days(30)),
        }
    }
}
