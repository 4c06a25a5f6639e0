// Application configuration
// Read from environment variables (a .env file is loaded first by main)

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::pricing::StoreContext;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 3;
const DEFAULT_CACHE_TTL_SECS: u64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set in environment")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Runtime configuration of the pricing service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// How long cached rule sections stay fresh
    pub cache_ttl: Duration,
    pub store: StoreContext,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any name → value lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = value("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let store_id = value("DEFAULT_STORE_ID").ok_or(ConfigError::Missing("DEFAULT_STORE_ID"))?;

        Ok(Self {
            database_url,
            max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                value("DATABASE_MAX_CONNECTIONS"),
                DEFAULT_MAX_CONNECTIONS,
            )?,
            acquire_timeout: Duration::from_secs(parse_or(
                "DATABASE_ACQUIRE_TIMEOUT_SECS",
                value("DATABASE_ACQUIRE_TIMEOUT_SECS"),
                DEFAULT_ACQUIRE_TIMEOUT_SECS,
            )?),
            cache_ttl: Duration::from_secs(parse_or(
                "PRICING_CACHE_TTL_SECS",
                value("PRICING_CACHE_TTL_SECS"),
                DEFAULT_CACHE_TTL_SECS,
            )?),
            store: StoreContext {
                store_id: parse("DEFAULT_STORE_ID", store_id)?,
                default_price_group_id: value("DEFAULT_PRICE_GROUP_ID")
                    .map(|raw| parse("DEFAULT_PRICE_GROUP_ID", raw))
                    .transpose()?,
            },
        })
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value: raw })
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    raw.map(|raw| parse(name, raw)).unwrap_or(Ok(default))
}
