//! Worker configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

use seatkeeper_entitlements::EngineSettings;
use seatkeeper_shared::Deployment;

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Redis (entitlement cache + refresh leases)
    pub redis_url: String,

    pub deployment: Deployment,

    // Schedules (six-field cron, seconds first)
    pub refresh_cron: String,
    pub purge_cron: String,

    pub refresh_batch_limit: usize,
    pub cleanup_batch_size: usize,
    pub refresh_lease_seconds: u64,

    /// JSON capability registry; empty registry when unset
    pub capabilities_file: Option<String>,

    /// Lowest membership access level that qualifies for a seat
    pub min_access_level: i32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,

            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),

            deployment: parse_or("SEATKEEPER_DEPLOYMENT", Deployment::SelfManaged)?,

            refresh_cron: env::var("REFRESH_CRON")
                .unwrap_or_else(|_| "0 */10 * * * *".to_string()),
            purge_cron: env::var("PURGE_CRON").unwrap_or_else(|_| "0 0 3 * * *".to_string()),

            refresh_batch_limit: parse_positive_or("REFRESH_BATCH_LIMIT", 50)?,
            cleanup_batch_size: parse_positive_or("CLEANUP_BATCH_SIZE", 50)?,
            refresh_lease_seconds: parse_positive_or("REFRESH_LEASE_SECONDS", 3600)?,

            capabilities_file: env::var("CAPABILITIES_FILE").ok().filter(|p| !p.is_empty()),

            min_access_level: parse_or("MEMBERSHIP_MIN_ACCESS_LEVEL", 10)?,
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            deployment: self.deployment,
            cleanup_batch_size: self.cleanup_batch_size,
            refresh_batch_limit: self.refresh_batch_limit,
            lease_ttl: Duration::from_secs(self.refresh_lease_seconds),
            ..EngineSettings::default()
        }
    }
}

/// Parse an optional variable, falling back to `default` when unset
fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        _ => Ok(default),
    }
}

/// [`parse_or`] for counts and durations where zero would stall the worker
fn parse_positive_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq,
{
    let value = parse_or(name, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            name,
            value: "0".to_string(),
        });
    }
    Ok(value)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}
