//! Environment-derived process configuration shared by every role binary
//! (api/observer/worker/test-asset-type/seeder). Missing required variables
//! are fatal at startup; everything else has a sensible default.

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

fn env_var(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingEnv(name.to_string()))
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_u64(name: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse::<u64>()
        .map_err(|e| ConfigError::Invalid(format!("{name}={value}: {e}")))
}

/// Database connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // DATABASE_URL is accepted as a fallback for local development with
        // the usual sqlx tooling.
        let url = env::var("CASTELLUM_DB_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .map_err(|_| ConfigError::MissingEnv("CASTELLUM_DB_URL".to_string()))?;
        let max_connections = env_or("CASTELLUM_DB_MAX_CONNECTIONS", "10")
            .parse::<u32>()
            .map_err(|e| ConfigError::Invalid(format!("CASTELLUM_DB_MAX_CONNECTIONS: {e}")))?;
        Ok(DatabaseConfig { url, max_connections })
    }
}

/// Scheduler cadences: how often a queued loop polls when it finds nothing
/// to do, and the fixed periods of the scrape and cron loops.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub queued_loop_idle_interval: Duration,
    pub resource_scrape_interval: Duration,
    pub asset_scrape_interval: Duration,
    pub garbage_collect_interval: Duration,
    pub metrics_interval: Duration,
    /// How many concurrent asset-scrape loops the observer runs.
    pub asset_scrape_workers: usize,
    /// How many concurrent resource-scrape loops the observer runs.
    pub resource_scrape_workers: usize,
    /// How long a claimed pending operation stays leased to one executor
    /// before another may pick it up.
    pub resize_lease: Duration,
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let idle = parse_u64(
            "CASTELLUM_QUEUED_LOOP_IDLE_SECS",
            &env_or("CASTELLUM_QUEUED_LOOP_IDLE_SECS", "10"),
        )?;
        let resource_scrape = parse_u64(
            "CASTELLUM_RESOURCE_SCRAPE_INTERVAL_SECS",
            &env_or("CASTELLUM_RESOURCE_SCRAPE_INTERVAL_SECS", "1800"),
        )?;
        let asset_scrape = parse_u64(
            "CASTELLUM_ASSET_SCRAPE_INTERVAL_SECS",
            &env_or("CASTELLUM_ASSET_SCRAPE_INTERVAL_SECS", "300"),
        )?;
        let gc = parse_u64(
            "CASTELLUM_GC_INTERVAL_SECS",
            &env_or("CASTELLUM_GC_INTERVAL_SECS", "3600"),
        )?;
        let metrics = parse_u64(
            "CASTELLUM_METRICS_INTERVAL_SECS",
            &env_or("CASTELLUM_METRICS_INTERVAL_SECS", "180"),
        )?;
        let asset_workers = parse_u64(
            "CASTELLUM_ASSET_SCRAPE_WORKERS",
            &env_or("CASTELLUM_ASSET_SCRAPE_WORKERS", "12"),
        )?;
        let resource_workers = parse_u64(
            "CASTELLUM_RESOURCE_SCRAPE_WORKERS",
            &env_or("CASTELLUM_RESOURCE_SCRAPE_WORKERS", "3"),
        )?;
        let resize_lease = parse_u64(
            "CASTELLUM_RESIZE_LEASE_SECS",
            &env_or("CASTELLUM_RESIZE_LEASE_SECS", "1800"),
        )?;
        Ok(SchedulerConfig {
            queued_loop_idle_interval: Duration::from_secs(idle),
            resource_scrape_interval: Duration::from_secs(resource_scrape),
            asset_scrape_interval: Duration::from_secs(asset_scrape),
            garbage_collect_interval: Duration::from_secs(gc),
            metrics_interval: Duration::from_secs(metrics),
            asset_scrape_workers: asset_workers as usize,
            resource_scrape_workers: resource_workers as usize,
            resize_lease: Duration::from_secs(resize_lease),
        })
    }
}

/// How long a finished operation is retained before garbage collection
/// deletes it.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub finished_operation_retention: Duration,
}

impl RetentionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let days = parse_u64(
            "CASTELLUM_FINISHED_OPERATION_RETENTION_DAYS",
            &env_or("CASTELLUM_FINISHED_OPERATION_RETENTION_DAYS", "14"),
        )?;
        Ok(RetentionConfig {
            finished_operation_retention: Duration::from_secs(days * 86_400),
        })
    }
}

/// Where this process serves HTTP (`/metrics` and `/healthcheck` on every
/// role; the full API on the api role).
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub listen_address: String,
}

impl HttpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(HttpConfig {
            listen_address: env_var("CASTELLUM_HTTP_LISTEN_ADDRESS")?,
        })
    }
}

/// Full process configuration: database plus scheduler cadences, common to
/// every role binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub retention: RetentionConfig,
    pub http: HttpConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AppConfig {
            database: DatabaseConfig::from_env()?,
            scheduler: SchedulerConfig::from_env()?,
            retention: RetentionConfig::from_env()?,
            http: HttpConfig::from_env()?,
        })
    }
}

/// Comma-separated plugin IDs to load, from `CASTELLUM_ASSET_MANAGERS`.
/// Every role binary that touches `AssetManager`s (api, observer, worker,
/// test-asset-type) reads this.
pub fn asset_manager_ids_from_env() -> Result<Vec<String>, ConfigError> {
    let raw = env_var("CASTELLUM_ASSET_MANAGERS")?;
    let ids: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if ids.is_empty() {
        return Err(ConfigError::Invalid("CASTELLUM_ASSET_MANAGERS must list at least one plugin id".into()));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_config_requires_database_url() {
        env::remove_var("CASTELLUM_DB_URL");
        env::remove_var("DATABASE_URL");
        assert!(matches!(DatabaseConfig::from_env(), Err(ConfigError::MissingEnv(_))));
    }

    // One test body covers defaults and rejection so the two never race on
    // the shared process environment.
    #[test]
    fn scheduler_config_defaults_and_rejection() {
        for var in [
            "CASTELLUM_QUEUED_LOOP_IDLE_SECS",
            "CASTELLUM_RESOURCE_SCRAPE_INTERVAL_SECS",
            "CASTELLUM_ASSET_SCRAPE_INTERVAL_SECS",
            "CASTELLUM_GC_INTERVAL_SECS",
            "CASTELLUM_METRICS_INTERVAL_SECS",
            "CASTELLUM_ASSET_SCRAPE_WORKERS",
            "CASTELLUM_RESOURCE_SCRAPE_WORKERS",
            "CASTELLUM_RESIZE_LEASE_SECS",
        ] {
            env::remove_var(var);
        }
        let cfg = SchedulerConfig::from_env().unwrap();
        assert_eq!(cfg.queued_loop_idle_interval, Duration::from_secs(10));
        assert_eq!(cfg.resource_scrape_interval, Duration::from_secs(1800));
        assert_eq!(cfg.asset_scrape_interval, Duration::from_secs(300));
        assert_eq!(cfg.asset_scrape_workers, 12);
        assert_eq!(cfg.resource_scrape_workers, 3);

        env::set_var("CASTELLUM_GC_INTERVAL_SECS", "not-a-number");
        assert!(SchedulerConfig::from_env().is_err());
        env::remove_var("CASTELLUM_GC_INTERVAL_SECS");
    }
}
