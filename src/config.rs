//! Engine configuration constants and environment loading

use std::time::Duration;

/// Maximum number of automatic retries for a failed task.
/// 5 retries bounds how long a persistently failing upstream keeps a task
/// alive while still riding out multi-minute outages.
pub const DEFAULT_RETRY_CEILING: u32 = 5;

/// Delay applied after logging a failure and before resubmitting the task.
/// A few seconds avoids hammering an upstream that is already failing.
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 3;

/// Upper bound on a single extraction call. Expiry is treated as an
/// extraction failure and takes the normal retry path.
pub const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 30;

/// Delay between a failed liveness probe and the reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 1;

/// Default primary data store (dataset tables).
pub const DEFAULT_DATA_DB_URL: &str = "sqlite://market_data.db?mode=rwc";

/// Default monitoring store (failure log table).
pub const DEFAULT_MONITOR_DB_URL: &str = "sqlite://market_monitor.db?mode=rwc";

/// Engine configuration.
///
/// All knobs the core recognizes; no CLI flags belong here. Values come from
/// `INGEST_*` environment keys via [`EngineConfig::from_env`], with documented
/// defaults for everything.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Connection URL for the primary data store
    pub data_db_url: String,
    /// Connection URL for the monitoring store
    pub monitor_db_url: String,
    /// Maximum automatic retries per task before it is abandoned
    pub retry_ceiling: u32,
    /// Delay between a logged failure and resubmission
    pub retry_backoff: Duration,
    /// Upper bound on one extraction call
    pub extract_timeout: Duration,
    /// Delay between a failed liveness probe and reconnecting
    pub reconnect_delay: Duration,
    /// User agent presented to upstream data sources
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_db_url: DEFAULT_DATA_DB_URL.to_string(),
            monitor_db_url: DEFAULT_MONITOR_DB_URL.to_string(),
            retry_ceiling: DEFAULT_RETRY_CEILING,
            retry_backoff: Duration::from_secs(DEFAULT_RETRY_BACKOFF_SECS),
            extract_timeout: Duration::from_secs(DEFAULT_EXTRACT_TIMEOUT_SECS),
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            user_agent: concat!("market-ingest/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `INGEST_*` environment keys, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_db_url: std::env::var("INGEST_DATA_DB_URL").unwrap_or(defaults.data_db_url),
            monitor_db_url: std::env::var("INGEST_MONITOR_DB_URL")
                .unwrap_or(defaults.monitor_db_url),
            retry_ceiling: env_u64("INGEST_RETRY_CEILING")
                .map(|v| v as u32)
                .unwrap_or(defaults.retry_ceiling),
            retry_backoff: env_u64("INGEST_RETRY_BACKOFF_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_backoff),
            extract_timeout: env_u64("INGEST_EXTRACT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.extract_timeout),
            reconnect_delay: env_u64("INGEST_RECONNECT_DELAY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconnect_delay),
            user_agent: std::env::var("INGEST_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.retry_ceiling, DEFAULT_RETRY_CEILING);
        assert_eq!(
            config.retry_backoff,
            Duration::from_secs(DEFAULT_RETRY_BACKOFF_SECS)
        );
        assert_eq!(config.data_db_url, DEFAULT_DATA_DB_URL);
    }
}
