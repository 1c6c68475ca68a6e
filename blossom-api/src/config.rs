//! Service Configuration Module
//!
//! Everything the daemon needs to start, loaded from `BLOSSOM_*` environment
//! variables with defaults suitable for a local development stack.

use crate::constants::{
    DEFAULT_CHANGE_STREAM, DEFAULT_CLAIM_IDLE_MS, DEFAULT_CONSUMER_GROUP, DEFAULT_CONSUMER_NAME,
    DEFAULT_DRAIN_TIMEOUT_SECS,
    DEFAULT_MACHINE_ID, DEFAULT_REDIS_URL, DEFAULT_SEARCH_INDEX, DEFAULT_SEARCH_TIMEOUT_SECS,
    DEFAULT_SEARCH_URL,
};
use crate::db::DbConfig;
use crate::jobs::hot_ranking::HotRankingConfig;
use crate::jobs::index_sync::IndexSyncConfig;
use crate::telemetry::TelemetryConfig;
use crate::throttle::ThrottleConfig;
use blossom_core::snowflake::MAX_MACHINE_ID;
use blossom_core::ConfigError;
use blossom_storage::CacheConfig;
use std::time::Duration;

// ============================================================================
// BACKEND CONFIGURATION
// ============================================================================

/// Coordination store connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
        }
    }
}

impl RedisConfig {
    /// # Environment Variables
    /// - `BLOSSOM_REDIS_URL` (default: redis://127.0.0.1:6379/0)
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("BLOSSOM_REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
        }
    }
}

/// Search index endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    /// Base URL of the Elasticsearch cluster
    pub url: String,
    /// Index holding topic documents
    pub index: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SEARCH_URL.to_string(),
            index: DEFAULT_SEARCH_INDEX.to_string(),
            timeout: Duration::from_secs(DEFAULT_SEARCH_TIMEOUT_SECS),
        }
    }
}

impl SearchConfig {
    /// # Environment Variables
    /// - `BLOSSOM_SEARCH_URL` (default: http://localhost:9200)
    /// - `BLOSSOM_SEARCH_INDEX` (default: topics)
    /// - `BLOSSOM_SEARCH_TIMEOUT_SECS` (default: 10)
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("BLOSSOM_SEARCH_URL").unwrap_or_else(|_| DEFAULT_SEARCH_URL.to_string()),
            index: std::env::var("BLOSSOM_SEARCH_INDEX")
                .unwrap_or_else(|_| DEFAULT_SEARCH_INDEX.to_string()),
            timeout: Duration::from_secs(
                std::env::var("BLOSSOM_SEARCH_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SEARCH_TIMEOUT_SECS),
            ),
        }
    }
}

/// Change feed stream and consumer identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFeedConfig {
    pub stream: String,
    pub group: String,
    /// Consumer name within the group. Must survive restarts, otherwise the
    /// previous incarnation's pending entries are only reachable by claiming.
    pub consumer: String,
    /// Pending entries idle at least this long are claimed from other
    /// consumers on connect. `None` disables claiming.
    pub claim_idle: Option<Duration>,
}

impl Default for ChangeFeedConfig {
    fn default() -> Self {
        Self {
            stream: DEFAULT_CHANGE_STREAM.to_string(),
            group: DEFAULT_CONSUMER_GROUP.to_string(),
            consumer: consumer_name(std::env::var("HOSTNAME").ok()),
            claim_idle: Some(Duration::from_millis(DEFAULT_CLAIM_IDLE_MS)),
        }
    }
}

impl ChangeFeedConfig {
    /// # Environment Variables
    /// - `BLOSSOM_CHANGE_STREAM` (default: blossom:binlog)
    /// - `BLOSSOM_CONSUMER_GROUP` (default: blossom-index-sync)
    /// - `BLOSSOM_CONSUMER_NAME` (default: `HOSTNAME`, then blossom-1)
    /// - `BLOSSOM_CLAIM_IDLE_MS` (default: 60000, `off` disables claiming)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stream: std::env::var("BLOSSOM_CHANGE_STREAM")
                .unwrap_or_else(|_| DEFAULT_CHANGE_STREAM.to_string()),
            group: std::env::var("BLOSSOM_CONSUMER_GROUP")
                .unwrap_or_else(|_| DEFAULT_CONSUMER_GROUP.to_string()),
            consumer: std::env::var("BLOSSOM_CONSUMER_NAME").unwrap_or(defaults.consumer),
            claim_idle: match std::env::var("BLOSSOM_CLAIM_IDLE_MS") {
                Ok(raw) => parse_claim_idle(&raw).unwrap_or(defaults.claim_idle),
                Err(_) => defaults.claim_idle,
            },
        }
    }
}

fn consumer_name(hostname: Option<String>) -> String {
    hostname
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| DEFAULT_CONSUMER_NAME.to_string())
}

/// `Some(None)` for "off", `None` when unparseable.
fn parse_claim_idle(raw: &str) -> Option<Option<Duration>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("off") {
        return Some(None);
    }
    raw.parse().ok().map(|ms| Some(Duration::from_millis(ms)))
}

/// Cache TTLs from the environment.
///
/// # Environment Variables
/// - `BLOSSOM_CACHE_DETAIL_TTL_SECS` (default: 600)
/// - `BLOSSOM_CACHE_LIST_TTL_SECS` (default: 300)
pub fn cache_config_from_env() -> CacheConfig {
    let mut config = CacheConfig::default();
    if let Some(secs) = std::env::var("BLOSSOM_CACHE_DETAIL_TTL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
    {
        config = config.with_detail_ttl(Duration::from_secs(secs));
    }
    if let Some(secs) = std::env::var("BLOSSOM_CACHE_LIST_TTL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
    {
        config = config.with_list_ttl(Duration::from_secs(secs));
    }
    config
}

// ============================================================================
// SERVICE CONFIGURATION
// ============================================================================

/// Complete daemon configuration.
#[derive(Debug, Clone)]
pub struct BlossomConfig {
    /// Machine tag baked into every generated id (0..=1023).
    pub machine_id: i64,
    pub db: DbConfig,
    pub redis: RedisConfig,
    pub search: SearchConfig,
    pub change_feed: ChangeFeedConfig,
    pub cache: CacheConfig,
    pub hot_ranking: HotRankingConfig,
    pub index_sync: IndexSyncConfig,
    pub throttle: ThrottleConfig,
    pub telemetry: TelemetryConfig,
    /// How long shutdown waits for in-flight background tasks.
    pub drain_timeout: Duration,
}

impl Default for BlossomConfig {
    fn default() -> Self {
        Self {
            machine_id: DEFAULT_MACHINE_ID,
            db: DbConfig::default(),
            redis: RedisConfig::default(),
            search: SearchConfig::default(),
            change_feed: ChangeFeedConfig::default(),
            cache: CacheConfig::default(),
            hot_ranking: HotRankingConfig::default(),
            index_sync: IndexSyncConfig::default(),
            throttle: ThrottleConfig::default(),
            telemetry: TelemetryConfig::default(),
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
        }
    }
}

impl BlossomConfig {
    /// Load every section from the environment.
    ///
    /// # Environment Variables
    /// - `BLOSSOM_MACHINE_ID` (default: 1)
    /// - `BLOSSOM_DRAIN_TIMEOUT_SECS` (default: 5)
    ///
    /// plus the variables of each section.
    pub fn from_env() -> Self {
        Self {
            machine_id: std::env::var("BLOSSOM_MACHINE_ID")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MACHINE_ID),
            db: DbConfig::from_env(),
            redis: RedisConfig::from_env(),
            search: SearchConfig::from_env(),
            change_feed: ChangeFeedConfig::from_env(),
            cache: cache_config_from_env(),
            hot_ranking: HotRankingConfig::from_env(),
            index_sync: IndexSyncConfig::from_env(),
            throttle: ThrottleConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
            drain_timeout: Duration::from_secs(
                std::env::var("BLOSSOM_DRAIN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DRAIN_TIMEOUT_SECS),
            ),
        }
    }

    pub fn with_machine_id(mut self, machine_id: i64) -> Self {
        self.machine_id = machine_id;
        self
    }

    /// Reject settings the daemon cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=MAX_MACHINE_ID).contains(&self.machine_id) {
            return Err(ConfigError::InvalidValue {
                field: "machine_id".to_string(),
                value: self.machine_id.to_string(),
                reason: format!("must be between 0 and {}", MAX_MACHINE_ID),
            });
        }
        if self.redis.url.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "redis.url".to_string(),
            });
        }
        if self.search.url.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "search.url".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BlossomConfig::default();
        assert_eq!(config.machine_id, 1);
        assert_eq!(config.redis.url, "redis://127.0.0.1:6379/0");
        assert_eq!(config.search.index, "topics");
        assert_eq!(config.change_feed.group, "blossom-index-sync");
        assert_eq!(config.cache.detail_ttl, Duration::from_secs(600));
        assert_eq!(config.cache.list_ttl, Duration::from_secs(300));
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_machine_id_range() {
        assert!(BlossomConfig::default().with_machine_id(0).validate().is_ok());
        assert!(BlossomConfig::default().with_machine_id(1023).validate().is_ok());

        let err = BlossomConfig::default()
            .with_machine_id(1024)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "machine_id"));
        assert!(BlossomConfig::default().with_machine_id(-1).validate().is_err());
    }

    #[test]
    fn test_missing_urls() {
        let mut config = BlossomConfig::default();
        config.search.url.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_consumer_name_is_stable() {
        let a = ChangeFeedConfig::default();
        let b = ChangeFeedConfig::default();
        assert_eq!(a.consumer, b.consumer);

        assert_eq!(consumer_name(Some("web-0".to_string())), "web-0");
        assert_eq!(consumer_name(Some("  ".to_string())), DEFAULT_CONSUMER_NAME);
        assert_eq!(consumer_name(None), DEFAULT_CONSUMER_NAME);
    }

    #[test]
    fn test_claim_idle_parsing() {
        assert_eq!(parse_claim_idle("off"), Some(None));
        assert_eq!(
            parse_claim_idle("0"),
            Some(Some(Duration::from_millis(0)))
        );
        assert_eq!(
            parse_claim_idle(" 1500 "),
            Some(Some(Duration::from_millis(1500)))
        );
        assert_eq!(parse_claim_idle("soon"), None);
    }
}
