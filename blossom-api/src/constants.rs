//! Constants for Blossom API
//!
//! Default values for every configurable knob, plus the fixed limits of the
//! read paths. Centralizing them keeps configuration and services in sync.

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Default machine tag of the identifier generator.
pub const DEFAULT_MACHINE_ID: i64 = 1;

// ============================================================================
// DATABASE
// ============================================================================

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_NAME: &str = "blossom";
pub const DEFAULT_DB_USER: &str = "postgres";

/// Maximum pooled connections.
pub const DEFAULT_DB_POOL_SIZE: usize = 16;

/// Connection acquire timeout in seconds.
pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// COORDINATION STORE (REDIS)
// ============================================================================

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";

/// Keys fetched per SCAN round during pattern invalidation.
pub const SCAN_BATCH_SIZE: usize = 100;

// ============================================================================
// SEARCH INDEX (ELASTICSEARCH)
// ============================================================================

pub const DEFAULT_SEARCH_URL: &str = "http://localhost:9200";
pub const DEFAULT_SEARCH_INDEX: &str = "topics";
pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 10;

/// Titles returned by a suggestion query.
pub const SUGGEST_SIZE: usize = 10;

/// Default and maximum size of a per-category top list.
pub const DEFAULT_CATEGORY_TOP_SIZE: i64 = 10;
pub const MAX_CATEGORY_TOP_SIZE: i64 = 50;

/// Documents per `_bulk` request during a full resync.
pub const RESYNC_BATCH_SIZE: usize = 500;

// ============================================================================
// CHANGE FEED (REDIS STREAMS)
// ============================================================================

pub const DEFAULT_CHANGE_STREAM: &str = "blossom:binlog";
pub const DEFAULT_CONSUMER_GROUP: &str = "blossom-index-sync";

/// Consumer name when neither `BLOSSOM_CONSUMER_NAME` nor `HOSTNAME` is set.
pub const DEFAULT_CONSUMER_NAME: &str = "blossom-1";

/// Idle time after which another consumer's pending entries are claimed.
pub const DEFAULT_CLAIM_IDLE_MS: u64 = 60_000;

/// Entries claimed per XAUTOCLAIM round.
pub const CLAIM_BATCH_SIZE: usize = 100;

/// Stream field holding the flat-message JSON.
pub const CHANGE_PAYLOAD_FIELD: &str = "payload";

/// Deliveries requested per poll.
pub const DEFAULT_SYNC_BATCH_SIZE: usize = 100;

/// How long a poll blocks waiting for new events, in milliseconds.
pub const DEFAULT_SYNC_BLOCK_MS: u64 = 2000;

/// Backoff after the feed itself fails, in milliseconds.
pub const DEFAULT_SYNC_ERROR_BACKOFF_MS: u64 = 1000;

// ============================================================================
// HOT RANKING
// ============================================================================

/// Refresh period of the ranking job (5 minutes).
pub const DEFAULT_RANKING_REFRESH_SECS: u64 = 300;

/// Recent topics scored per refresh.
pub const DEFAULT_RANKING_SAMPLE_SIZE: usize = 1000;

/// Default and maximum size of a hot list read.
pub const DEFAULT_HOT_LIMIT: i64 = 20;
pub const MAX_HOT_LIMIT: i64 = 100;

/// The fallback path samples `limit * FACTOR` recent topics, capped.
pub const HOT_FALLBACK_SAMPLE_FACTOR: i64 = 3;
pub const HOT_FALLBACK_SAMPLE_CAP: i64 = 100;

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Global limit, requests per second.
pub const DEFAULT_GLOBAL_RATE_PER_SEC: u32 = 100;
pub const DEFAULT_GLOBAL_BURST: u32 = 200;

/// Per-user limit, requests per second.
pub const DEFAULT_USER_RATE_PER_SEC: u32 = 50;
pub const DEFAULT_USER_BURST: u32 = 100;

/// Per-IP limit, requests per second.
pub const DEFAULT_IP_RATE_PER_SEC: u32 = 20;
pub const DEFAULT_IP_BURST: u32 = 40;

// ============================================================================
// SHUTDOWN
// ============================================================================

/// How long shutdown waits for in-flight background tasks.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 5;
