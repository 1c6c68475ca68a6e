//! Blossom Storage - Backend Traits and In-Memory Implementations
//!
//! Defines the four backends the consistency layer talks to (store of record,
//! coordination store, search index, change feed) along with the pieces built
//! directly on the coordination store: the distributed lock, the cache-aside
//! topic cache and the bounded ranking set.
//!
//! Network-backed implementations live in `blossom-api`.

pub mod cache;
pub mod change_feed;
pub mod coordination;
pub mod lock;
pub mod ranking;
pub mod record;
pub mod search;

pub use cache::{
    detail_key, list_key, CacheConfig, CacheKind, CacheStats, CachedList, TopicCache,
    LIST_KEY_PATTERN, LIST_KEY_PREFIX,
};
pub use change_feed::{ChangeEventSource, Delivery, EventResult, InMemoryChangeFeed};
pub use coordination::{CoordinationResult, CoordinationStore, InMemoryCoordinationStore};
pub use lock::{LockGuard, LockManager};
pub use ranking::{RankingSet, DEFAULT_RANKING_SIZE, DEFAULT_RANKING_TTL, HOT_RANKING_KEY};
pub use record::{InMemoryRecordStore, RecordStore};
pub use search::{InMemorySearchIndex, IndexResult, SearchIndex, MINIMUM_SHOULD_MATCH};
