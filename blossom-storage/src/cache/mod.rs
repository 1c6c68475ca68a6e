//! Cache-aside layer for topic detail and list pages.
//!
//! Entries live in the coordination store with a fixed TTL and are never the
//! only copy of anything: a missing or expired entry is always answered by
//! re-reading the store of record. Writes never update cached values in
//! place. They delete the detail key and every list page, since a mutation
//! can move a topic between arbitrary filter/sort/page combinations.

pub mod keys;
pub mod topic_cache;

pub use keys::{detail_key, list_key, LIST_KEY_PATTERN, LIST_KEY_PREFIX};
pub use topic_cache::{CacheConfig, CacheKind, CacheStats, CachedList, TopicCache};
