//! Typed access to cached topic detail and list entries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use blossom_core::{CoordinationError, EntityId, Topic, TopicListQuery};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::keys::{detail_key, list_key, LIST_KEY_PATTERN};
use crate::coordination::{CoordinationResult, CoordinationStore};

/// TTLs of cached entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub detail_ttl: Duration,
    pub list_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            detail_ttl: Duration::from_secs(10 * 60),
            list_ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detail_ttl(mut self, ttl: Duration) -> Self {
        self.detail_ttl = ttl;
        self
    }

    pub fn with_list_ttl(mut self, ttl: Duration) -> Self {
        self.list_ttl = ttl;
        self
    }
}

/// Which family of entries a lookup touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Detail,
    List,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Detail => "detail",
            CacheKind::List => "list",
        }
    }
}

/// Cached list page: `{"topics": [...], "total": n}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedList {
    pub topics: Vec<Topic>,
    pub total: i64,
}

/// Hit and miss counts since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub detail_hits: u64,
    pub detail_misses: u64,
    pub list_hits: u64,
    pub list_misses: u64,
}

impl CacheStats {
    /// Hit rate over both families (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.detail_hits + self.list_hits;
        let total = hits + self.detail_misses + self.list_misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    detail_hits: AtomicU64,
    detail_misses: AtomicU64,
    list_hits: AtomicU64,
    list_misses: AtomicU64,
}

/// Topic cache over the coordination store.
///
/// Lookups return `Ok(None)` on a miss. A transport failure or an entry that
/// no longer deserializes is an error; callers treat both as a miss and read
/// the store of record.
#[derive(Clone)]
pub struct TopicCache {
    store: Arc<dyn CoordinationStore>,
    config: CacheConfig,
    counters: Arc<Counters>,
}

impl TopicCache {
    pub fn new(store: Arc<dyn CoordinationStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            detail_hits: self.counters.detail_hits.load(Ordering::Relaxed),
            detail_misses: self.counters.detail_misses.load(Ordering::Relaxed),
            list_hits: self.counters.list_hits.load(Ordering::Relaxed),
            list_misses: self.counters.list_misses.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // DETAIL
    // ========================================================================

    pub async fn get_detail(&self, id: EntityId) -> CoordinationResult<Option<Topic>> {
        let found = self.get_json::<Topic>(&detail_key(id)).await?;
        self.record(CacheKind::Detail, found.is_some());
        Ok(found)
    }

    pub async fn put_detail(&self, topic: &Topic) -> CoordinationResult<()> {
        self.put_json(&detail_key(topic.id), topic, self.config.detail_ttl)
            .await
    }

    /// Returns whether an entry was removed.
    pub async fn delete_detail(&self, id: EntityId) -> CoordinationResult<bool> {
        Ok(self.store.delete(&[detail_key(id)]).await? > 0)
    }

    // ========================================================================
    // LIST
    // ========================================================================

    pub async fn get_list(&self, query: &TopicListQuery) -> CoordinationResult<Option<CachedList>> {
        let found = self.get_json::<CachedList>(&list_key(query)).await?;
        self.record(CacheKind::List, found.is_some());
        Ok(found)
    }

    pub async fn put_list(&self, query: &TopicListQuery, page: &CachedList) -> CoordinationResult<()> {
        self.put_json(&list_key(query), page, self.config.list_ttl)
            .await
    }

    /// Delete every cached list page. Returns how many were removed.
    pub async fn invalidate_lists(&self) -> CoordinationResult<u64> {
        let removed = self.store.delete_by_pattern(LIST_KEY_PATTERN).await?;
        tracing::debug!(removed, "Invalidated topic list cache");
        Ok(removed)
    }

    /// Delete a topic's detail entry and every list page.
    pub async fn invalidate_topic(&self, id: EntityId) -> CoordinationResult<()> {
        self.delete_detail(id).await?;
        self.invalidate_lists().await?;
        Ok(())
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn record(&self, kind: CacheKind, hit: bool) {
        let counter = match (kind, hit) {
            (CacheKind::Detail, true) => &self.counters.detail_hits,
            (CacheKind::Detail, false) => &self.counters.detail_misses,
            (CacheKind::List, true) => &self.counters.list_hits,
            (CacheKind::List, false) => &self.counters.list_misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CoordinationResult<Option<T>> {
        match self.store.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CoordinationError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> CoordinationResult<()> {
        let raw = serde_json::to_string(value).map_err(|e| CoordinationError::CommandFailed {
            command: "SET".to_string(),
            reason: e.to_string(),
        })?;
        self.store.set(key, &raw, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::InMemoryCoordinationStore;
    use blossom_core::TopicSort;
    use chrono::Utc;

    fn topic(id: EntityId) -> Topic {
        Topic {
            id,
            user_id: 1,
            username: "alice".to_string(),
            title: "hello".to_string(),
            content: "world".to_string(),
            category: "general".to_string(),
            like_count: 3,
            dislike_count: 0,
            comment_count: 1,
            view_count: 9,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn cache() -> (Arc<InMemoryCoordinationStore>, TopicCache) {
        let store = Arc::new(InMemoryCoordinationStore::new());
        (store.clone(), TopicCache::new(store, CacheConfig::default()))
    }

    #[tokio::test]
    async fn test_detail_roundtrip_and_ttl() {
        let (store, cache) = cache();
        assert!(cache.get_detail(1).await.unwrap().is_none());

        let t = topic(1);
        cache.put_detail(&t).await.unwrap();
        assert_eq!(cache.get_detail(1).await.unwrap(), Some(t));

        let ttl = store.ttl("topic:detail:1").unwrap();
        assert!(ttl <= Duration::from_secs(600) && ttl > Duration::from_secs(590));

        assert!(cache.delete_detail(1).await.unwrap());
        assert!(!cache.delete_detail(1).await.unwrap());

        let stats = cache.stats();
        assert_eq!(stats.detail_hits, 1);
        assert_eq!(stats.detail_misses, 1);
    }

    #[tokio::test]
    async fn test_list_payload_shape() {
        let (store, cache) = cache();
        let q = TopicListQuery::new(1, 10, TopicSort::New, None);
        let page = CachedList {
            topics: vec![topic(5)],
            total: 1,
        };
        cache.put_list(&q, &page).await.unwrap();

        let raw = store.get(&list_key(&q)).await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["total"], 1);
        assert_eq!(json["topics"][0]["id"], "5");
        assert!(store.ttl(&list_key(&q)).unwrap() <= Duration::from_secs(300));

        assert_eq!(cache.get_list(&q).await.unwrap(), Some(page));
    }

    #[tokio::test]
    async fn test_invalidate_lists_leaves_details() {
        let (store, cache) = cache();
        cache.put_detail(&topic(1)).await.unwrap();
        for sort in [TopicSort::Hot, TopicSort::New, TopicSort::Like] {
            let q = TopicListQuery::new(1, 10, sort, None);
            cache
                .put_list(&q, &CachedList { topics: vec![], total: 0 })
                .await
                .unwrap();
        }
        assert_eq!(cache.invalidate_lists().await.unwrap(), 3);
        assert_eq!(store.keys(), vec!["topic:detail:1".to_string()]);

        cache.invalidate_topic(1).await.unwrap();
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_an_error() {
        let (store, cache) = cache();
        store
            .set("topic:detail:3", "{not json", Duration::from_secs(60))
            .await
            .unwrap();
        let err = cache.get_detail(3).await.unwrap_err();
        assert!(matches!(err, CoordinationError::Corrupt { .. }));
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            detail_hits: 3,
            detail_misses: 1,
            list_hits: 1,
            list_misses: 3,
        };
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
