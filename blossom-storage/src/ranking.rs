//! Bounded popularity ranking set in the coordination store.

use std::sync::Arc;
use std::time::Duration;

use blossom_core::EntityId;

use crate::coordination::{CoordinationResult, CoordinationStore};

pub const HOT_RANKING_KEY: &str = "hot_ranking";
/// Members kept after each refresh.
pub const DEFAULT_RANKING_SIZE: usize = 1000;
pub const DEFAULT_RANKING_TTL: Duration = Duration::from_secs(60 * 60);

/// Score-ordered set of topic ids, truncated to the top `capacity` members
/// and expiring after `ttl` unless refreshed.
#[derive(Clone)]
pub struct RankingSet {
    store: Arc<dyn CoordinationStore>,
    key: String,
    capacity: usize,
    ttl: Duration,
}

impl RankingSet {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            key: HOT_RANKING_KEY.to_string(),
            capacity: DEFAULT_RANKING_SIZE,
            ttl: DEFAULT_RANKING_TTL,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write all scores in one batch, prune to capacity and refresh the TTL.
    ///
    /// Returns how many members were pruned.
    pub async fn write_scores(&self, scores: &[(EntityId, f64)]) -> CoordinationResult<u64> {
        if scores.is_empty() {
            return Ok(0);
        }
        let members: Vec<(String, f64)> = scores
            .iter()
            .map(|(id, score)| (id.to_string(), *score))
            .collect();
        self.store.sorted_set_add(&self.key, &members).await?;
        let pruned = self
            .store
            .sorted_set_trim_top(&self.key, self.capacity)
            .await?;
        self.store.expire(&self.key, self.ttl).await?;
        Ok(pruned)
    }

    /// Highest-scored ids, best first. Members that are not ids are skipped.
    pub async fn top_ids(&self, limit: usize) -> CoordinationResult<Vec<EntityId>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let members = self
            .store
            .sorted_set_rev_range(&self.key, 0, limit - 1)
            .await?;
        Ok(members
            .iter()
            .filter_map(|m| m.parse::<EntityId>().ok())
            .collect())
    }

    pub async fn len(&self) -> CoordinationResult<u64> {
        self.store.sorted_set_len(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::InMemoryCoordinationStore;

    fn ranking() -> (Arc<InMemoryCoordinationStore>, RankingSet) {
        let store = Arc::new(InMemoryCoordinationStore::new());
        (store.clone(), RankingSet::new(store))
    }

    #[tokio::test]
    async fn test_write_and_read_in_score_order() {
        let (store, set) = ranking();
        set.write_scores(&[(1, 0.5), (2, 3.0), (3, 1.5)])
            .await
            .unwrap();
        assert_eq!(set.top_ids(10).await.unwrap(), vec![2, 3, 1]);
        assert_eq!(set.top_ids(2).await.unwrap(), vec![2, 3]);
        assert!(store.ttl(HOT_RANKING_KEY).unwrap() <= DEFAULT_RANKING_TTL);
    }

    #[tokio::test]
    async fn test_pruned_to_capacity() {
        let (_, set) = ranking();
        let set = set.with_capacity(3);
        let scores: Vec<(EntityId, f64)> = (1..=10).map(|i| (i, i as f64)).collect();
        assert_eq!(set.write_scores(&scores).await.unwrap(), 7);
        assert_eq!(set.len().await.unwrap(), 3);
        assert_eq!(set.top_ids(10).await.unwrap(), vec![10, 9, 8]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_refresh_degrades_to_absent() {
        let (_, set) = ranking();
        let set = set.with_ttl(Duration::from_secs(60));
        set.write_scores(&[(1, 1.0)]).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(set.top_ids(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_inputs() {
        let (store, set) = ranking();
        assert_eq!(set.write_scores(&[]).await.unwrap(), 0);
        assert!(!store.exists(HOT_RANKING_KEY).await.unwrap());
        assert!(set.top_ids(0).await.unwrap().is_empty());
    }
}
