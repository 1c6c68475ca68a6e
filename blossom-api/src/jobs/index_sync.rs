//! Search Index Sync Task
//!
//! Replays row-level change events from the store of record into the search
//! index. Events are applied in delivery order and acknowledged once handled:
//!
//! - `topics` insert/update: each row image becomes a document upsert
//! - `topics` delete: each row's document is deleted (missing is fine)
//! - `comments` any change: the affected topics' `comment_count` is
//!   re-counted from the store of record and written as a partial update
//!
//! DDL, other tables and unparseable payloads are skipped. A row that fails
//! to index is logged and counted; it does not block the rest of the batch.
//! The index converges on the next event for that topic or the next full
//! resync.

use crate::constants::{
    DEFAULT_SYNC_BATCH_SIZE, DEFAULT_SYNC_BLOCK_MS, DEFAULT_SYNC_ERROR_BACKOFF_MS,
    RESYNC_BATCH_SIZE,
};
use crate::telemetry::with_metrics;
use blossom_core::{
    BlossomResult, ChangeEvent, ChangeKind, EntityId, TopicDocument, COMMENTS_TABLE,
    TOPICS_TABLE,
};
use blossom_storage::{ChangeEventSource, Delivery, RecordStore, SearchIndex};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSyncConfig {
    /// Maximum deliveries read per poll (default: 100)
    pub batch_size: usize,

    /// How long a poll waits for new events (default: 2 seconds)
    pub block: Duration,

    /// Pause after a failed poll (default: 1 second)
    pub error_backoff: Duration,
}

impl Default for IndexSyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_SYNC_BATCH_SIZE,
            block: Duration::from_millis(DEFAULT_SYNC_BLOCK_MS),
            error_backoff: Duration::from_millis(DEFAULT_SYNC_ERROR_BACKOFF_MS),
        }
    }
}

impl IndexSyncConfig {
    /// # Environment Variables
    /// - `BLOSSOM_SYNC_BATCH_SIZE`: Deliveries per poll (default: 100)
    /// - `BLOSSOM_SYNC_BLOCK_MS`: Poll wait in milliseconds (default: 2000)
    /// - `BLOSSOM_SYNC_ERROR_BACKOFF_MS`: Pause after a failed poll (default: 1000)
    pub fn from_env() -> Self {
        let batch_size = std::env::var("BLOSSOM_SYNC_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_SYNC_BATCH_SIZE);

        let block = Duration::from_millis(
            std::env::var("BLOSSOM_SYNC_BLOCK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SYNC_BLOCK_MS),
        );

        let error_backoff = Duration::from_millis(
            std::env::var("BLOSSOM_SYNC_ERROR_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SYNC_ERROR_BACKOFF_MS),
        );

        Self {
            batch_size,
            block,
            error_backoff,
        }
    }

    pub fn development() -> Self {
        Self {
            batch_size: 10,
            block: Duration::from_millis(200),
            error_backoff: Duration::from_millis(200),
        }
    }

    pub fn production() -> Self {
        Self::default()
    }
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct IndexSyncMetrics {
    /// Parsed events handled, skipped ones included
    pub events_processed: AtomicU64,

    /// Events with nothing to apply
    pub events_skipped: AtomicU64,

    /// Payloads that were not a change event
    pub malformed_events: AtomicU64,

    /// Rows that failed to reach the index
    pub index_failures: AtomicU64,
}

impl IndexSyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> IndexSyncSnapshot {
        IndexSyncSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            malformed_events: self.malformed_events.load(Ordering::Relaxed),
            index_failures: self.index_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSyncSnapshot {
    pub events_processed: u64,
    pub events_skipped: u64,
    pub malformed_events: u64,
    pub index_failures: u64,
}

// ============================================================================
// SYNCHRONIZER
// ============================================================================

/// What a single event did to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Documents upserted.
    Indexed(usize),
    /// Documents removed (absent ones are not counted).
    Deleted(usize),
    /// Topics whose comment count was rewritten.
    CountsRefreshed(usize),
    Skipped(String),
}

impl SyncOutcome {
    fn label(&self) -> &'static str {
        match self {
            SyncOutcome::Indexed(_) => "indexed",
            SyncOutcome::Deleted(_) => "deleted",
            SyncOutcome::CountsRefreshed(_) => "counts_refreshed",
            SyncOutcome::Skipped(_) => "skipped",
        }
    }
}

pub struct IndexSynchronizer {
    records: Arc<dyn RecordStore>,
    index: Arc<dyn SearchIndex>,
    metrics: Arc<IndexSyncMetrics>,
}

impl IndexSynchronizer {
    pub fn new(records: Arc<dyn RecordStore>, index: Arc<dyn SearchIndex>) -> Self {
        Self {
            records,
            index,
            metrics: Arc::new(IndexSyncMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<IndexSyncMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Parse and apply one delivery. Malformed payloads are skipped.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> SyncOutcome {
        match ChangeEvent::from_slice(&delivery.payload) {
            Ok(event) => self.handle_event(&event).await,
            Err(e) => {
                self.metrics.malformed_events.fetch_add(1, Ordering::Relaxed);
                with_metrics(|m| m.record_change_event("unknown", "malformed"));
                tracing::warn!(delivery_id = %delivery.id, error = %e, "Skipping malformed change event");
                SyncOutcome::Skipped("malformed payload".to_string())
            }
        }
    }

    /// Apply one change event to the index.
    pub async fn handle_event(&self, event: &ChangeEvent) -> SyncOutcome {
        self.metrics.events_processed.fetch_add(1, Ordering::Relaxed);

        let outcome = if event.is_ddl {
            SyncOutcome::Skipped("ddl statement".to_string())
        } else {
            match (event.table.as_str(), event.kind()) {
                (TOPICS_TABLE, ChangeKind::Insert | ChangeKind::Update) => {
                    SyncOutcome::Indexed(self.upsert_topics(event).await)
                }
                (TOPICS_TABLE, ChangeKind::Delete) => {
                    SyncOutcome::Deleted(self.delete_topics(event).await)
                }
                (TOPICS_TABLE, ChangeKind::Other(op)) => {
                    SyncOutcome::Skipped(format!("unsupported operation {}", op))
                }
                (COMMENTS_TABLE, _) => {
                    SyncOutcome::CountsRefreshed(self.refresh_comment_counts(event).await)
                }
                (table, _) => SyncOutcome::Skipped(format!("untracked table {}", table)),
            }
        };

        if let SyncOutcome::Skipped(reason) = &outcome {
            self.metrics.events_skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(table = %event.table, kind = %event.kind(), reason = %reason, "Change event skipped");
        } else {
            tracing::debug!(table = %event.table, kind = %event.kind(), outcome = ?outcome, "Change event applied");
        }
        with_metrics(|m| m.record_change_event(&event.table, outcome.label()));
        outcome
    }

    async fn upsert_topics(&self, event: &ChangeEvent) -> usize {
        let fallback = event.executed_at().unwrap_or_else(Utc::now);
        let mut indexed = 0;
        for row in event.rows() {
            let doc = match row.to_topic_document(fallback) {
                Ok(doc) => doc,
                Err(e) => {
                    self.row_failed(&e, None, "Unusable topic row");
                    continue;
                }
            };
            match self.index.upsert(&doc).await {
                Ok(()) => indexed += 1,
                Err(e) => self.row_failed(&e, row.int("id"), "Failed to index topic"),
            }
        }
        indexed
    }

    async fn delete_topics(&self, event: &ChangeEvent) -> usize {
        let mut deleted = 0;
        for id in event.distinct_ids("id") {
            match self.index.delete(id).await {
                Ok(true) => deleted += 1,
                Ok(false) => tracing::debug!(topic_id = id, "Deleted topic was not indexed"),
                Err(e) => self.row_failed(&e, Some(id), "Failed to delete topic document"),
            }
        }
        deleted
    }

    /// Comment counts are recomputed rather than read from the event, so
    /// replaying or reordering comment events cannot drift the count.
    async fn refresh_comment_counts(&self, event: &ChangeEvent) -> usize {
        let mut refreshed = 0;
        for topic_id in event.distinct_ids("topic_id") {
            let count = match self.records.comment_count_by_topic(topic_id).await {
                Ok(count) => count,
                Err(e) => {
                    self.row_failed(&e, Some(topic_id), "Failed to count comments");
                    continue;
                }
            };
            match self.index.update_comment_count(topic_id, count).await {
                Ok(true) => refreshed += 1,
                Ok(false) => tracing::debug!(topic_id, "Topic not indexed, comment count dropped"),
                Err(e) => self.row_failed(&e, Some(topic_id), "Failed to update comment count"),
            }
        }
        refreshed
    }

    fn row_failed(&self, error: &dyn std::fmt::Display, topic_id: Option<EntityId>, message: &str) {
        self.metrics.index_failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(error = %error, topic_id = ?topic_id, "{}", message);
    }

    /// Rebuild the index from every topic in the store of record.
    ///
    /// Returns the number of documents written.
    pub async fn resync_all(&self) -> BlossomResult<usize> {
        let mut after: EntityId = 0;
        let mut total = 0;
        loop {
            let topics = self
                .records
                .topic_scan(after, RESYNC_BATCH_SIZE as i64)
                .await?;
            let Some(last) = topics.last() else {
                break;
            };
            after = last.id;

            let docs: Vec<TopicDocument> = topics.iter().map(TopicDocument::from).collect();
            total += self.index.bulk_upsert(&docs).await?;
            tracing::debug!(batch = docs.len(), total, "Resync batch indexed");

            if topics.len() < RESYNC_BATCH_SIZE {
                break;
            }
        }
        tracing::info!(total, "Search index resync completed");
        Ok(total)
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Consume the change feed until shutdown.
///
/// A poll in progress is allowed to finish so nothing delivered is left
/// unacknowledged; shutdown is observed between polls and during backoff.
pub async fn index_sync_task(
    sync: Arc<IndexSynchronizer>,
    source: Arc<dyn ChangeEventSource>,
    config: IndexSyncConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<IndexSyncMetrics> {
    tracing::info!(
        batch_size = config.batch_size,
        block_ms = config.block.as_millis() as u64,
        "Index sync task started"
    );

    while !*shutdown_rx.borrow() {
        match source.poll(config.batch_size, config.block).await {
            Ok(deliveries) if deliveries.is_empty() => {}
            Ok(deliveries) => {
                for delivery in &deliveries {
                    sync.handle_delivery(delivery).await;
                }
                let ids: Vec<String> = deliveries.into_iter().map(|d| d.id).collect();
                if let Err(e) = source.ack(&ids).await {
                    tracing::error!(error = %e, count = ids.len(), "Failed to acknowledge change events");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to poll change feed");
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = tokio::time::sleep(config.error_backoff) => {}
                }
            }
        }
    }
    tracing::info!("Index sync task shutting down");

    let metrics = sync.metrics();
    let snapshot = metrics.snapshot();
    tracing::info!(
        events_processed = snapshot.events_processed,
        events_skipped = snapshot.events_skipped,
        malformed_events = snapshot.malformed_events,
        index_failures = snapshot.index_failures,
        "Index sync task completed"
    );

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use blossom_core::Topic;
    use blossom_storage::{InMemoryChangeFeed, InMemoryRecordStore, InMemorySearchIndex};
    use serde_json::{json, Value};

    struct Fixture {
        sync: IndexSynchronizer,
        records: Arc<InMemoryRecordStore>,
        index: Arc<InMemorySearchIndex>,
    }

    fn fixture() -> Fixture {
        let records = Arc::new(InMemoryRecordStore::new());
        let index = Arc::new(InMemorySearchIndex::new());
        Fixture {
            sync: IndexSynchronizer::new(records.clone(), index.clone()),
            records,
            index,
        }
    }

    fn event(kind: &str, table: &str, data: Value) -> ChangeEvent {
        ChangeEvent::from_slice(
            json!({
                "type": kind,
                "database": "forum",
                "table": table,
                "data": data,
                "isDdl": false,
                "es": 1_714_000_000_000i64,
                "ts": 1_714_000_000_050i64
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap()
    }

    fn topic_row(id: i64, title: &str) -> Value {
        json!({
            "id": id.to_string(),
            "user_id": 7,
            "title": title,
            "content": "row image content",
            "category": "tech",
            "view_count": "12",
            "comment_count": 1.0,
            "created_at": "2024-04-25 08:00:00",
            "updated_at": "2024-04-25 09:00:00"
        })
    }

    async fn seed_topic(records: &InMemoryRecordStore, id: EntityId) {
        let now = Utc::now();
        records
            .topic_insert(&Topic {
                id,
                user_id: 7,
                username: String::new(),
                title: format!("Topic {}", id),
                content: "stored content".to_string(),
                category: "tech".to_string(),
                like_count: 0,
                dislike_count: 0,
                comment_count: 0,
                view_count: 0,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_config_default() {
        let config = IndexSyncConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.block, Duration::from_millis(2000));
        assert_eq!(config.error_backoff, Duration::from_millis(1000));
        assert_eq!(IndexSyncConfig::production(), config);
        assert_eq!(IndexSyncConfig::development().batch_size, 10);
    }

    #[tokio::test]
    async fn test_insert_then_redelivery_is_idempotent() {
        let f = fixture();
        let ev = event("INSERT", "topics", json!([topic_row(1, "First"), topic_row(2, "Second")]));

        assert_eq!(f.sync.handle_event(&ev).await, SyncOutcome::Indexed(2));
        assert_eq!(f.sync.handle_event(&ev).await, SyncOutcome::Indexed(2));
        assert_eq!(f.index.len(), 2);

        let doc = f.index.get(1).await.unwrap().unwrap();
        assert_eq!(doc.user_id, "7");
        assert_eq!(doc.view_count, 12);
        assert_eq!(doc.comment_count, 1);
        assert_eq!(doc.updated_at, "2024-04-25 09:00:00");
    }

    #[tokio::test]
    async fn test_update_overwrites_document() {
        let f = fixture();
        f.sync
            .handle_event(&event("INSERT", "topics", json!([topic_row(1, "Old")])))
            .await;
        f.sync
            .handle_event(&event("UPDATE", "topics", json!([topic_row(1, "New")])))
            .await;
        assert_eq!(f.index.get(1).await.unwrap().unwrap().title, "New");
    }

    #[tokio::test]
    async fn test_delete_of_unindexed_topic_succeeds() {
        let f = fixture();
        f.sync
            .handle_event(&event("INSERT", "topics", json!([topic_row(1, "Gone soon")])))
            .await;

        let ev = event("DELETE", "topics", json!([{"id": "1"}, {"id": "99"}]));
        assert_eq!(f.sync.handle_event(&ev).await, SyncOutcome::Deleted(1));
        assert!(f.index.is_empty());
        assert_eq!(f.sync.metrics().snapshot().index_failures, 0);
    }

    #[tokio::test]
    async fn test_comment_events_recount_from_store() {
        let f = fixture();
        seed_topic(&f.records, 1).await;
        f.sync
            .handle_event(&event("INSERT", "topics", json!([topic_row(1, "Counted")])))
            .await;

        let now = Utc::now();
        for id in 100..103 {
            f.records
                .comment_insert(&blossom_core::Comment {
                    id,
                    topic_id: 1,
                    user_id: 7,
                    username: String::new(),
                    content: "hi".to_string(),
                    parent_id: None,
                    created_at: now,
                    updated_at: now,
                })
                .await
                .unwrap();
        }

        // The payload claims nothing about the count; it is re-derived.
        let ev = event(
            "INSERT",
            "comments",
            json!([{"id": "100", "topic_id": "1"}, {"id": "101", "topic_id": 1}]),
        );
        assert_eq!(f.sync.handle_event(&ev).await, SyncOutcome::CountsRefreshed(1));
        assert_eq!(f.index.get(1).await.unwrap().unwrap().comment_count, 3);
    }

    #[tokio::test]
    async fn test_skips() {
        let f = fixture();
        let mut ddl = event("ALTER", "topics", json!([]));
        ddl.is_ddl = true;
        assert!(matches!(f.sync.handle_event(&ddl).await, SyncOutcome::Skipped(_)));
        assert!(matches!(
            f.sync.handle_event(&event("INSERT", "users", json!([{"id": 1}]))).await,
            SyncOutcome::Skipped(_)
        ));
        assert!(matches!(
            f.sync
                .handle_delivery(&Delivery::new("1-0", b"not json".to_vec()))
                .await,
            SyncOutcome::Skipped(_)
        ));

        let snapshot = f.sync.metrics().snapshot();
        assert_eq!(snapshot.events_processed, 2);
        assert_eq!(snapshot.events_skipped, 2);
        assert_eq!(snapshot.malformed_events, 1);
    }

    #[tokio::test]
    async fn test_row_failures_are_counted() {
        let f = fixture();
        let ev = event("INSERT", "topics", json!([{"title": "no id"}, topic_row(2, "Fine")]));
        assert_eq!(f.sync.handle_event(&ev).await, SyncOutcome::Indexed(1));

        f.index.set_fail_writes(true);
        assert_eq!(f.sync.handle_event(&ev).await, SyncOutcome::Indexed(0));
        assert_eq!(f.sync.metrics().snapshot().index_failures, 3);
    }

    #[tokio::test]
    async fn test_resync_all_pages_through_store() {
        let f = fixture();
        for id in 1..=(RESYNC_BATCH_SIZE as i64 + 3) {
            seed_topic(&f.records, id).await;
        }
        let total = f.sync.resync_all().await.unwrap();
        assert_eq!(total, RESYNC_BATCH_SIZE + 3);
        assert_eq!(f.index.len(), RESYNC_BATCH_SIZE + 3);
    }

    #[tokio::test]
    async fn test_task_consumes_and_acks() {
        let f = fixture();
        let index = f.index.clone();
        let sync = Arc::new(f.sync);
        let feed = Arc::new(InMemoryChangeFeed::new());
        feed.publish_event(&event("INSERT", "topics", json!([topic_row(1, "Streamed")])))
            .unwrap();
        feed.publish(b"garbage".to_vec()).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = IndexSyncConfig {
            batch_size: 10,
            block: Duration::from_millis(20),
            error_backoff: Duration::from_millis(20),
        };
        let handle = tokio::spawn(index_sync_task(sync, feed.clone(), config, shutdown_rx));

        for _ in 0..100 {
            if feed.queued_count() == 0 && feed.pending_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(feed.pending_count(), 0);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_processed, 1);
        assert_eq!(snapshot.malformed_events, 1);
    }
}
