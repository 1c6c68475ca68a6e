//! Change-event source: an at-least-once feed of row-change messages.
//!
//! A delivery stays pending until it is acknowledged. Consumers acknowledge
//! only after the event was handled, so a crash replays it.

use async_trait::async_trait;
use blossom_core::{ChangeEvent, EventError};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

pub type EventResult<T> = Result<T, EventError>;

/// One message as delivered by the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Feed-assigned id used for acknowledgement.
    pub id: String,
    /// Raw flat-message JSON.
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }
}

/// Consumer side of the change feed.
#[async_trait]
pub trait ChangeEventSource: Send + Sync {
    /// Wait up to `block` for at most `max` new deliveries.
    ///
    /// An empty vector means nothing arrived in time.
    async fn poll(&self, max: usize, block: Duration) -> EventResult<Vec<Delivery>>;

    /// Acknowledge handled deliveries.
    async fn ack(&self, ids: &[String]) -> EventResult<()>;
}

// ============================================================================
// IN-MEMORY FEED
// ============================================================================

#[derive(Debug, Default)]
struct FeedState {
    queue: VecDeque<Delivery>,
    pending: BTreeMap<u64, Delivery>,
}

/// In-process feed with pending-until-acked semantics.
#[derive(Debug, Default)]
pub struct InMemoryChangeFeed {
    state: Mutex<FeedState>,
    next_id: AtomicU64,
    notify: Notify,
    unavailable: AtomicBool,
}

impl InMemoryChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `poll` with `SourceUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Append a raw payload and return its delivery id.
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> EventResult<String> {
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}-0", seq);
        self.state()?.queue.push_back(Delivery::new(id.clone(), payload));
        self.notify.notify_one();
        Ok(id)
    }

    /// Serialize and append an event.
    pub fn publish_event(&self, event: &ChangeEvent) -> EventResult<String> {
        let payload = serde_json::to_vec(event).map_err(|e| EventError::Malformed {
            reason: e.to_string(),
        })?;
        self.publish(payload)
    }

    /// Move every unacknowledged delivery back to the front of the queue,
    /// as a restarted consumer would see them.
    pub fn redeliver_pending(&self) -> EventResult<usize> {
        let mut state = self.state()?;
        let pending = std::mem::take(&mut state.pending);
        let count = pending.len();
        for delivery in pending.into_values().rev() {
            state.queue.push_front(delivery);
        }
        drop(state);
        if count > 0 {
            self.notify.notify_one();
        }
        Ok(count)
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn queued_count(&self) -> usize {
        self.state.lock().map(|s| s.queue.len()).unwrap_or(0)
    }

    fn state(&self) -> EventResult<MutexGuard<'_, FeedState>> {
        self.state.lock().map_err(|_| EventError::SourceUnavailable {
            reason: "feed lock poisoned".to_string(),
        })
    }

    fn take(&self, max: usize) -> EventResult<Vec<Delivery>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EventError::SourceUnavailable {
                reason: "in-memory feed marked unavailable".to_string(),
            });
        }
        let mut state = self.state()?;
        let n = max.min(state.queue.len());
        let batch: Vec<Delivery> = state.queue.drain(..n).collect();
        for delivery in &batch {
            if let Some(seq) = sequence_of(&delivery.id) {
                state.pending.insert(seq, delivery.clone());
            }
        }
        Ok(batch)
    }
}

fn sequence_of(id: &str) -> Option<u64> {
    id.split('-').next().and_then(|s| s.parse().ok())
}

#[async_trait]
impl ChangeEventSource for InMemoryChangeFeed {
    async fn poll(&self, max: usize, block: Duration) -> EventResult<Vec<Delivery>> {
        let batch = self.take(max)?;
        if !batch.is_empty() || block.is_zero() {
            return Ok(batch);
        }
        // Nothing queued; wait for a publish or the block timeout.
        let _ = tokio::time::timeout(block, self.notify.notified()).await;
        self.take(max)
    }

    async fn ack(&self, ids: &[String]) -> EventResult<()> {
        let mut state = self.state()?;
        for id in ids {
            let seq = sequence_of(id).ok_or_else(|| EventError::AckFailed {
                delivery_id: id.clone(),
                reason: "unknown delivery id".to_string(),
            })?;
            state.pending.remove(&seq);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_poll_ack() {
        let feed = InMemoryChangeFeed::new();
        feed.publish(b"a".to_vec()).unwrap();
        feed.publish(b"b".to_vec()).unwrap();
        feed.publish(b"c".to_vec()).unwrap();

        let batch = feed.poll(2, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].payload, b"a");
        assert_eq!(feed.pending_count(), 2);
        assert_eq!(feed.queued_count(), 1);

        feed.ack(&[batch[0].id.clone()]).await.unwrap();
        assert_eq!(feed.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_unacked_deliveries_are_redelivered_in_order() {
        let feed = InMemoryChangeFeed::new();
        for p in ["a", "b", "c"] {
            feed.publish(p.as_bytes().to_vec()).unwrap();
        }
        let first = feed.poll(2, Duration::ZERO).await.unwrap();
        feed.ack(&[first[0].id.clone()]).await.unwrap();

        assert_eq!(feed.redeliver_pending().unwrap(), 1);
        let again = feed.poll(10, Duration::ZERO).await.unwrap();
        let payloads: Vec<&[u8]> = again.iter().map(|d| d.payload.as_slice()).collect();
        assert_eq!(payloads, vec![b"b".as_slice(), b"c".as_slice()]);
        assert_eq!(again[0].id, first[1].id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_blocks_until_timeout() {
        let feed = InMemoryChangeFeed::new();
        let batch = feed.poll(10, Duration::from_secs(1)).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_poll_wakes_on_publish() {
        let feed = std::sync::Arc::new(InMemoryChangeFeed::new());
        let publisher = feed.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(b"late".to_vec()).unwrap();
        });
        let batch = feed.poll(10, Duration::from_secs(5)).await.unwrap();
        handle.await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_feed() {
        let feed = InMemoryChangeFeed::new();
        feed.set_unavailable(true);
        let err = feed.poll(1, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, EventError::SourceUnavailable { .. }));
    }
}
