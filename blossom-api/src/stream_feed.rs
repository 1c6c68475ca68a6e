//! Change feed over a Redis Stream consumer group.
//!
//! The CDC relay appends one entry per flat message with the JSON under the
//! `payload` field. Entries stay in the group's pending list until `XACK`.
//! A restarted consumer reads its own pending list (ID `0` onwards) before
//! asking for new entries with `>`, and on connect claims entries other
//! consumers left idle longer than `claim_idle`.
//!
//! The reader owns a separate connection: a blocking `XREADGROUP` holds its
//! connection for the whole block, which would stall lock and cache traffic
//! on a shared multiplexed one.

use crate::config::{ChangeFeedConfig, RedisConfig};
use crate::constants::{CHANGE_PAYLOAD_FIELD, CLAIM_BATCH_SIZE};
use crate::error::ApiResult;
use crate::redis_store::redact;
use async_trait::async_trait;
use blossom_core::EventError;
use blossom_storage::{ChangeEventSource, Delivery, EventResult};
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Start ID of a pending-list read.
const PENDING_START: &str = "0";
/// Start ID asking the group for never-delivered entries.
const NEW_ENTRIES: &str = ">";
/// XAUTOCLAIM cursor value meaning the scan is complete.
const CLAIM_DONE: &str = "0-0";

/// Where the next read starts.
///
/// Begins at the head of this consumer's pending list and advances past
/// every entry handed out, so entries whose ack failed cannot pin the
/// reader. An empty pending read switches to new entries for good.
#[derive(Debug)]
struct ReadCursor {
    pending_after: Mutex<Option<String>>,
}

impl ReadCursor {
    fn new() -> Self {
        Self {
            pending_after: Mutex::new(Some(PENDING_START.to_string())),
        }
    }

    fn start_id(&self) -> String {
        self.pending_after
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .unwrap_or_else(|| NEW_ENTRIES.to_string())
    }

    fn is_draining(&self) -> bool {
        self.pending_after
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Record the outcome of a read that started at `start`.
    fn advance(&self, start: &str, delivered: &[Delivery]) {
        if start == NEW_ENTRIES {
            return;
        }
        let mut pending = self
            .pending_after
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *pending = delivered.last().map(|d| d.id.clone());
    }
}

/// Consumer-group reader of the change stream.
#[derive(Clone)]
pub struct RedisStreamChangeSource {
    conn: ConnectionManager,
    config: ChangeFeedConfig,
    cursor: Arc<ReadCursor>,
}

impl RedisStreamChangeSource {
    /// Open a dedicated connection, create the consumer group if needed and
    /// claim abandoned entries.
    pub async fn connect(redis: &RedisConfig, config: ChangeFeedConfig) -> ApiResult<Self> {
        let client = redis::Client::open(redis.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        let source = Self::with_connection(conn, config);
        source.ensure_group().await?;
        source.claim_abandoned().await;
        tracing::info!(
            url = %redact(&redis.url),
            stream = %source.config.stream,
            consumer = %source.config.consumer,
            "Change feed reader connected"
        );
        Ok(source)
    }

    /// Wrap a connection the caller does not use for anything else.
    pub fn with_connection(conn: ConnectionManager, config: ChangeFeedConfig) -> Self {
        Self {
            conn,
            config,
            cursor: Arc::new(ReadCursor::new()),
        }
    }

    pub fn config(&self) -> &ChangeFeedConfig {
        &self.config
    }

    async fn ensure_group(&self) -> ApiResult<()> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.config.stream, &self.config.group, "$")
            .await;
        match created {
            Ok(()) => {
                tracing::info!(
                    stream = %self.config.stream,
                    group = %self.config.group,
                    "Created change feed consumer group"
                );
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Move idle pending entries of other consumers onto this one. They are
    /// then delivered by the pending-list read. Failures only cost the
    /// takeover, so they are logged and ignored.
    async fn claim_abandoned(&self) {
        let Some(min_idle) = self.config.claim_idle else {
            return;
        };
        let min_idle_ms = u64::try_from(min_idle.as_millis()).unwrap_or(u64::MAX);
        let mut conn = self.conn.clone();
        let mut cursor = PENDING_START.to_string();
        let mut claimed = 0usize;

        loop {
            let reply: redis::RedisResult<redis::Value> = redis::cmd("XAUTOCLAIM")
                .arg(&self.config.stream)
                .arg(&self.config.group)
                .arg(&self.config.consumer)
                .arg(min_idle_ms)
                .arg(&cursor)
                .arg("COUNT")
                .arg(CLAIM_BATCH_SIZE)
                .arg("JUSTID")
                .query_async(&mut conn)
                .await;

            let parsed = match reply {
                Ok(value) => parse_autoclaim(&value),
                Err(e) => {
                    tracing::warn!(error = %e, stream = %self.config.stream, "Failed to claim idle change events");
                    return;
                }
            };
            let Some((next, count)) = parsed else {
                tracing::warn!(stream = %self.config.stream, "Unexpected XAUTOCLAIM reply");
                return;
            };
            claimed += count;
            if next == CLAIM_DONE {
                break;
            }
            cursor = next;
        }

        if claimed > 0 {
            tracing::info!(
                claimed,
                consumer = %self.config.consumer,
                "Claimed idle change events from other consumers"
            );
        }
    }
}

/// `(next cursor, claimed count)` from an `XAUTOCLAIM ... JUSTID` reply.
fn parse_autoclaim(reply: &redis::Value) -> Option<(String, usize)> {
    match reply {
        redis::Value::Array(parts) if parts.len() >= 2 => {
            let cursor: String = redis::from_redis_value(&parts[0]).ok()?;
            match &parts[1] {
                redis::Value::Array(ids) => Some((cursor, ids.len())),
                _ => None,
            }
        }
        _ => None,
    }
}

fn to_delivery(entry: &StreamId) -> Delivery {
    // An entry without a payload still needs acking; it fails parsing later.
    let payload: String = entry.get(CHANGE_PAYLOAD_FIELD).unwrap_or_default();
    Delivery::new(entry.id.clone(), payload.into_bytes())
}

#[async_trait]
impl ChangeEventSource for RedisStreamChangeSource {
    async fn poll(&self, max: usize, block: Duration) -> EventResult<Vec<Delivery>> {
        let mut conn = self.conn.clone();
        let start = self.cursor.start_id();
        let mut options = StreamReadOptions::default()
            .group(&self.config.group, &self.config.consumer)
            .count(max.max(1));
        // Pending reads answer immediately; only new-entry reads block.
        if start == NEW_ENTRIES && !block.is_zero() {
            options = options.block(usize::try_from(block.as_millis()).unwrap_or(usize::MAX));
        }

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.config.stream], &[start.as_str()], &options)
            .await
            .map_err(|e| EventError::SourceUnavailable {
                reason: e.to_string(),
            })?;

        let deliveries: Vec<Delivery> = reply
            .map(|reply| {
                reply
                    .keys
                    .iter()
                    .flat_map(|key| key.ids.iter().map(to_delivery))
                    .collect()
            })
            .unwrap_or_default();

        let was_draining = self.cursor.is_draining();
        self.cursor.advance(&start, &deliveries);
        if was_draining && !deliveries.is_empty() {
            tracing::debug!(count = deliveries.len(), "Redelivering pending change events");
        } else if was_draining {
            tracing::debug!(consumer = %self.config.consumer, "Pending change events drained");
        }
        Ok(deliveries)
    }

    async fn ack(&self, ids: &[String]) -> EventResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: u64 = conn
            .xack(&self.config.stream, &self.config.group, ids)
            .await
            .map_err(|e| EventError::AckFailed {
                delivery_id: ids.join(","),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_delivery_from_entry() {
        let mut map = HashMap::new();
        map.insert(
            "payload".to_string(),
            redis::Value::BulkString(br#"{"type":"INSERT"}"#.to_vec()),
        );
        let entry = StreamId {
            id: "1700000000000-0".to_string(),
            map,
        };
        let delivery = to_delivery(&entry);
        assert_eq!(delivery.id, "1700000000000-0");
        assert_eq!(delivery.payload, br#"{"type":"INSERT"}"#.to_vec());
    }

    #[test]
    fn test_entry_without_payload() {
        let entry = StreamId {
            id: "1-0".to_string(),
            map: HashMap::new(),
        };
        assert!(to_delivery(&entry).payload.is_empty());
    }

    fn delivered(ids: &[&str]) -> Vec<Delivery> {
        ids.iter().map(|id| Delivery::new(id.to_string(), Vec::new())).collect()
    }

    #[test]
    fn test_cursor_reads_pending_before_new() {
        let cursor = ReadCursor::new();
        assert_eq!(cursor.start_id(), "0");
        assert!(cursor.is_draining());

        cursor.advance("0", &delivered(&["5-0", "7-0"]));
        assert_eq!(cursor.start_id(), "7-0");

        // An unacked entry is not read again within the same run.
        cursor.advance("7-0", &delivered(&["9-1"]));
        assert_eq!(cursor.start_id(), "9-1");

        cursor.advance("9-1", &[]);
        assert_eq!(cursor.start_id(), ">");
        assert!(!cursor.is_draining());
    }

    #[test]
    fn test_cursor_stays_on_new_entries() {
        let cursor = ReadCursor::new();
        cursor.advance("0", &[]);
        cursor.advance(">", &delivered(&["11-0"]));
        assert_eq!(cursor.start_id(), ">");
    }

    #[test]
    fn test_parse_autoclaim_reply() {
        let bulk = |s: &str| redis::Value::BulkString(s.as_bytes().to_vec());
        let reply = redis::Value::Array(vec![
            bulk("0-0"),
            redis::Value::Array(vec![bulk("1-0"), bulk("2-0")]),
            redis::Value::Array(vec![]),
        ]);
        assert_eq!(parse_autoclaim(&reply), Some(("0-0".to_string(), 2)));

        let partial = redis::Value::Array(vec![bulk("3-0"), redis::Value::Array(vec![])]);
        assert_eq!(parse_autoclaim(&partial), Some(("3-0".to_string(), 0)));

        assert_eq!(parse_autoclaim(&redis::Value::Nil), None);
        assert_eq!(parse_autoclaim(&redis::Value::Array(vec![bulk("0-0")])), None);
    }
}
