//! Redis-backed coordination store.
//!
//! One multiplexed [`ConnectionManager`] is shared by every clone; it
//! reconnects on its own after a dropped connection.

use crate::config::RedisConfig;
use crate::constants::SCAN_BATCH_SIZE;
use crate::error::ApiResult;
use async_trait::async_trait;
use blossom_core::CoordinationError;
use blossom_storage::{CoordinationResult, CoordinationStore};
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use std::time::Duration;

/// Deletes the key only while it still holds the caller's token.
const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

/// Coordination store over a Redis server.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    conn: ConnectionManager,
    compare_and_delete: Script,
}

impl RedisCoordinationStore {
    /// Connect and verify the server answers.
    pub async fn connect(config: &RedisConfig) -> ApiResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        let store = Self::new(conn);
        let mut conn = store.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        tracing::info!(url = %redact(&config.url), "Connected to coordination store");
        Ok(store)
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            compare_and_delete: Script::new(COMPARE_AND_DELETE_SCRIPT),
        }
    }

    /// Connection handle for ad-hoc commands. Never block on it.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

/// Strip credentials from a connection URL before logging it.
pub(crate) fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

pub(crate) fn coordination_error(command: &str, err: RedisError) -> CoordinationError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        CoordinationError::Unavailable {
            reason: err.to_string(),
        }
    } else {
        CoordinationError::CommandFailed {
            command: command.to_string(),
            reason: err.to_string(),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CoordinationResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| coordination_error("SET", e))?;
        Ok(reply.is_some())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CoordinationResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| coordination_error("SET", e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> CoordinationResult<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| coordination_error("GET", e))
    }

    async fn delete(&self, keys: &[String]) -> CoordinationResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| coordination_error("DEL", e))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> CoordinationResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| coordination_error("EVALSHA", e))?;
        Ok(removed == 1)
    }

    async fn delete_by_pattern(&self, pattern: &str) -> CoordinationResult<u64> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH_SIZE)
                .query_async(&mut conn)
                .await
                .map_err(|e| coordination_error("SCAN", e))?;

            if !keys.is_empty() {
                let deleted: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| coordination_error("DEL", e))?;
                removed += deleted;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(removed)
    }

    async fn sorted_set_add(&self, key: &str, members: &[(String, f64)]) -> CoordinationResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for (member, score) in members {
            pipe.cmd("ZADD").arg(key).arg(*score).arg(member).ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| coordination_error("ZADD", e))?;
        Ok(())
    }

    async fn sorted_set_trim_top(&self, key: &str, keep: usize) -> CoordinationResult<u64> {
        let mut conn = self.conn.clone();
        let stop = -(keep as i64) - 1;
        redis::cmd("ZREMRANGEBYRANK")
            .arg(key)
            .arg(0)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(|e| coordination_error("ZREMRANGEBYRANK", e))
    }

    async fn sorted_set_rev_range(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> CoordinationResult<Vec<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(|e| coordination_error("ZREVRANGE", e))
    }

    async fn sorted_set_len(&self, key: &str) -> CoordinationResult<u64> {
        let mut conn = self.conn.clone();
        redis::cmd("ZCARD")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| coordination_error("ZCARD", e))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CoordinationResult<bool> {
        let mut conn = self.conn.clone();
        let updated: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| coordination_error("PEXPIRE", e))?;
        Ok(updated == 1)
    }

    async fn exists(&self, key: &str) -> CoordinationResult<bool> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| coordination_error("EXISTS", e))?;
        Ok(count > 0)
    }
}
