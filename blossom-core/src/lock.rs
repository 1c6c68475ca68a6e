//! Lock keys and ownership tokens.
//!
//! A lock is a coordination-store key whose value is the owner's token. Only
//! the holder of the matching token may delete it; see the storage crate's
//! `LockManager` for the acquire/release protocol.

use crate::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// TTL of the per-user vote lock on a topic.
pub const VOTE_LOCK_TTL: Duration = Duration::from_secs(3);
/// TTL of the per-user comment lock on a topic.
pub const COMMENT_LOCK_TTL: Duration = Duration::from_secs(2);

/// Opaque ownership token, unique per acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(String);

impl LockToken {
    /// A fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LockToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key guarding a user's vote on a topic: `lock:vote:{topic}:{user}`.
pub fn vote_lock_key(topic_id: EntityId, user_id: EntityId) -> String {
    format!("lock:vote:{}:{}", topic_id, user_id)
}

/// Key guarding a user's comment submission: `lock:comment:{topic}:{user}`.
pub fn comment_lock_key(topic_id: EntityId, user_id: EntityId) -> String {
    format!("lock:comment:{}:{}", topic_id, user_id)
}
