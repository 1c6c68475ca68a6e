//! Coordination store: the shared key-value store behind locks, caches and
//! the ranking set.
//!
//! The trait mirrors the handful of Redis primitives Blossom relies on. Every
//! method is a single round trip and each is atomic on the server side.

use async_trait::async_trait;
use blossom_core::CoordinationError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Result type for coordination store calls.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Key-value, sorted-set and scan primitives of the coordination store.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Atomic "set if absent, with expiry". Returns whether the key was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> CoordinationResult<bool>;

    /// Unconditional set with expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CoordinationResult<()>;

    async fn get(&self, key: &str) -> CoordinationResult<Option<String>>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> CoordinationResult<u64>;

    /// Atomically delete `key` only if its value equals `expected`.
    ///
    /// Returns `false` when the key is absent or holds another value.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> CoordinationResult<bool>;

    /// Scan for keys matching a glob `pattern` and delete them in batches.
    async fn delete_by_pattern(&self, pattern: &str) -> CoordinationResult<u64>;

    /// Add or update members of a sorted set in one batch.
    async fn sorted_set_add(&self, key: &str, members: &[(String, f64)])
        -> CoordinationResult<()>;

    /// Keep only the `keep` highest-scored members. Returns how many were removed.
    async fn sorted_set_trim_top(&self, key: &str, keep: usize) -> CoordinationResult<u64>;

    /// Members by descending score, ranks `start..=stop`.
    async fn sorted_set_rev_range(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> CoordinationResult<Vec<String>>;

    async fn sorted_set_len(&self, key: &str) -> CoordinationResult<u64>;

    /// Set a TTL on an existing key. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> CoordinationResult<bool>;

    async fn exists(&self, key: &str) -> CoordinationResult<bool>;
}

// ============================================================================
// IN-MEMORY IMPLEMENTATION
// ============================================================================

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    SortedSet(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process coordination store with TTL semantics.
///
/// Expiry is lazy and uses `tokio::time`, so paused-clock tests can advance
/// past a TTL deterministically. Glob patterns support a trailing `*` only.
#[derive(Debug, Default)]
pub struct InMemoryCoordinationStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `Unavailable`, as if the server were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remaining TTL of a key, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(key).filter(|e| e.is_live(now))?;
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = match self.entries.lock() {
            Ok(entries) => entries
                .iter()
                .filter(|(_, e)| e.is_live(now))
                .map(|(k, _)| k.clone())
                .collect(),
            Err(_) => Vec::new(),
        };
        keys.sort();
        keys
    }

    fn lock(&self) -> CoordinationResult<MutexGuard<'_, HashMap<String, Entry>>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoordinationError::Unavailable {
                reason: "in-memory store marked unavailable".to_string(),
            });
        }
        let mut entries = self.entries.lock().map_err(|_| CoordinationError::Unavailable {
            reason: "in-memory store lock poisoned".to_string(),
        })?;
        let now = Instant::now();
        entries.retain(|_, e| e.is_live(now));
        Ok(entries)
    }
}

fn matches_pattern(key: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

fn wrong_type(key: &str) -> CoordinationError {
    CoordinationError::CommandFailed {
        command: "WRONGTYPE".to_string(),
        reason: format!("{} holds the wrong kind of value", key),
    }
}

/// Members sorted by descending score, ties by descending member.
fn ranked(set: &HashMap<String, f64>) -> Vec<(&String, f64)> {
    let mut members: Vec<(&String, f64)> = set.iter().map(|(m, s)| (m, *s)).collect();
    members.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(a.0)));
    members
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> CoordinationResult<bool> {
        let mut entries = self.lock()?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CoordinationResult<()> {
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> CoordinationResult<Option<String>> {
        let entries = self.lock()?;
        match entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s.clone())),
            Some(Value::SortedSet(_)) => Err(wrong_type(key)),
        }
    }

    async fn delete(&self, keys: &[String]) -> CoordinationResult<u64> {
        let mut entries = self.lock()?;
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count() as u64)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> CoordinationResult<bool> {
        let mut entries = self.lock()?;
        let matches = matches!(
            entries.get(key).map(|e| &e.value),
            Some(Value::Text(current)) if current == expected
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn delete_by_pattern(&self, pattern: &str) -> CoordinationResult<u64> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|k, _| !matches_pattern(k, pattern));
        Ok((before - entries.len()) as u64)
    }

    async fn sorted_set_add(
        &self,
        key: &str,
        members: &[(String, f64)],
    ) -> CoordinationResult<()> {
        let mut entries = self.lock()?;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::SortedSet(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::SortedSet(set) => {
                for (member, score) in members {
                    set.insert(member.clone(), *score);
                }
                Ok(())
            }
            Value::Text(_) => Err(wrong_type(key)),
        }
    }

    async fn sorted_set_trim_top(&self, key: &str, keep: usize) -> CoordinationResult<u64> {
        let mut entries = self.lock()?;
        let Some(entry) = entries.get_mut(key) else {
            return Ok(0);
        };
        let Value::SortedSet(set) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let doomed: Vec<String> = ranked(set)
            .into_iter()
            .skip(keep)
            .map(|(m, _)| m.clone())
            .collect();
        for member in &doomed {
            set.remove(member);
        }
        if set.is_empty() {
            entries.remove(key);
        }
        Ok(doomed.len() as u64)
    }

    async fn sorted_set_rev_range(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> CoordinationResult<Vec<String>> {
        let entries = self.lock()?;
        match entries.get(key).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::SortedSet(set)) if stop >= start => Ok(ranked(set)
                .into_iter()
                .skip(start)
                .take(stop - start + 1)
                .map(|(m, _)| m.clone())
                .collect()),
            Some(Value::SortedSet(_)) => Ok(Vec::new()),
            Some(Value::Text(_)) => Err(wrong_type(key)),
        }
    }

    async fn sorted_set_len(&self, key: &str) -> CoordinationResult<u64> {
        let entries = self.lock()?;
        match entries.get(key).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::SortedSet(set)) => Ok(set.len() as u64),
            Some(Value::Text(_)) => Err(wrong_type(key)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CoordinationResult<bool> {
        let mut entries = self.lock()?;
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> CoordinationResult<bool> {
        Ok(self.lock()?.contains_key(key))
    }
}
