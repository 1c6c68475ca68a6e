//! Distributed mutual-exclusion lock over the coordination store.
//!
//! Acquire is one atomic "set if absent, with expiry" of a fresh token.
//! Release is one atomic compare-and-delete, so a caller can never remove a
//! lock it does not own, including after its own lock expired and someone
//! else took it. The TTL is the only timeout: pick one longer than the
//! guarded section.

use crate::coordination::CoordinationStore;
use blossom_core::{LockError, LockToken};
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Hands out lock guards backed by a shared coordination store.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn CoordinationStore>,
}

impl LockManager {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Try once to take `key` for `ttl`.
    ///
    /// Losing the race is `LockError::Contended`; a store failure is
    /// `LockError::Store`.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockGuard, LockError> {
        let token = LockToken::generate();
        let acquired = self.store.set_if_absent(key, token.as_str(), ttl).await?;
        if !acquired {
            return Err(LockError::Contended {
                key: key.to_string(),
            });
        }
        tracing::debug!(key, ttl_ms = ttl.as_millis() as u64, "Lock acquired");
        Ok(LockGuard {
            manager: self.clone(),
            key: key.to_string(),
            token,
            armed: true,
        })
    }

    /// Acquire with up to `attempts` tries, sleeping `delay` between them.
    ///
    /// Store errors end the loop immediately.
    pub async fn try_lock(
        &self,
        key: &str,
        ttl: Duration,
        attempts: u32,
        delay: Duration,
    ) -> Result<LockGuard, LockError> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            match self.acquire(key, ttl).await {
                Ok(guard) => return Ok(guard),
                Err(LockError::Contended { .. }) if attempt < attempts => {
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(LockError::Contended {
            key: key.to_string(),
        })
    }

    /// Delete `key` if and only if it still holds `token`.
    ///
    /// An absent key or a foreign token is `LockError::NotHeld`.
    pub async fn release(&self, key: &str, token: &LockToken) -> Result<(), LockError> {
        if self.store.compare_and_delete(key, token.as_str()).await? {
            tracing::debug!(key, "Lock released");
            Ok(())
        } else {
            Err(LockError::NotHeld {
                key: key.to_string(),
            })
        }
    }

    /// Run `body` while holding `key`.
    ///
    /// The lock is released on every exit path of `body`: success, error or
    /// panic. Release failures are logged and never replace the body's
    /// outcome. A panic is re-raised after the release.
    pub async fn with_lock<T, E, F, Fut>(&self, key: &str, ttl: Duration, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let guard = self.acquire(key, ttl).await?;
        let outcome = AssertUnwindSafe(body()).catch_unwind().await;

        if let Err(e) = guard.release().await {
            tracing::warn!(key, error = %e, "Failed to release lock");
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// A held lock.
///
/// Call [`LockGuard::release`] to release and observe the outcome. A guard
/// dropped while still held (for example a cancelled request future)
/// schedules a best-effort release on the current runtime; the TTL covers
/// the case where no runtime is available.
#[must_use = "dropping the guard releases the lock in the background"]
pub struct LockGuard {
    manager: LockManager,
    key: String,
    token: LockToken,
    armed: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    pub async fn release(mut self) -> Result<(), LockError> {
        self.armed = false;
        self.manager.release(&self.key, &self.token).await
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("armed", &self.armed)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(key = %self.key, "Lock guard dropped outside a runtime, waiting for TTL");
            return;
        };
        let manager = self.manager.clone();
        let key = std::mem::take(&mut self.key);
        let token = self.token.clone();
        handle.spawn(async move {
            if let Err(e) = manager.release(&key, &token).await {
                tracing::warn!(key = %key, error = %e, "Background lock release failed");
            }
        });
    }
}
