//! Fire-and-forget task pool.
//!
//! Cache writes, invalidations and counter increments run here, detached
//! from the request that caused them. A failure is logged, counted and
//! exported as `blossom_background_task_failures_total{task}`; it never
//! reaches the caller. Shutdown drains the pool with a deadline.

use crate::telemetry::with_metrics;
use futures_util::FutureExt;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct PoolState {
    in_flight: AtomicUsize,
    spawned: AtomicU64,
    failures: AtomicU64,
    idle: Notify,
}

/// Shared handle to the background pool. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    state: Arc<PoolState>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` on the runtime without waiting for it.
    ///
    /// `name` labels the failure log and metric.
    pub fn spawn<F, E>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.state.in_flight.fetch_add(1, Ordering::SeqCst);
        self.state.spawned.fetch_add(1, Ordering::Relaxed);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let failure = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("task panicked".to_string()),
            };

            if let Some(error) = failure {
                tracing::warn!(task = name, error = %error, "Background task failed");
                state.failures.fetch_add(1, Ordering::Relaxed);
                with_metrics(|m| m.record_background_failure(name));
            }

            if state.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                state.idle.notify_waiters();
            }
        });
    }

    /// Tasks spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Tasks spawned since construction.
    pub fn spawned(&self) -> u64 {
        self.state.spawned.load(Ordering::Relaxed)
    }

    /// Tasks that returned an error or panicked.
    pub fn failures(&self) -> u64 {
        self.state.failures.load(Ordering::Relaxed)
    }

    /// Wait until no task is in flight.
    pub async fn drain(&self) {
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Drain with a deadline. Returns `false` if tasks were still running
    /// when it passed.
    pub async fn drain_with_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.drain()).await.is_ok()
    }
}
