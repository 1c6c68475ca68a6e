//! Hot Ranking Refresh Task
//!
//! Periodically recomputes the time-decayed score of the most recent topics
//! and rewrites the bounded `hot_ranking` sorted set that `hot_topics` reads.
//! The first refresh runs as soon as the task starts so the ranking exists
//! before the first period elapses.
//!
//! A failed refresh leaves the previous ranking in place until it expires;
//! readers fall back to ranking a recent sample directly.

use crate::constants::{DEFAULT_RANKING_REFRESH_SECS, DEFAULT_RANKING_SAMPLE_SIZE};
use crate::telemetry::with_metrics;
use blossom_core::{topic_hot_score, BlossomResult, EntityId};
use blossom_storage::{RankingSet, RecordStore};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotRankingConfig {
    /// Time between refreshes (default: 5 minutes)
    pub refresh_interval: Duration,

    /// Number of most recent topics scored per refresh (default: 1000)
    pub sample_size: usize,
}

impl Default for HotRankingConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(DEFAULT_RANKING_REFRESH_SECS),
            sample_size: DEFAULT_RANKING_SAMPLE_SIZE,
        }
    }
}

impl HotRankingConfig {
    /// # Environment Variables
    /// - `BLOSSOM_RANKING_REFRESH_SECS`: Refresh period (default: 300)
    /// - `BLOSSOM_RANKING_SAMPLE_SIZE`: Topics scored per refresh (default: 1000)
    pub fn from_env() -> Self {
        let refresh_interval = Duration::from_secs(
            std::env::var("BLOSSOM_RANKING_REFRESH_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_RANKING_REFRESH_SECS),
        );

        let sample_size = std::env::var("BLOSSOM_RANKING_SAMPLE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_RANKING_SAMPLE_SIZE);

        Self {
            refresh_interval,
            sample_size,
        }
    }

    /// Fast refreshes over a small sample, for local stacks.
    pub fn development() -> Self {
        Self {
            refresh_interval: Duration::from_secs(15),
            sample_size: 100,
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
pub struct HotRankingMetrics {
    /// Refreshes that rewrote the ranking
    pub refresh_cycles: AtomicU64,

    /// Topics scored across all refreshes
    pub topics_scored: AtomicU64,

    /// Refreshes that failed to read or write
    pub refresh_failures: AtomicU64,
}

impl HotRankingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HotRankingSnapshot {
        HotRankingSnapshot {
            refresh_cycles: self.refresh_cycles.load(Ordering::Relaxed),
            topics_scored: self.topics_scored.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotRankingSnapshot {
    pub refresh_cycles: u64,
    pub topics_scored: u64,
    pub refresh_failures: u64,
}

// ============================================================================
// JOB
// ============================================================================

/// One ranking recomputation: read recent topics, score, write.
pub struct HotRankingJob {
    records: Arc<dyn RecordStore>,
    ranking: RankingSet,
    sample_size: usize,
}

impl HotRankingJob {
    pub fn new(records: Arc<dyn RecordStore>, ranking: RankingSet, sample_size: usize) -> Self {
        Self {
            records,
            ranking,
            sample_size,
        }
    }

    /// Score the most recent topics and replace the ranking. Returns the
    /// number of topics scored.
    pub async fn refresh(&self) -> BlossomResult<usize> {
        let topics = self.records.topic_list_recent(self.sample_size as i64).await?;
        if topics.is_empty() {
            tracing::debug!("No topics to rank");
            return Ok(0);
        }

        let now = Utc::now();
        let scores: Vec<(EntityId, f64)> = topics
            .iter()
            .map(|t| (t.id, topic_hot_score(t, now)))
            .collect();

        self.ranking.write_scores(&scores).await?;
        Ok(scores.len())
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Refresh the ranking every `refresh_interval` until shutdown.
///
/// Returns the metrics collected over the task's lifetime.
pub async fn hot_ranking_task(
    job: Arc<HotRankingJob>,
    config: HotRankingConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<HotRankingMetrics> {
    let metrics = Arc::new(HotRankingMetrics::new());

    // First tick completes immediately.
    let mut refresh_interval = interval(config.refresh_interval);
    refresh_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        refresh_interval_secs = config.refresh_interval.as_secs(),
        sample_size = config.sample_size,
        "Hot ranking task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Hot ranking task shutting down");
                    break;
                }
            }

            _ = refresh_interval.tick() => {
                refresh_once(&job, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        refresh_cycles = snapshot.refresh_cycles,
        topics_scored = snapshot.topics_scored,
        refresh_failures = snapshot.refresh_failures,
        "Hot ranking task completed"
    );

    metrics
}

async fn refresh_once(job: &HotRankingJob, metrics: &HotRankingMetrics) {
    match job.refresh().await {
        Ok(scored) => {
            metrics.refresh_cycles.fetch_add(1, Ordering::Relaxed);
            metrics
                .topics_scored
                .fetch_add(scored as u64, Ordering::Relaxed);
            with_metrics(|m| m.record_ranking_refresh(true));
            tracing::info!(topics = scored, "Hot ranking refreshed");
        }
        Err(e) => {
            metrics.refresh_failures.fetch_add(1, Ordering::Relaxed);
            with_metrics(|m| m.record_ranking_refresh(false));
            tracing::error!(error = %e, "Hot ranking refresh failed");
        }
    }
}
