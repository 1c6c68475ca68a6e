//! Background Jobs
//!
//! Long-running tasks spawned at startup:
//!
//! - `hot_ranking`: periodically rewrites the bounded hot ranking
//! - `index_sync`: replays change events into the search index
//!
//! # Usage
//!
//! ```ignore
//! use blossom_api::jobs::{hot_ranking_task, HotRankingConfig};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(hot_ranking_task(job, HotRankingConfig::default(), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

pub mod hot_ranking;
pub mod index_sync;

pub use hot_ranking::{
    hot_ranking_task, HotRankingConfig, HotRankingJob, HotRankingMetrics, HotRankingSnapshot,
};
pub use index_sync::{
    index_sync_task, IndexSyncConfig, IndexSyncMetrics, IndexSyncSnapshot, IndexSynchronizer,
    SyncOutcome,
};
