//! Shared application state.
//!
//! Wires the services and jobs around one set of backends. The HTTP layer
//! clones `AppState` into its handlers; every field is cheap to clone.

use std::sync::Arc;

use blossom_core::IdGenerator;
use blossom_storage::{
    CoordinationStore, LockManager, RankingSet, RecordStore, SearchIndex, TopicCache,
};

use crate::background::BackgroundTasks;
use crate::config::BlossomConfig;
use crate::jobs::{HotRankingJob, IndexSynchronizer};
use crate::services::{AdminService, CommentService, SearchService, TopicService};
use crate::throttle::RequestThrottle;

/// The three backends every service reads or writes.
#[derive(Clone)]
pub struct Backends {
    pub records: Arc<dyn RecordStore>,
    pub coordination: Arc<dyn CoordinationStore>,
    pub index: Arc<dyn SearchIndex>,
}

/// Application-wide state.
#[derive(Clone)]
pub struct AppState {
    pub topics: TopicService,
    pub comments: CommentService,
    pub search: SearchService,
    pub admin: AdminService,
    pub throttle: RequestThrottle,
    pub background: BackgroundTasks,
    /// Consumed by `index_sync_task`.
    pub sync: Arc<IndexSynchronizer>,
    /// Consumed by `hot_ranking_task`.
    pub ranking_job: Arc<HotRankingJob>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: &BlossomConfig, ids: Arc<IdGenerator>, backends: Backends) -> Self {
        let Backends {
            records,
            coordination,
            index,
        } = backends;

        let background = BackgroundTasks::new();
        let cache = TopicCache::new(Arc::clone(&coordination), config.cache.clone());
        let locks = LockManager::new(Arc::clone(&coordination));
        let ranking = RankingSet::new(coordination);
        let sync = Arc::new(IndexSynchronizer::new(
            Arc::clone(&records),
            Arc::clone(&index),
        ));
        let ranking_job = Arc::new(HotRankingJob::new(
            Arc::clone(&records),
            ranking.clone(),
            config.hot_ranking.sample_size,
        ));

        Self {
            topics: TopicService::new(
                Arc::clone(&ids),
                Arc::clone(&records),
                cache.clone(),
                locks.clone(),
                ranking,
                background.clone(),
            ),
            comments: CommentService::new(ids, records, cache, locks, background.clone()),
            search: SearchService::new(index),
            admin: AdminService::new(Arc::clone(&sync)),
            throttle: RequestThrottle::new(config.throttle.clone()),
            background,
            sync,
            ranking_job,
            start_time: std::time::Instant::now(),
        }
    }
}
