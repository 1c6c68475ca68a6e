//! Operator-triggered maintenance.

use crate::error::ApiResult;
use crate::jobs::IndexSynchronizer;
use std::sync::Arc;

#[derive(Clone)]
pub struct AdminService {
    sync: Arc<IndexSynchronizer>,
}

impl AdminService {
    pub fn new(sync: Arc<IndexSynchronizer>) -> Self {
        Self { sync }
    }

    /// Rebuild the search index from the store of record. Returns the
    /// number of documents written.
    pub async fn resync_search_index(&self) -> ApiResult<usize> {
        tracing::info!("Full search index resync requested");
        let total = self.sync.resync_all().await.map_err(|e| {
            tracing::error!(error = %e, "Search index resync failed");
            e
        })?;
        Ok(total)
    }
}
