//! Service layer: the operations the HTTP layer calls.
//!
//! Each service owns the collaborators it needs. Synchronous steps (id
//! generation, lock acquisition, store-of-record reads and writes) return
//! their errors; cache maintenance and counter updates go to the background
//! pool and never fail the call.

pub mod admin;
pub mod comment;
pub mod search;
pub mod topic;

pub use admin::AdminService;
pub use comment::CommentService;
pub use search::SearchService;
pub use topic::{TopicService, VoteOutcome};

use crate::error::ApiError;
use crate::telemetry::with_metrics;
use blossom_core::{BlossomError, EntityId, ErrorKind};
use blossom_storage::CacheKind;

/// Report a contended lock as a conflict on `operation` of `resource_id`;
/// every other error converts normally.
fn lock_aware(operation: &'static str, resource_id: EntityId) -> impl FnOnce(BlossomError) -> ApiError {
    move |err| {
        if err.kind() == ErrorKind::LockContended {
            tracing::debug!(operation, resource_id, "Lock contended");
            ApiError::lock_conflict(operation, resource_id)
        } else {
            err.into()
        }
    }
}

fn record_cache_lookup(kind: CacheKind, outcome: &str) {
    with_metrics(|m| m.record_cache_lookup(kind.as_str(), outcome));
}
