//! Comment operations.
//!
//! Creating or deleting a comment changes the topic's `comment_count`, so
//! both paths finish with a background counter update followed by topic
//! cache invalidation. The counter update runs first so a cache refill
//! after the invalidation sees the new count.

use super::lock_aware;
use crate::background::BackgroundTasks;
use crate::error::{ApiError, ApiResult};
use blossom_core::{
    comment_lock_key, BlossomError, BlossomResult, Comment, CommentListQuery,
    CreateCommentRequest, EntityId, EntityKind, IdGenerator, Page, ValidationError,
    COMMENT_LOCK_TTL,
};
use blossom_storage::{LockManager, RecordStore, TopicCache};
use chrono::Utc;
use std::sync::Arc;

#[derive(Clone)]
pub struct CommentService {
    ids: Arc<IdGenerator>,
    records: Arc<dyn RecordStore>,
    cache: TopicCache,
    locks: LockManager,
    background: BackgroundTasks,
}

impl CommentService {
    pub fn new(
        ids: Arc<IdGenerator>,
        records: Arc<dyn RecordStore>,
        cache: TopicCache,
        locks: LockManager,
        background: BackgroundTasks,
    ) -> Self {
        Self {
            ids,
            records,
            cache,
            locks,
            background,
        }
    }

    /// Post a comment, optionally as a reply.
    ///
    /// The per-(topic, user) comment lock rejects a duplicate submission
    /// arriving while the first is still being written.
    pub async fn create_comment(
        &self,
        user_id: EntityId,
        topic_id: EntityId,
        req: CreateCommentRequest,
    ) -> ApiResult<Comment> {
        req.validate().map_err(BlossomError::from)?;

        let key = comment_lock_key(topic_id, user_id);
        let comment = self
            .locks
            .with_lock(&key, COMMENT_LOCK_TTL, || self.insert_comment(user_id, topic_id, req))
            .await
            .map_err(lock_aware("comment", topic_id))?;

        tracing::info!(comment_id = comment.id, topic_id, user_id, "Comment created");
        self.sync_comment_count(topic_id, 1, "comment_created");
        Ok(comment)
    }

    async fn insert_comment(
        &self,
        user_id: EntityId,
        topic_id: EntityId,
        req: CreateCommentRequest,
    ) -> BlossomResult<Comment> {
        if self.records.topic_get(topic_id).await?.is_none() {
            return Err(BlossomError::not_found(EntityKind::Topic, topic_id));
        }

        if let Some(parent_id) = req.parent_id {
            let parent = self
                .records
                .comment_get(parent_id)
                .await?
                .ok_or_else(|| BlossomError::not_found(EntityKind::Comment, parent_id))?;
            if parent.topic_id != topic_id {
                return Err(BlossomError::invalid(
                    "parent_id",
                    "parent comment belongs to another topic",
                ));
            }
        }

        let now = Utc::now();
        let comment = Comment {
            id: self.ids.next_id()?,
            topic_id,
            user_id,
            username: String::new(),
            content: req.content,
            parent_id: req.parent_id,
            created_at: now,
            updated_at: now,
        };
        self.records.comment_insert(&comment).await?;
        Ok(comment)
    }

    pub async fn list_comments(
        &self,
        topic_id: EntityId,
        query: CommentListQuery,
    ) -> ApiResult<Page<Comment>> {
        if self.records.topic_get(topic_id).await?.is_none() {
            return Err(ApiError::topic_not_found(topic_id));
        }
        let query = CommentListQuery::new(query.page, query.page_size);
        let (comments, total) = self.records.comment_list_by_topic(topic_id, &query).await?;
        Ok(Page::new(comments, total, query.page, query.page_size))
    }

    /// Delete a comment. Only its author may.
    pub async fn delete_comment(&self, user_id: EntityId, comment_id: EntityId) -> ApiResult<()> {
        let comment = self
            .records
            .comment_get(comment_id)
            .await?
            .ok_or_else(|| ApiError::comment_not_found(comment_id))?;

        if comment.user_id != user_id {
            return Err(BlossomError::from(ValidationError::NotOwner {
                entity: EntityKind::Comment,
                id: comment_id,
                user_id,
            })
            .into());
        }

        self.records.comment_delete(comment_id).await?;
        tracing::info!(comment_id, topic_id = comment.topic_id, user_id, "Comment deleted");
        self.sync_comment_count(comment.topic_id, -1, "comment_deleted");
        Ok(())
    }

    fn sync_comment_count(&self, topic_id: EntityId, delta: i64, task: &'static str) {
        let records = Arc::clone(&self.records);
        let cache = self.cache.clone();
        self.background.spawn(task, async move {
            records.topic_adjust_comments(topic_id, delta).await?;
            cache.invalidate_topic(topic_id).await?;
            Ok::<(), BlossomError>(())
        });
    }
}
