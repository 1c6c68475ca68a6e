//! Store of record: the relational source of truth for users, topics,
//! comments and votes.

use async_trait::async_trait;
use blossom_core::{
    BlossomError, BlossomResult, Comment, CommentListQuery, EntityId, EntityKind, StorageError,
    Topic, TopicListQuery, TopicSort, User, Vote, VoteKind,
};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Async access to the store of record.
///
/// Counter adjustments are single atomic `SET col = col + delta` statements
/// and succeed silently when the topic no longer exists.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ========================================================================
    // USER OPERATIONS
    // ========================================================================

    async fn user_insert(&self, user: &User) -> BlossomResult<()>;

    async fn user_get(&self, id: EntityId) -> BlossomResult<Option<User>>;

    // ========================================================================
    // TOPIC OPERATIONS
    // ========================================================================

    async fn topic_insert(&self, topic: &Topic) -> BlossomResult<()>;

    /// Get a topic with its author's username.
    async fn topic_get(&self, id: EntityId) -> BlossomResult<Option<Topic>>;

    /// One page of topics plus the total matching the category filter.
    async fn topic_list(&self, query: &TopicListQuery) -> BlossomResult<(Vec<Topic>, i64)>;

    /// Most recently created topics.
    async fn topic_list_recent(&self, limit: i64) -> BlossomResult<Vec<Topic>>;

    /// Batch fetch. Order is unspecified and missing ids are skipped.
    async fn topic_get_many(&self, ids: &[EntityId]) -> BlossomResult<Vec<Topic>>;

    /// Topics with `id > after`, ascending by id, for full scans.
    async fn topic_scan(&self, after: EntityId, limit: i64) -> BlossomResult<Vec<Topic>>;

    async fn topic_increment_views(&self, id: EntityId) -> BlossomResult<()>;

    /// Add `delta` to the like or dislike counter.
    async fn topic_adjust_votes(
        &self,
        id: EntityId,
        kind: VoteKind,
        delta: i64,
    ) -> BlossomResult<()>;

    async fn topic_adjust_comments(&self, id: EntityId, delta: i64) -> BlossomResult<()>;

    // ========================================================================
    // VOTE OPERATIONS
    // ========================================================================

    async fn vote_get(&self, user_id: EntityId, topic_id: EntityId) -> BlossomResult<Option<Vote>>;

    async fn vote_insert(&self, vote: &Vote) -> BlossomResult<()>;

    async fn vote_update(
        &self,
        user_id: EntityId,
        topic_id: EntityId,
        kind: VoteKind,
    ) -> BlossomResult<()>;

    async fn vote_delete(&self, user_id: EntityId, topic_id: EntityId) -> BlossomResult<()>;

    // ========================================================================
    // COMMENT OPERATIONS
    // ========================================================================

    async fn comment_insert(&self, comment: &Comment) -> BlossomResult<()>;

    async fn comment_get(&self, id: EntityId) -> BlossomResult<Option<Comment>>;

    /// One page of a topic's comments, oldest first, plus the total.
    async fn comment_list_by_topic(
        &self,
        topic_id: EntityId,
        query: &CommentListQuery,
    ) -> BlossomResult<(Vec<Comment>, i64)>;

    /// Delete a comment. A missing comment is `NotFound`.
    async fn comment_delete(&self, id: EntityId) -> BlossomResult<()>;

    async fn comment_count_by_topic(&self, topic_id: EntityId) -> BlossomResult<i64>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// In-memory store of record for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    users: RwLock<HashMap<EntityId, User>>,
    topics: RwLock<HashMap<EntityId, Topic>>,
    comments: RwLock<HashMap<EntityId, Comment>>,
    votes: RwLock<HashMap<(EntityId, EntityId), Vote>>,
    unavailable: AtomicBool,
    fail_counters: AtomicBool,
}

fn read<T>(lock: &RwLock<T>) -> BlossomResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| BlossomError::Storage(StorageError::LockPoisoned))
}

fn write<T>(lock: &RwLock<T>) -> BlossomResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| BlossomError::Storage(StorageError::LockPoisoned))
}

fn already_exists(entity: EntityKind) -> BlossomError {
    BlossomError::Storage(StorageError::InsertFailed {
        entity,
        reason: "already exists".to_string(),
    })
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail only counter adjustments, leaving reads and row writes working.
    pub fn set_fail_counters(&self, fail: bool) {
        self.fail_counters.store(fail, Ordering::SeqCst);
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn vote_count(&self) -> usize {
        self.votes.read().map(|v| v.len()).unwrap_or(0)
    }

    fn check(&self) -> BlossomResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BlossomError::Storage(StorageError::Unavailable {
                reason: "in-memory store marked unavailable".to_string(),
            }));
        }
        Ok(())
    }

    fn check_counters(&self, id: EntityId) -> BlossomResult<()> {
        self.check()?;
        if self.fail_counters.load(Ordering::SeqCst) {
            return Err(BlossomError::Storage(StorageError::UpdateFailed {
                entity: EntityKind::Topic,
                id,
                reason: "counter update rejected".to_string(),
            }));
        }
        Ok(())
    }

    fn username(&self, user_id: EntityId) -> BlossomResult<String> {
        Ok(read(&self.users)?
            .get(&user_id)
            .map(|u| u.username.clone())
            .unwrap_or_default())
    }

    fn with_topic_author(&self, mut topic: Topic) -> BlossomResult<Topic> {
        topic.username = self.username(topic.user_id)?;
        Ok(topic)
    }

    fn with_comment_author(&self, mut comment: Comment) -> BlossomResult<Comment> {
        comment.username = self.username(comment.user_id)?;
        Ok(comment)
    }

    fn adjust_topic(&self, id: EntityId, apply: impl FnOnce(&mut Topic)) -> BlossomResult<()> {
        self.check_counters(id)?;
        if let Some(topic) = write(&self.topics)?.get_mut(&id) {
            apply(topic);
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn user_insert(&self, user: &User) -> BlossomResult<()> {
        self.check()?;
        let mut users = write(&self.users)?;
        if users.contains_key(&user.id) {
            return Err(already_exists(EntityKind::User));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn user_get(&self, id: EntityId) -> BlossomResult<Option<User>> {
        self.check()?;
        Ok(read(&self.users)?.get(&id).cloned())
    }

    async fn topic_insert(&self, topic: &Topic) -> BlossomResult<()> {
        self.check()?;
        let mut topics = write(&self.topics)?;
        if topics.contains_key(&topic.id) {
            return Err(already_exists(EntityKind::Topic));
        }
        topics.insert(topic.id, topic.clone());
        Ok(())
    }

    async fn topic_get(&self, id: EntityId) -> BlossomResult<Option<Topic>> {
        self.check()?;
        let topic = read(&self.topics)?.get(&id).cloned();
        topic.map(|t| self.with_topic_author(t)).transpose()
    }

    async fn topic_list(&self, query: &TopicListQuery) -> BlossomResult<(Vec<Topic>, i64)> {
        self.check()?;
        let mut matching: Vec<Topic> = read(&self.topics)?
            .values()
            .filter(|t| {
                query
                    .category
                    .as_deref()
                    .map_or(true, |c| t.category == c)
            })
            .cloned()
            .collect();

        match query.sort {
            TopicSort::New => matching.sort_by_key(|t| (Reverse(t.created_at), Reverse(t.id))),
            TopicSort::Like => matching.sort_by_key(|t| (Reverse(t.like_count), Reverse(t.id))),
            TopicSort::Hot => matching.sort_by_key(|t| (Reverse(t.list_heat()), Reverse(t.id))),
        }

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(query.page_size.max(0) as usize)
            .map(|t| self.with_topic_author(t))
            .collect::<BlossomResult<Vec<_>>>()?;
        Ok((page, total))
    }

    async fn topic_list_recent(&self, limit: i64) -> BlossomResult<Vec<Topic>> {
        self.check()?;
        let mut topics: Vec<Topic> = read(&self.topics)?.values().cloned().collect();
        topics.sort_by_key(|t| (Reverse(t.created_at), Reverse(t.id)));
        topics
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|t| self.with_topic_author(t))
            .collect()
    }

    async fn topic_get_many(&self, ids: &[EntityId]) -> BlossomResult<Vec<Topic>> {
        self.check()?;
        let found: Vec<Topic> = {
            let topics = read(&self.topics)?;
            ids.iter().filter_map(|id| topics.get(id).cloned()).collect()
        };
        found
            .into_iter()
            .map(|t| self.with_topic_author(t))
            .collect()
    }

    async fn topic_scan(&self, after: EntityId, limit: i64) -> BlossomResult<Vec<Topic>> {
        self.check()?;
        let mut topics: Vec<Topic> = read(&self.topics)?
            .values()
            .filter(|t| t.id > after)
            .cloned()
            .collect();
        topics.sort_by_key(|t| t.id);
        topics
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|t| self.with_topic_author(t))
            .collect()
    }

    async fn topic_increment_views(&self, id: EntityId) -> BlossomResult<()> {
        self.adjust_topic(id, |t| t.view_count += 1)
    }

    async fn topic_adjust_votes(
        &self,
        id: EntityId,
        kind: VoteKind,
        delta: i64,
    ) -> BlossomResult<()> {
        self.adjust_topic(id, |t| match kind {
            VoteKind::Like => t.like_count += delta,
            VoteKind::Dislike => t.dislike_count += delta,
        })
    }

    async fn topic_adjust_comments(&self, id: EntityId, delta: i64) -> BlossomResult<()> {
        self.adjust_topic(id, |t| t.comment_count += delta)
    }

    async fn vote_get(&self, user_id: EntityId, topic_id: EntityId) -> BlossomResult<Option<Vote>> {
        self.check()?;
        Ok(read(&self.votes)?.get(&(user_id, topic_id)).cloned())
    }

    async fn vote_insert(&self, vote: &Vote) -> BlossomResult<()> {
        self.check()?;
        let mut votes = write(&self.votes)?;
        let key = (vote.user_id, vote.topic_id);
        if votes.contains_key(&key) {
            return Err(BlossomError::Storage(StorageError::InsertFailed {
                entity: EntityKind::Vote,
                reason: format!(
                    "duplicate vote by user {} on topic {}",
                    vote.user_id, vote.topic_id
                ),
            }));
        }
        votes.insert(key, vote.clone());
        Ok(())
    }

    async fn vote_update(
        &self,
        user_id: EntityId,
        topic_id: EntityId,
        kind: VoteKind,
    ) -> BlossomResult<()> {
        self.check()?;
        if let Some(vote) = write(&self.votes)?.get_mut(&(user_id, topic_id)) {
            vote.kind = kind;
        }
        Ok(())
    }

    async fn vote_delete(&self, user_id: EntityId, topic_id: EntityId) -> BlossomResult<()> {
        self.check()?;
        write(&self.votes)?.remove(&(user_id, topic_id));
        Ok(())
    }

    async fn comment_insert(&self, comment: &Comment) -> BlossomResult<()> {
        self.check()?;
        let mut comments = write(&self.comments)?;
        if comments.contains_key(&comment.id) {
            return Err(already_exists(EntityKind::Comment));
        }
        comments.insert(comment.id, comment.clone());
        Ok(())
    }

    async fn comment_get(&self, id: EntityId) -> BlossomResult<Option<Comment>> {
        self.check()?;
        let comment = read(&self.comments)?.get(&id).cloned();
        comment.map(|c| self.with_comment_author(c)).transpose()
    }

    async fn comment_list_by_topic(
        &self,
        topic_id: EntityId,
        query: &CommentListQuery,
    ) -> BlossomResult<(Vec<Comment>, i64)> {
        self.check()?;
        let mut matching: Vec<Comment> = read(&self.comments)?
            .values()
            .filter(|c| c.topic_id == topic_id)
            .cloned()
            .collect();
        matching.sort_by_key(|c| (c.created_at, c.id));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(query.page_size.max(0) as usize)
            .map(|c| self.with_comment_author(c))
            .collect::<BlossomResult<Vec<_>>>()?;
        Ok((page, total))
    }

    async fn comment_delete(&self, id: EntityId) -> BlossomResult<()> {
        self.check()?;
        match write(&self.comments)?.remove(&id) {
            Some(_) => Ok(()),
            None => Err(BlossomError::not_found(EntityKind::Comment, id)),
        }
    }

    async fn comment_count_by_topic(&self, topic_id: EntityId) -> BlossomResult<i64> {
        self.check()?;
        Ok(read(&self.comments)?
            .values()
            .filter(|c| c.topic_id == topic_id)
            .count() as i64)
    }
}
