//! Topic operations: create, cached reads, voting and the hot feed.

use super::{lock_aware, record_cache_lookup};
use crate::background::BackgroundTasks;
use crate::constants::{
    DEFAULT_HOT_LIMIT, HOT_FALLBACK_SAMPLE_CAP, HOT_FALLBACK_SAMPLE_FACTOR, MAX_HOT_LIMIT,
};
use crate::error::{ApiError, ApiResult};
use blossom_core::{
    rank_topics, vote_lock_key, BlossomError, BlossomResult, CreateTopicRequest, EntityId,
    EntityKind, IdGenerator, Page, Topic, TopicListQuery, Vote, VoteKind, VOTE_LOCK_TTL,
};
use blossom_storage::{CacheKind, CachedList, LockManager, RankingSet, RecordStore, TopicCache};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// What a vote did to the caller's existing vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    /// No prior vote; this one was recorded.
    Cast,
    /// Same kind as the prior vote; both are gone.
    Cancelled,
    /// Opposite kind; the prior vote was flipped.
    Switched,
}

#[derive(Clone)]
pub struct TopicService {
    ids: Arc<IdGenerator>,
    records: Arc<dyn RecordStore>,
    cache: TopicCache,
    locks: LockManager,
    ranking: RankingSet,
    background: BackgroundTasks,
}

impl TopicService {
    pub fn new(
        ids: Arc<IdGenerator>,
        records: Arc<dyn RecordStore>,
        cache: TopicCache,
        locks: LockManager,
        ranking: RankingSet,
        background: BackgroundTasks,
    ) -> Self {
        Self {
            ids,
            records,
            cache,
            locks,
            ranking,
            background,
        }
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    pub async fn create_topic(&self, user_id: EntityId, req: CreateTopicRequest) -> ApiResult<Topic> {
        req.validate().map_err(BlossomError::from)?;
        let id = self.ids.next_id().map_err(BlossomError::from)?;
        let username = self
            .records
            .user_get(user_id)
            .await?
            .map(|u| u.username)
            .unwrap_or_default();

        let now = Utc::now();
        let topic = Topic {
            id,
            user_id,
            username,
            title: req.title.trim().to_string(),
            content: req.content,
            category: req.category,
            like_count: 0,
            dislike_count: 0,
            comment_count: 0,
            view_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.records.topic_insert(&topic).await?;
        tracing::info!(topic_id = id, user_id, category = %topic.category, "Topic created");

        let cache = self.cache.clone();
        self.background.spawn("invalidate_topic_lists", async move {
            cache.invalidate_lists().await.map(|_| ())
        });

        Ok(topic)
    }

    /// Toggle the caller's vote on a topic.
    ///
    /// Runs under the per-(topic, user) vote lock; a concurrent vote by the
    /// same user is rejected as a conflict rather than queued.
    pub async fn vote_topic(
        &self,
        user_id: EntityId,
        topic_id: EntityId,
        kind: VoteKind,
    ) -> ApiResult<VoteOutcome> {
        let key = vote_lock_key(topic_id, user_id);
        let outcome = self
            .locks
            .with_lock(&key, VOTE_LOCK_TTL, || self.apply_vote(user_id, topic_id, kind))
            .await
            .map_err(lock_aware("vote", topic_id))?;

        tracing::info!(topic_id, user_id, kind = %kind, outcome = ?outcome, "Vote applied");

        let cache = self.cache.clone();
        self.background.spawn("invalidate_topic", async move {
            cache.invalidate_topic(topic_id).await
        });

        Ok(outcome)
    }

    async fn apply_vote(
        &self,
        user_id: EntityId,
        topic_id: EntityId,
        kind: VoteKind,
    ) -> BlossomResult<VoteOutcome> {
        if self.records.topic_get(topic_id).await?.is_none() {
            return Err(BlossomError::not_found(EntityKind::Topic, topic_id));
        }

        match self.records.vote_get(user_id, topic_id).await? {
            None => {
                let vote = Vote {
                    id: self.ids.next_id()?,
                    user_id,
                    topic_id,
                    kind,
                };
                self.records.vote_insert(&vote).await?;
                self.adjust_votes(topic_id, kind, 1).await;
                Ok(VoteOutcome::Cast)
            }
            Some(existing) if existing.kind == kind => {
                self.records.vote_delete(user_id, topic_id).await?;
                self.adjust_votes(topic_id, kind, -1).await;
                Ok(VoteOutcome::Cancelled)
            }
            Some(existing) => {
                self.records.vote_update(user_id, topic_id, kind).await?;
                self.adjust_votes(topic_id, existing.kind, -1).await;
                self.adjust_votes(topic_id, kind, 1).await;
                Ok(VoteOutcome::Switched)
            }
        }
    }

    /// Counter drift is reconciled by later votes; log and move on.
    async fn adjust_votes(&self, topic_id: EntityId, kind: VoteKind, delta: i64) {
        if let Err(e) = self.records.topic_adjust_votes(topic_id, kind, delta).await {
            tracing::error!(error = %e, topic_id, kind = %kind, delta, "Failed to update vote counter");
        }
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Topic detail through the cache. Every read bumps the view counter in
    /// the background.
    pub async fn get_topic(&self, id: EntityId) -> ApiResult<Topic> {
        match self.cache.get_detail(id).await {
            Ok(Some(topic)) => {
                record_cache_lookup(CacheKind::Detail, "hit");
                self.increment_views(id);
                return Ok(topic);
            }
            Ok(None) => record_cache_lookup(CacheKind::Detail, "miss"),
            Err(e) => {
                tracing::warn!(error = %e, topic_id = id, "Topic cache read failed");
                record_cache_lookup(CacheKind::Detail, "error");
            }
        }

        let topic = self
            .records
            .topic_get(id)
            .await?
            .ok_or_else(|| ApiError::topic_not_found(id))?;

        let cache = self.cache.clone();
        let snapshot = topic.clone();
        self.background.spawn("cache_topic_detail", async move {
            cache.put_detail(&snapshot).await
        });
        self.increment_views(id);

        Ok(topic)
    }

    fn increment_views(&self, id: EntityId) {
        let records = Arc::clone(&self.records);
        self.background.spawn("increment_view_count", async move {
            records.topic_increment_views(id).await
        });
    }

    pub async fn list_topics(&self, query: TopicListQuery) -> ApiResult<Page<Topic>> {
        let query = query.normalized();

        match self.cache.get_list(&query).await {
            Ok(Some(cached)) => {
                record_cache_lookup(CacheKind::List, "hit");
                return Ok(Page::new(cached.topics, cached.total, query.page, query.page_size));
            }
            Ok(None) => record_cache_lookup(CacheKind::List, "miss"),
            Err(e) => {
                tracing::warn!(error = %e, "Topic list cache read failed");
                record_cache_lookup(CacheKind::List, "error");
            }
        }

        let (topics, total) = self.records.topic_list(&query).await?;

        let cache = self.cache.clone();
        let cached = CachedList {
            topics: topics.clone(),
            total,
        };
        let key_query = query.clone();
        self.background.spawn("cache_topic_list", async move {
            cache.put_list(&key_query, &cached).await
        });

        Ok(Page::new(topics, total, query.page, query.page_size))
    }

    /// Trending topics, best first.
    ///
    /// Served from the ranking set when it has members; otherwise a recent
    /// sample is ranked on the spot with the same formula.
    pub async fn hot_topics(&self, limit: i64) -> ApiResult<Vec<Topic>> {
        let limit = if limit <= 0 || limit > MAX_HOT_LIMIT {
            DEFAULT_HOT_LIMIT
        } else {
            limit
        };

        match self.ranking.top_ids(limit as usize).await {
            Ok(ids) if !ids.is_empty() => {
                let ranked = self.fetch_in_order(&ids).await?;
                if !ranked.is_empty() {
                    return Ok(ranked);
                }
                tracing::debug!("Ranked topics no longer exist, falling back");
            }
            Ok(_) => tracing::debug!("Hot ranking is empty, falling back"),
            Err(e) => tracing::warn!(error = %e, "Hot ranking unavailable, falling back"),
        }

        let sample = (limit * HOT_FALLBACK_SAMPLE_FACTOR).min(HOT_FALLBACK_SAMPLE_CAP);
        let recent = self.records.topic_list_recent(sample).await?;
        let mut ranked = rank_topics(recent);
        ranked.truncate(limit as usize);
        Ok(ranked)
    }

    /// Batch-fetch `ids`, keep their order and drop ids that are gone.
    async fn fetch_in_order(&self, ids: &[EntityId]) -> ApiResult<Vec<Topic>> {
        let mut by_id: HashMap<EntityId, Topic> = self
            .records
            .topic_get_many(ids)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}
