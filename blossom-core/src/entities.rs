//! Core entity structures

use crate::identity::{id_string, opt_id_string};
use crate::{EntityId, SearchSort, Timestamp, TopicSort, ValidationError, VoteKind};
use serde::{Deserialize, Serialize};

/// Datetime layout used by the change feed and the search index.
pub const INDEX_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Registered forum member. Credentials live outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(with = "id_string")]
    pub id: EntityId,
    pub username: String,
    pub email: String,
    pub created_at: Timestamp,
}

/// A forum topic with its denormalized counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    #[serde(with = "id_string")]
    pub id: EntityId,
    #[serde(with = "id_string")]
    pub user_id: EntityId,
    /// Author name, joined from `users`. Empty when the author row is gone.
    #[serde(default)]
    pub username: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub like_count: i64,
    pub dislike_count: i64,
    pub comment_count: i64,
    pub view_count: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Topic {
    /// Vote margin used by the ranking formulas.
    pub fn net_votes(&self) -> i64 {
        self.like_count - self.dislike_count
    }

    /// Weight used by the store's `hot` list ordering.
    pub fn list_heat(&self) -> i64 {
        self.like_count * 3 + self.comment_count * 2 + self.view_count
    }
}

/// A comment on a topic, optionally replying to another comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(with = "id_string")]
    pub id: EntityId,
    #[serde(with = "id_string")]
    pub topic_id: EntityId,
    #[serde(with = "id_string")]
    pub user_id: EntityId,
    #[serde(default)]
    pub username: String,
    pub content: String,
    #[serde(with = "opt_id_string", default)]
    pub parent_id: Option<EntityId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// One user's vote on one topic. At most one exists per (user, topic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(with = "id_string")]
    pub id: EntityId,
    #[serde(with = "id_string")]
    pub user_id: EntityId,
    #[serde(with = "id_string")]
    pub topic_id: EntityId,
    pub kind: VoteKind,
}

// ============================================================================
// REQUESTS AND QUERIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTopicRequest {
    pub title: String,
    pub content: String,
    pub category: String,
}

/// Categories a topic may be filed under.
/// Highest page number a list query may ask for.
pub const MAX_PAGE: i64 = 10_000;
/// Elasticsearch's default `index.max_result_window`: `from + size` may not exceed it.
pub const SEARCH_RESULT_WINDOW: i64 = 10_000;

/// Row offset of `page` (1-based). Saturates instead of overflowing.
fn page_offset(page: i64, page_size: i64) -> i64 {
    page.max(1)
        .saturating_sub(1)
        .saturating_mul(page_size.max(0))
}

pub const TOPIC_CATEGORIES: &[&str] = &["tech", "design", "discuss", "share", "product"];

impl CreateTopicRequest {
    pub const TITLE_CHARS: std::ops::RangeInclusive<usize> = 5..=100;
    pub const MIN_CONTENT_CHARS: usize = 10;

    pub fn validate(&self) -> Result<(), ValidationError> {
        let title = self.title.trim().chars().count();
        if !Self::TITLE_CHARS.contains(&title) {
            return Err(ValidationError::InvalidValue {
                field: "title".to_string(),
                reason: format!(
                    "must be {} to {} characters",
                    Self::TITLE_CHARS.start(),
                    Self::TITLE_CHARS.end()
                ),
            });
        }
        if self.content.trim().chars().count() < Self::MIN_CONTENT_CHARS {
            return Err(ValidationError::InvalidValue {
                field: "content".to_string(),
                reason: format!("must be at least {} characters", Self::MIN_CONTENT_CHARS),
            });
        }
        if !TOPIC_CATEGORIES.contains(&self.category.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "category".to_string(),
                reason: format!("must be one of {}", TOPIC_CATEGORIES.join(", ")),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
    #[serde(with = "opt_id_string", default)]
    pub parent_id: Option<EntityId>,
}

impl CreateCommentRequest {
    pub const MAX_CONTENT_CHARS: usize = 1000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        let len = self.content.trim().chars().count();
        if len == 0 || len > Self::MAX_CONTENT_CHARS {
            return Err(ValidationError::InvalidValue {
                field: "content".to_string(),
                reason: format!("must be 1 to {} characters", Self::MAX_CONTENT_CHARS),
            });
        }
        Ok(())
    }
}

/// Parameters of a topic list page. Every field participates in the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicListQuery {
    pub page: i64,
    pub page_size: i64,
    pub sort: TopicSort,
    pub category: Option<String>,
}

impl TopicListQuery {
    pub const DEFAULT_PAGE_SIZE: i64 = 10;
    pub const MAX_PAGE_SIZE: i64 = 100;

    pub fn new(page: i64, page_size: i64, sort: TopicSort, category: Option<String>) -> Self {
        Self {
            page,
            page_size,
            sort,
            category,
        }
        .normalized()
    }

    /// Clamp paging and drop an empty category filter.
    pub fn normalized(mut self) -> Self {
        self.page = self.page.clamp(1, MAX_PAGE);
        if self.page_size < 1 || self.page_size > Self::MAX_PAGE_SIZE {
            self.page_size = Self::DEFAULT_PAGE_SIZE;
        }
        self.category = self
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self
    }

    pub fn offset(&self) -> i64 {
        page_offset(self.page, self.page_size)
    }
}

impl Default for TopicListQuery {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_PAGE_SIZE, TopicSort::Hot, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentListQuery {
    pub page: i64,
    pub page_size: i64,
}

impl CommentListQuery {
    pub const DEFAULT_PAGE_SIZE: i64 = 20;
    pub const MAX_PAGE_SIZE: i64 = 100;

    pub fn new(page: i64, page_size: i64) -> Self {
        Self {
            page: page.clamp(1, MAX_PAGE),
            page_size: if (1..=Self::MAX_PAGE_SIZE).contains(&page_size) {
                page_size
            } else {
                Self::DEFAULT_PAGE_SIZE
            },
        }
    }

    pub fn offset(&self) -> i64 {
        page_offset(self.page, self.page_size)
    }
}

impl Default for CommentListQuery {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_PAGE_SIZE)
    }
}

/// A page of results with paging metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, page: i64, page_size: i64) -> Self {
        let total_pages = if page_size > 0 {
            (total + page_size - 1) / page_size
        } else {
            0
        };
        Self {
            items,
            total,
            page,
            page_size,
            total_pages,
            has_more: page < total_pages,
        }
    }
}

// ============================================================================
// SEARCH
// ============================================================================

/// Topic as stored in the search index.
///
/// Identifiers are strings and datetimes use [`INDEX_DATETIME_FORMAT`], which
/// is what the change feed delivers and what the index mapping declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDocument {
    pub topic_id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub created_at: String,
    pub updated_at: String,
    pub view_count: i64,
    pub comment_count: i64,
}

impl TopicDocument {
    pub fn id(&self) -> &str {
        &self.topic_id
    }
}

impl From<&Topic> for TopicDocument {
    fn from(topic: &Topic) -> Self {
        Self {
            topic_id: topic.id.to_string(),
            user_id: topic.user_id.to_string(),
            title: topic.title.clone(),
            content: topic.content.clone(),
            category: topic.category.clone(),
            created_at: topic.created_at.format(INDEX_DATETIME_FORMAT).to_string(),
            updated_at: topic.updated_at.format(INDEX_DATETIME_FORMAT).to_string(),
            view_count: topic.view_count,
            comment_count: topic.comment_count,
        }
    }
}

/// Full-text search parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub keyword: String,
    pub category: Option<String>,
    pub page: i64,
    pub page_size: i64,
    pub sort: SearchSort,
}

impl SearchQuery {
    pub const DEFAULT_PAGE_SIZE: i64 = 20;
    pub const MAX_PAGE_SIZE: i64 = 100;

    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            category: None,
            page: 1,
            page_size: Self::DEFAULT_PAGE_SIZE,
            sort: SearchSort::Relevance,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_page(mut self, page: i64, page_size: i64) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn with_sort(mut self, sort: SearchSort) -> Self {
        self.sort = sort;
        self
    }

    /// Clamp paging so the requested window stays inside
    /// [`SEARCH_RESULT_WINDOW`], and drop an empty category filter.
    pub fn normalized(mut self) -> Self {
        if self.page_size < 1 || self.page_size > Self::MAX_PAGE_SIZE {
            self.page_size = Self::DEFAULT_PAGE_SIZE;
        }
        self.page = self
            .page
            .clamp(1, SEARCH_RESULT_WINDOW / self.page_size);
        self.category = self
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self
    }

    pub fn offset(&self) -> i64 {
        page_offset(self.page, self.page_size)
    }
}

/// A page of search hits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(rename = "topics")]
    pub documents: Vec<TopicDocument>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub has_more: bool,
    /// Engine-reported query time in milliseconds.
    pub took_ms: i64,
}

/// Number of indexed topics in one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}
