//! Blossom Core - Entity Types
//!
//! Data structures, identifiers, scoring and the error hierarchy shared by
//! every Blossom crate. No I/O lives here.

pub mod entities;
pub mod enums;
pub mod error;
pub mod event;
pub mod identity;
pub mod lock;
pub mod score;
pub mod snowflake;

pub use entities::{
    CategoryCount, Comment, CommentListQuery, CreateCommentRequest, CreateTopicRequest, Page,
    SearchQuery, SearchResults, Topic, TopicDocument, TopicListQuery, User, Vote,
    INDEX_DATETIME_FORMAT, MAX_PAGE, SEARCH_RESULT_WINDOW, TOPIC_CATEGORIES,
};
pub use enums::{EntityKind, SearchSort, TopicSort, VoteKind, VoteKindParseError};
pub use error::{
    BlossomError, BlossomResult, ClockError, ConfigError, CoordinationError, ErrorKind,
    EventError, IndexError, LockError, StorageError, ValidationError,
};
pub use event::{ChangeEvent, ChangeKind, RowImage, COMMENTS_TABLE, TOPICS_TABLE};
pub use identity::{EntityId, Timestamp};
pub use lock::{comment_lock_key, vote_lock_key, LockToken, COMMENT_LOCK_TTL, VOTE_LOCK_TTL};
pub use score::{
    engagement_score, hacker_news_score, hot_score, rank_topics, rank_topics_at,
    topic_hot_score, wilson_score,
};
pub use snowflake::{Clock, IdGenerator, ManualClock, SystemClock};
