//! Enum types for the forum domain

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ENTITY KIND
// ============================================================================

/// Entity type discriminator, used in errors and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    User,
    Topic,
    Comment,
    Vote,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            EntityKind::User => "User",
            EntityKind::Topic => "Topic",
            EntityKind::Comment => "Comment",
            EntityKind::Vote => "Vote",
        };
        write!(f, "{}", value)
    }
}

// ============================================================================
// VOTE KIND
// ============================================================================

/// Direction of a vote on a topic.
///
/// Stored in the `votes.vote_type` column as `1` (like) or `-1` (dislike).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Like,
    Dislike,
}

impl VoteKind {
    /// Convert to the integer stored in the database.
    pub fn as_db_value(&self) -> i16 {
        match self {
            VoteKind::Like => 1,
            VoteKind::Dislike => -1,
        }
    }

    /// Parse the integer stored in the database.
    pub fn from_db_value(value: i16) -> Result<Self, VoteKindParseError> {
        match value {
            1 => Ok(VoteKind::Like),
            -1 => Ok(VoteKind::Dislike),
            other => Err(VoteKindParseError(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VoteKind::Like => "like",
            VoteKind::Dislike => "dislike",
        }
    }
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VoteKind {
    type Err = VoteKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "like" => Ok(VoteKind::Like),
            "dislike" => Ok(VoteKind::Dislike),
            _ => Err(VoteKindParseError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid vote type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteKindParseError(pub String);

impl fmt::Display for VoteKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid vote type: {}", self.0)
    }
}

impl std::error::Error for VoteKindParseError {}

// ============================================================================
// SORT MODES
// ============================================================================

/// Ordering of topic list pages read from the store of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicSort {
    /// `like_count * 3 + comment_count * 2 + view_count`, descending
    #[default]
    Hot,
    /// Newest first
    New,
    /// Most liked first
    Like,
}

impl TopicSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicSort::Hot => "hot",
            TopicSort::New => "new",
            TopicSort::Like => "like",
        }
    }

    /// Parse a sort parameter. Unknown values fall back to `Hot`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "new" => TopicSort::New,
            "like" => TopicSort::Like,
            _ => TopicSort::Hot,
        }
    }
}

impl fmt::Display for TopicSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordering of search results. `Relevance` keeps the engine's scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSort {
    #[default]
    Relevance,
    ViewCount,
    CommentCount,
    CreatedAt,
}

impl SearchSort {
    /// Index field to sort on, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            SearchSort::Relevance => None,
            SearchSort::ViewCount => Some("view_count"),
            SearchSort::CommentCount => Some("comment_count"),
            SearchSort::CreatedAt => Some("created_at"),
        }
    }

    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "view_count" => SearchSort::ViewCount,
            "comment_count" => SearchSort::CommentCount,
            "created_at" => SearchSort::CreatedAt,
            _ => SearchSort::Relevance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_kind_roundtrip_db_value() {
        for kind in [VoteKind::Like, VoteKind::Dislike] {
            assert_eq!(VoteKind::from_db_value(kind.as_db_value()), Ok(kind));
        }
        assert!(VoteKind::from_db_value(0).is_err());
    }

    #[test]
    fn test_vote_kind_parse_rejects_unknown() {
        assert_eq!("Like".parse::<VoteKind>(), Ok(VoteKind::Like));
        assert_eq!(" dislike ".parse::<VoteKind>(), Ok(VoteKind::Dislike));
        let err = "upvote".parse::<VoteKind>().unwrap_err();
        assert!(err.to_string().contains("upvote"));
    }

    #[test]
    fn test_topic_sort_falls_back_to_hot() {
        assert_eq!(TopicSort::parse_lenient("new"), TopicSort::New);
        assert_eq!(TopicSort::parse_lenient("LIKE"), TopicSort::Like);
        assert_eq!(TopicSort::parse_lenient("weird"), TopicSort::Hot);
        assert_eq!(TopicSort::parse_lenient(""), TopicSort::Hot);
    }

    #[test]
    fn test_search_sort_fields() {
        assert_eq!(SearchSort::parse_lenient("view_count").field(), Some("view_count"));
        assert_eq!(SearchSort::parse_lenient("created_at").field(), Some("created_at"));
        assert_eq!(SearchSort::parse_lenient("score").field(), None);
    }
}
