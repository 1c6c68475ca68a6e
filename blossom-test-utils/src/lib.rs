//! Blossom Test Utilities
//!
//! Shared test infrastructure for the Blossom workspace:
//! - Proptest generators for entities and change events
//! - Fixtures for topics, comments and flat-message change events
//! - In-memory backend bundle
//! - Assertions on `BlossomError` classification

pub use blossom_core::{
    BlossomError, BlossomResult, ChangeEvent, Comment, CreateCommentRequest,
    CreateTopicRequest, EntityId, EntityKind, ErrorKind, StorageError, Timestamp, Topic,
    User, VoteKind, COMMENTS_TABLE, INDEX_DATETIME_FORMAT, TOPICS_TABLE, TOPIC_CATEGORIES,
};
pub use blossom_storage::{
    InMemoryChangeFeed, InMemoryCoordinationStore, InMemoryRecordStore, InMemorySearchIndex,
};

use chrono::Utc;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Blossom entity types.

    use super::*;
    use proptest::prelude::*;

    /// Positive snowflake-sized id.
    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        1i64..(1i64 << 53)
    }

    /// Timestamp between 2024-01-01 and 2030-01-01.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_704_067_200i64..1_893_456_000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_category() -> impl Strategy<Value = String> {
        prop::sample::select(TOPIC_CATEGORIES).prop_map(str::to_string)
    }

    pub fn arb_vote_kind() -> impl Strategy<Value = VoteKind> {
        prop_oneof![Just(VoteKind::Like), Just(VoteKind::Dislike)]
    }

    /// A topic request that passes validation.
    pub fn arb_valid_topic_request() -> impl Strategy<Value = CreateTopicRequest> {
        ("[A-Za-z][A-Za-z ]{4,60}[a-z]", "[a-z]{10}[a-z ]{0,190}[a-z]", arb_category()).prop_map(
            |(title, content, category)| CreateTopicRequest {
                title,
                content,
                category,
            },
        )
    }

    pub fn arb_topic() -> impl Strategy<Value = Topic> {
        (
            arb_entity_id(),
            arb_entity_id(),
            arb_valid_topic_request(),
            (0i64..10_000, 0i64..10_000, 0i64..10_000, 0i64..1_000_000),
            arb_timestamp(),
        )
            .prop_map(|(id, user_id, req, (likes, dislikes, comments, views), at)| Topic {
                id,
                user_id,
                username: format!("user{}", user_id),
                title: req.title,
                content: req.content,
                category: req.category,
                like_count: likes,
                dislike_count: dislikes,
                comment_count: comments,
                view_count: views,
                created_at: at,
                updated_at: at,
            })
    }

    /// JSON scalar for `value` in one of the shapes the change feed emits.
    pub fn arb_loose_int(value: i64) -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            Just(serde_json::json!(value)),
            Just(serde_json::json!(value.to_string())),
            Just(serde_json::json!(value as f64)),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built entities and change events.

    use super::*;
    use serde_json::{json, Map, Value};
    use std::sync::Arc;

    pub fn user(id: EntityId) -> User {
        User {
            id,
            username: format!("user{}", id),
            email: format!("user{}@example.com", id),
            created_at: Utc::now(),
        }
    }

    /// Fresh topic with zero counters.
    pub fn topic(id: EntityId, user_id: EntityId) -> Topic {
        let now = Utc::now();
        Topic {
            id,
            user_id,
            username: String::new(),
            title: format!("Fixture topic {}", id),
            content: "fixture topic content".to_string(),
            category: "tech".to_string(),
            like_count: 0,
            dislike_count: 0,
            comment_count: 0,
            view_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn comment(id: EntityId, topic_id: EntityId, user_id: EntityId) -> Comment {
        let now = Utc::now();
        Comment {
            id,
            topic_id,
            user_id,
            username: String::new(),
            content: format!("fixture comment {}", id),
            parent_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn topic_request(title: &str) -> CreateTopicRequest {
        CreateTopicRequest {
            title: title.to_string(),
            content: "long enough fixture content".to_string(),
            category: "tech".to_string(),
        }
    }

    pub fn comment_request(content: &str) -> CreateCommentRequest {
        CreateCommentRequest {
            content: content.to_string(),
            parent_id: None,
        }
    }

    /// Row image of a topic as the change feed carries it: ids as strings,
    /// datetimes as `YYYY-MM-DD HH:MM:SS`.
    pub fn topic_row(topic: &Topic) -> Map<String, Value> {
        let row = json!({
            "id": topic.id.to_string(),
            "user_id": topic.user_id.to_string(),
            "title": topic.title,
            "content": topic.content,
            "category": topic.category,
            "like_count": topic.like_count.to_string(),
            "dislike_count": topic.dislike_count.to_string(),
            "comment_count": topic.comment_count.to_string(),
            "view_count": topic.view_count.to_string(),
            "created_at": topic.created_at.format(INDEX_DATETIME_FORMAT).to_string(),
            "updated_at": topic.updated_at.format(INDEX_DATETIME_FORMAT).to_string(),
        });
        match row {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    pub fn comment_row(comment: &Comment) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("id".to_string(), json!(comment.id.to_string()));
        row.insert("topic_id".to_string(), json!(comment.topic_id.to_string()));
        row.insert("user_id".to_string(), json!(comment.user_id.to_string()));
        row.insert("content".to_string(), json!(comment.content));
        row
    }

    /// Flat-message change event for `table`.
    pub fn change_event(kind: &str, table: &str, data: Vec<Map<String, Value>>) -> ChangeEvent {
        let now_ms = Utc::now().timestamp_millis();
        ChangeEvent {
            kind_raw: kind.to_string(),
            database: "forum".to_string(),
            table: table.to_string(),
            data,
            old: Vec::new(),
            is_ddl: false,
            es: now_ms,
            ts: now_ms,
            pk_names: Some(vec!["id".to_string()]),
            column_types: None,
            sql_types: None,
        }
    }

    pub fn topic_event(kind: &str, topics: &[Topic]) -> ChangeEvent {
        change_event(kind, TOPICS_TABLE, topics.iter().map(topic_row).collect())
    }

    pub fn comment_event(kind: &str, comments: &[Comment]) -> ChangeEvent {
        change_event(kind, COMMENTS_TABLE, comments.iter().map(comment_row).collect())
    }

    /// One of each in-memory backend.
    #[derive(Clone, Default)]
    pub struct InMemoryBackends {
        pub records: Arc<InMemoryRecordStore>,
        pub coordination: Arc<InMemoryCoordinationStore>,
        pub index: Arc<InMemorySearchIndex>,
        pub feed: Arc<InMemoryChangeFeed>,
    }

    impl InMemoryBackends {
        pub fn new() -> Self {
            Self::default()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on error classification.

    use super::*;

    #[track_caller]
    pub fn assert_kind<T: std::fmt::Debug>(result: &BlossomResult<T>, kind: ErrorKind) {
        match result {
            Err(e) => assert_eq!(e.kind(), kind, "Wrong error kind for {:?}", e),
            Ok(v) => panic!("Expected {:?} error, got Ok({:?})", kind, v),
        }
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &BlossomResult<T>, entity: EntityKind) {
        match result {
            Err(BlossomError::Storage(StorageError::NotFound { entity: found, .. })) => {
                assert_eq!(*found, entity, "Wrong entity in NotFound error");
            }
            other => panic!("Expected NotFound for {:?}, got: {:?}", entity, other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_topic_event_round_trips_through_flat_message() {
        let topic = fixtures::topic(42, 7);
        let event = fixtures::topic_event("INSERT", &[topic.clone()]);
        let bytes = serde_json::to_vec(&event).unwrap();
        let parsed = ChangeEvent::from_slice(&bytes).unwrap();

        let rows: Vec<_> = parsed.rows().collect();
        assert_eq!(rows.len(), 1);
        let doc = rows[0].to_topic_document(Utc::now()).unwrap();
        assert_eq!(doc.topic_id, "42");
        assert_eq!(doc.title, topic.title);
    }

    #[test]
    fn test_comment_event_carries_topic_id() {
        let event = fixtures::comment_event(
            "DELETE",
            &[fixtures::comment(1, 9, 3), fixtures::comment(2, 9, 4)],
        );
        assert_eq!(event.distinct_ids("topic_id").into_iter().collect::<Vec<_>>(), vec![9]);
    }

    #[test]
    fn test_assert_not_found() {
        let result: BlossomResult<()> = Err(BlossomError::not_found(EntityKind::Topic, 1));
        assertions::assert_not_found(&result, EntityKind::Topic);
        assertions::assert_kind(&result, ErrorKind::NotFound);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_requests_validate(req in generators::arb_valid_topic_request()) {
            prop_assert!(req.validate().is_ok());
        }

        #[test]
        fn prop_generated_topics_have_valid_ids(topic in generators::arb_topic()) {
            prop_assert!(topic.id > 0);
            prop_assert!(TOPIC_CATEGORIES.contains(&topic.category.as_str()));
        }
    }
}
