//! Row-level change events captured from the store of record.
//!
//! Events arrive as Canal "flat messages": one JSON object per committed
//! statement, carrying the table name, the operation, and the affected rows
//! as untyped field maps. Column values are loosely typed on the wire (a
//! BIGINT may show up as a string or a float), so every accessor coerces.

use crate::entities::INDEX_DATETIME_FORMAT;
use crate::error::EventError;
use crate::{EntityId, Timestamp, TopicDocument};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Table holding topics.
pub const TOPICS_TABLE: &str = "topics";
/// Table holding comments; its events only refresh topic counters.
pub const COMMENTS_TABLE: &str = "comments";

// ============================================================================
// CHANGE KIND
// ============================================================================

/// Row operation of a change event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Anything else the capture emits (`QUERY`, `ALTER`, ...).
    Other(String),
}

impl ChangeKind {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "INSERT" => ChangeKind::Insert,
            "UPDATE" => ChangeKind::Update,
            "DELETE" => ChangeKind::Delete,
            _ => ChangeKind::Other(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
            ChangeKind::Other(s) => s,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CHANGE EVENT
// ============================================================================

/// One captured statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind_raw: String,
    #[serde(default)]
    pub database: String,
    pub table: String,
    /// Row images after the change (before it, for deletes).
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Vec<Map<String, Value>>,
    /// Previous values of changed columns, for updates.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub old: Vec<Map<String, Value>>,
    /// Schema-only statement.
    #[serde(rename = "isDdl", default)]
    pub is_ddl: bool,
    /// Execution time in the source database, Unix ms.
    #[serde(default)]
    pub es: i64,
    /// Capture time, Unix ms.
    #[serde(default)]
    pub ts: i64,
    #[serde(rename = "pkNames", default, skip_serializing_if = "Option::is_none")]
    pub pk_names: Option<Vec<String>>,
    #[serde(rename = "mysqlType", default, skip_serializing_if = "Option::is_none")]
    pub column_types: Option<Map<String, Value>>,
    #[serde(rename = "sqlType", default, skip_serializing_if = "Option::is_none")]
    pub sql_types: Option<Map<String, Value>>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Map<String, Value>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Map<String, Value>>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChangeEvent {
    /// Parse a flat message from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::Malformed {
            reason: e.to_string(),
        })
    }

    pub fn kind(&self) -> ChangeKind {
        ChangeKind::parse(&self.kind_raw)
    }

    /// Execution time of the statement, if the capture reported one.
    pub fn executed_at(&self) -> Option<Timestamp> {
        Utc.timestamp_millis_opt(self.es).single().filter(|_| self.es > 0)
    }

    pub fn rows(&self) -> impl Iterator<Item = RowImage<'_>> {
        self.data.iter().map(RowImage)
    }

    /// Distinct positive values of an id column across all rows.
    pub fn distinct_ids(&self, field: &str) -> BTreeSet<EntityId> {
        self.rows()
            .filter_map(|row| row.int(field))
            .filter(|id| *id > 0)
            .collect()
    }
}

// ============================================================================
// ROW IMAGE
// ============================================================================

/// Borrowed view of one row with coercing accessors.
#[derive(Debug, Clone, Copy)]
pub struct RowImage<'a>(pub &'a Map<String, Value>);

impl<'a> RowImage<'a> {
    pub fn get(&self, field: &str) -> Option<&'a Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    /// Integer column. Accepts integers, floats (truncated) and numeric text.
    pub fn int(&self, field: &str) -> Option<i64> {
        match self.get(field)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
            }
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Text column. Scalars are rendered; arrays and objects are rejected.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Datetime column in `YYYY-MM-DD HH:MM:SS`, RFC 3339 or Unix ms.
    pub fn timestamp(&self, field: &str) -> Option<Timestamp> {
        match self.get(field)? {
            Value::String(s) => parse_timestamp(s.trim()),
            Value::Number(n) => n
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            _ => None,
        }
    }

    /// Build the search document for a `topics` row.
    ///
    /// Missing counters default to zero; unparseable datetimes fall back to
    /// `fallback`. A row without a positive id is rejected.
    pub fn to_topic_document(&self, fallback: Timestamp) -> Result<TopicDocument, EventError> {
        let id = self.int("id").filter(|id| *id > 0).ok_or_else(|| {
            EventError::Malformed {
                reason: "topic row without a valid id".to_string(),
            }
        })?;
        let created_at = self.timestamp("created_at").unwrap_or(fallback);
        let updated_at = self.timestamp("updated_at").unwrap_or(created_at);

        Ok(TopicDocument {
            topic_id: id.to_string(),
            user_id: self.int("user_id").unwrap_or(0).to_string(),
            title: self.text("title").unwrap_or_default(),
            content: self.text("content").unwrap_or_default(),
            category: self.text("category").unwrap_or_default(),
            created_at: created_at.format(INDEX_DATETIME_FORMAT).to_string(),
            updated_at: updated_at.format(INDEX_DATETIME_FORMAT).to_string(),
            view_count: self.int("view_count").unwrap_or(0),
            comment_count: self.int("comment_count").unwrap_or(0),
        })
    }
}

fn parse_timestamp(s: &str) -> Option<Timestamp> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, INDEX_DATETIME_FORMAT) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    s.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> ChangeEvent {
        ChangeEvent::from_slice(value.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_flat_message() {
        let ev = event(json!({
            "type": "INSERT",
            "database": "forum",
            "table": "topics",
            "data": [{"id": "123", "title": "hi"}],
            "old": null,
            "isDdl": false,
            "es": 1_714_000_000_000i64,
            "ts": 1_714_000_000_100i64,
            "pkNames": ["id"],
            "mysqlType": {"id": "bigint"},
            "sqlType": {"id": -5}
        }));
        assert_eq!(ev.kind(), ChangeKind::Insert);
        assert_eq!(ev.table, TOPICS_TABLE);
        assert_eq!(ev.data.len(), 1);
        assert!(ev.old.is_empty());
        assert!(ev.executed_at().is_some());
    }

    #[test]
    fn test_malformed_payload_is_reported() {
        let err = ChangeEvent::from_slice(b"{not json").unwrap_err();
        assert!(matches!(err, EventError::Malformed { .. }));

        let err = ChangeEvent::from_slice(br#"{"type":"INSERT"}"#).unwrap_err();
        assert!(matches!(err, EventError::Malformed { .. }));
    }

    #[test]
    fn test_change_kind_other() {
        assert_eq!(ChangeKind::parse("delete"), ChangeKind::Delete);
        assert_eq!(ChangeKind::parse("ALTER"), ChangeKind::Other("ALTER".into()));
    }

    #[test]
    fn test_int_coercion() {
        let row = json!({"a": 5, "b": "17", "c": 3.9, "d": "2.0", "e": null, "f": "x"});
        let map = row.as_object().unwrap();
        let r = RowImage(map);
        assert_eq!(r.int("a"), Some(5));
        assert_eq!(r.int("b"), Some(17));
        assert_eq!(r.int("c"), Some(3));
        assert_eq!(r.int("d"), Some(2));
        assert_eq!(r.int("e"), None);
        assert_eq!(r.int("f"), None);
        assert_eq!(r.int("missing"), None);
    }

    #[test]
    fn test_timestamp_formats() {
        let row = json!({
            "a": "2024-02-03 04:05:06",
            "b": "2024-02-03T04:05:06Z",
            "c": 1_706_933_106_000i64,
            "d": "yesterday"
        });
        let r = RowImage(row.as_object().unwrap());
        let a = r.timestamp("a").unwrap();
        assert_eq!(Some(a), r.timestamp("b"));
        assert_eq!(Some(a), r.timestamp("c"));
        assert_eq!(r.timestamp("d"), None);
    }

    #[test]
    fn test_topic_document_from_loose_row() {
        let row = json!({
            "id": "900719925474099301",
            "user_id": 42.0,
            "title": "Hello",
            "content": "World",
            "category": "tech",
            "view_count": "12",
            "comment_count": 3,
            "like_count": "999",
            "created_at": "2024-02-03 04:05:06",
            "updated_at": "not a date"
        });
        let fallback = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let doc = RowImage(row.as_object().unwrap())
            .to_topic_document(fallback)
            .unwrap();
        assert_eq!(doc.topic_id, "900719925474099301");
        assert_eq!(doc.user_id, "42");
        assert_eq!(doc.view_count, 12);
        assert_eq!(doc.comment_count, 3);
        assert_eq!(doc.created_at, "2024-02-03 04:05:06");
        assert_eq!(doc.updated_at, "2024-02-03 04:05:06");
    }

    #[test]
    fn test_topic_row_without_id_is_rejected() {
        let row = json!({"title": "orphan"});
        let err = RowImage(row.as_object().unwrap())
            .to_topic_document(Utc::now())
            .unwrap_err();
        assert!(matches!(err, EventError::Malformed { .. }));
    }

    #[test]
    fn test_distinct_parent_ids() {
        let ev = event(json!({
            "type": "INSERT",
            "table": "comments",
            "data": [
                {"id": "1", "topic_id": "10"},
                {"id": "2", "topic_id": 10},
                {"id": "3", "topic_id": "11"},
                {"id": "4", "topic_id": "0"},
                {"id": "5"}
            ]
        }));
        let ids: Vec<i64> = ev.distinct_ids("topic_id").into_iter().collect();
        assert_eq!(ids, vec![10, 11]);
    }
}
