//! Identity types for Blossom entities

use chrono::{DateTime, Utc};

/// Entity identifier produced by the Snowflake generator.
///
/// Identifiers are 64-bit and time-ordered. They serialize as JSON strings so
/// that JavaScript clients do not lose precision above 2^53.
pub type EntityId = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Serde adapter for `EntityId` fields that travel as strings.
///
/// Accepts either a JSON string or a JSON number on input.
pub mod id_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::EntityId;

    pub fn serialize<S>(id: &EntityId, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(id)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<EntityId, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s.trim().parse().map_err(de::Error::custom),
        }
    }
}

/// Same as [`id_string`] for optional identifiers (`parent_id`).
pub mod opt_id_string {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::EntityId;

    pub fn serialize<S>(id: &Option<EntityId>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match id {
            Some(id) => serializer.collect_str(id),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<EntityId>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wrapped(#[serde(with = "super::id_string")] EntityId);

        Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|w| w.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "id_string")]
        id: EntityId,
        #[serde(with = "opt_id_string", default)]
        parent: Option<EntityId>,
    }

    #[test]
    fn test_id_serializes_as_string() {
        let json = serde_json::to_string(&Holder {
            id: 9_007_199_254_740_993,
            parent: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"id":"9007199254740993","parent":null}"#);
    }

    #[test]
    fn test_id_accepts_number_or_string() {
        let a: Holder = serde_json::from_str(r#"{"id":"42","parent":"7"}"#).unwrap();
        let b: Holder = serde_json::from_str(r#"{"id":42,"parent":7}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.parent, Some(7));
    }

    #[test]
    fn test_missing_parent_defaults_to_none() {
        let h: Holder = serde_json::from_str(r#"{"id":"1"}"#).unwrap();
        assert_eq!(h.parent, None);
    }
}
