//! Error types for Blossom operations

use crate::{EntityId, EntityKind};
use thiserror::Error;

/// Store-of-record errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity:?} with id {id}")]
    NotFound { entity: EntityKind, id: EntityId },

    #[error("Insert failed for {entity:?}: {reason}")]
    InsertFailed { entity: EntityKind, reason: String },

    #[error("Update failed for {entity:?} with id {id}: {reason}")]
    UpdateFailed {
        entity: EntityKind,
        id: EntityId,
        reason: String,
    },

    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Store of record unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Coordination store (key-value, sorted sets, streams) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("Coordination store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Command {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Cached value under {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Distributed lock errors.
///
/// `Contended` is the normal outcome of losing a race and is distinct from
/// `Store`, which means the coordination store could not be reached.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock {key} is held by another owner")]
    Contended { key: String },

    #[error("Lock {key} is not held by this token")]
    NotHeld { key: String },

    #[error("Lock store error: {0}")]
    Store(#[from] CoordinationError),
}

/// Search index errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("Index write failed for document {id}: {reason}")]
    WriteFailed { id: String, reason: String },

    #[error("Index query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Search index unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Change feed errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Malformed change event: {reason}")]
    Malformed { reason: String },

    #[error("Change feed unavailable: {reason}")]
    SourceUnavailable { reason: String },

    #[error("Acknowledge failed for {delivery_id}: {reason}")]
    AckFailed { delivery_id: String, reason: String },
}

/// Identifier generator errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClockError {
    #[error("Clock moved backwards: last issued at {last_ms}ms, now {now_ms}ms")]
    Rollback { last_ms: i64, now_ms: i64 },

    #[error("Clock reading unusable: {reason}")]
    Unreadable { reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },

    #[error("User {user_id} may not modify {entity:?} {id}")]
    NotOwner {
        entity: EntityKind,
        id: EntityId,
        user_id: EntityId,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Coarse classification of failures, shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    LockContended,
    StoreUnavailable,
    MalformedEvent,
    IndexWriteFailed,
    ClockRollback,
    InvalidInput,
    Forbidden,
    Internal,
}

/// Master error type for all Blossom errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BlossomError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl BlossomError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlossomError::Storage(StorageError::NotFound { .. }) => ErrorKind::NotFound,
            BlossomError::Storage(StorageError::Unavailable { .. }) => ErrorKind::StoreUnavailable,
            BlossomError::Storage(_) => ErrorKind::Internal,
            BlossomError::Coordination(CoordinationError::Corrupt { .. }) => ErrorKind::Internal,
            BlossomError::Coordination(_) => ErrorKind::StoreUnavailable,
            BlossomError::Lock(LockError::Contended { .. }) => ErrorKind::LockContended,
            BlossomError::Lock(LockError::NotHeld { .. }) => ErrorKind::Internal,
            BlossomError::Lock(LockError::Store(_)) => ErrorKind::StoreUnavailable,
            BlossomError::Index(IndexError::WriteFailed { .. }) => ErrorKind::IndexWriteFailed,
            BlossomError::Index(IndexError::Unavailable { .. }) => ErrorKind::StoreUnavailable,
            BlossomError::Index(IndexError::QueryFailed { .. }) => ErrorKind::Internal,
            BlossomError::Event(EventError::Malformed { .. }) => ErrorKind::MalformedEvent,
            BlossomError::Event(_) => ErrorKind::StoreUnavailable,
            BlossomError::Clock(ClockError::Rollback { .. }) => ErrorKind::ClockRollback,
            BlossomError::Clock(ClockError::Unreadable { .. }) => ErrorKind::Internal,
            BlossomError::Validation(ValidationError::NotOwner { .. }) => ErrorKind::Forbidden,
            BlossomError::Validation(_) => ErrorKind::InvalidInput,
            BlossomError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for a `NotFound` storage error.
    pub fn not_found(entity: EntityKind, id: EntityId) -> Self {
        StorageError::NotFound { entity, id }.into()
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
        .into()
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Result type alias for Blossom operations.
pub type BlossomResult<T> = Result<T, BlossomError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            entity: EntityKind::Topic,
            id: 42,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("Topic"));
        assert!(msg.contains("42"));
    }

    #[test]
    fn test_clock_error_display() {
        let err = ClockError::Rollback {
            last_ms: 1000,
            now_ms: 990,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("backwards"));
        assert!(msg.contains("1000"));
        assert!(msg.contains("990"));
    }

    #[test]
    fn test_contended_lock_is_not_a_store_failure() {
        let contended: BlossomError = LockError::Contended {
            key: "lock:vote:1:2".into(),
        }
        .into();
        let down: BlossomError = LockError::Store(CoordinationError::Unavailable {
            reason: "connection refused".into(),
        })
        .into();
        assert_eq!(contended.kind(), ErrorKind::LockContended);
        assert_eq!(down.kind(), ErrorKind::StoreUnavailable);
    }

    #[test]
    fn test_error_kinds() {
        assert!(BlossomError::not_found(EntityKind::Comment, 9).is_not_found());
        assert_eq!(
            BlossomError::from(EventError::Malformed { reason: "eof".into() }).kind(),
            ErrorKind::MalformedEvent
        );
        assert_eq!(
            BlossomError::from(IndexError::WriteFailed {
                id: "1".into(),
                reason: "503".into()
            })
            .kind(),
            ErrorKind::IndexWriteFailed
        );
        assert_eq!(
            BlossomError::from(ClockError::Rollback { last_ms: 2, now_ms: 1 }).kind(),
            ErrorKind::ClockRollback
        );
        assert_eq!(
            BlossomError::from(ClockError::Unreadable {
                reason: "before epoch".into()
            })
            .kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            BlossomError::from(ValidationError::NotOwner {
                entity: EntityKind::Comment,
                id: 1,
                user_id: 2
            })
            .kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(BlossomError::invalid("vote_type", "bad").kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "machine_id".to_string(),
            value: "4096".to_string(),
            reason: "must be in 0..=1023".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("machine_id"));
        assert!(msg.contains("4096"));
        assert!(msg.contains("0..=1023"));
    }
}
