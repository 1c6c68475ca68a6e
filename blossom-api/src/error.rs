//! Service-level errors.
//!
//! Every service returns [`ApiResult`]. An [`ApiError`] carries a stable
//! [`ErrorCode`], a message safe to show a client, and optional JSON
//! details. Status codes are plain `u16` values so any HTTP layer can serve
//! them.

use blossom_core::{BlossomError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODES
// ============================================================================

/// Stable failure category, serialized as `SCREAMING_SNAKE_CASE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // 403
    Forbidden,

    // 400
    InvalidInput,
    MalformedEvent,

    // 404
    EntityNotFound,
    TopicNotFound,
    CommentNotFound,

    /// 409: another request holds the lock guarding this operation.
    LockConflict,

    // 429
    TooManyRequests,

    // 5xx
    InternalError,
    DatabaseError,
    IndexError,
    /// The id generator saw its clock move backwards and refused.
    ClockRollback,
    /// A backing store could not be reached.
    ServiceUnavailable,
    ConnectionPoolExhausted,
    Timeout,
}

impl ErrorCode {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCode::Forbidden => 403,
            ErrorCode::InvalidInput | ErrorCode::MalformedEvent => 400,
            ErrorCode::EntityNotFound | ErrorCode::TopicNotFound | ErrorCode::CommentNotFound => {
                404
            }
            ErrorCode::LockConflict => 409,
            ErrorCode::TooManyRequests => 429,
            ErrorCode::ServiceUnavailable | ErrorCode::ConnectionPoolExhausted => 503,
            ErrorCode::Timeout => 504,
            ErrorCode::InternalError
            | ErrorCode::DatabaseError
            | ErrorCode::IndexError
            | ErrorCode::ClockRollback => 500,
        }
    }

    /// Message used when a caller gives none.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Forbidden => "Not allowed to modify this resource",
            ErrorCode::InvalidInput => "Request failed validation",
            ErrorCode::MalformedEvent => "Malformed change event",
            ErrorCode::EntityNotFound => "No such record",
            ErrorCode::TopicNotFound => "Topic not found",
            ErrorCode::CommentNotFound => "Comment not found",
            ErrorCode::LockConflict => "Operation in progress, try again",
            ErrorCode::TooManyRequests => "Too many requests",
            ErrorCode::InternalError => "Unexpected server failure",
            ErrorCode::DatabaseError => "Store of record query failed",
            ErrorCode::IndexError => "Search index update failed",
            ErrorCode::ClockRollback => "Identifier generator clock moved backwards",
            ErrorCode::ServiceUnavailable => "Backing store unreachable",
            ErrorCode::ConnectionPoolExhausted => "No database connection available",
            ErrorCode::Timeout => "Backend call timed out",
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::LockConflict
                | ErrorCode::TooManyRequests
                | ErrorCode::ServiceUnavailable
                | ErrorCode::ConnectionPoolExhausted
                | ErrorCode::Timeout
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// API ERROR
// ============================================================================

/// Structured error returned by every service operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Error carrying the code's default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> u16 {
        self.code.status_code()
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn topic_not_found(topic_id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::TopicNotFound, format!("Topic {} not found", topic_id))
    }

    pub fn comment_not_found(comment_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::CommentNotFound,
            format!("Comment {} not found", comment_id),
        )
    }

    /// `operation` on `resource_id` is locked by a concurrent request.
    pub fn lock_conflict(operation: &str, resource_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::LockConflict,
            format!("{} on {} is already in progress, try again", operation, resource_id),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn connection_pool_exhausted() -> Self {
        Self::from_code(ErrorCode::ConnectionPoolExhausted)
    }

    pub fn timeout(backend: &str) -> Self {
        Self::new(ErrorCode::Timeout, format!("Call to {} timed out", backend))
    }

    /// Throttled request; `retry_after` (seconds) also lands in `details`.
    pub fn too_many_requests(retry_after: Option<u64>) -> Self {
        match retry_after {
            Some(secs) => Self::new(
                ErrorCode::TooManyRequests,
                format!("Too many requests, retry in {}s", secs),
            )
            .with_details(serde_json::json!({ "retry_after": secs })),
            None => Self::from_code(ErrorCode::TooManyRequests),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

/// Classify a domain error by its [`ErrorKind`].
///
/// Not-found errors keep their entity so callers get a specific code.
impl From<BlossomError> for ApiError {
    fn from(err: BlossomError) -> Self {
        use blossom_core::{EntityKind, StorageError};

        let message = err.to_string();
        match err.kind() {
            ErrorKind::NotFound => match &err {
                BlossomError::Storage(StorageError::NotFound {
                    entity: EntityKind::Topic,
                    id,
                }) => ApiError::topic_not_found(id),
                BlossomError::Storage(StorageError::NotFound {
                    entity: EntityKind::Comment,
                    id,
                }) => ApiError::comment_not_found(id),
                _ => ApiError::new(ErrorCode::EntityNotFound, message),
            },
            ErrorKind::LockContended => ApiError::new(ErrorCode::LockConflict, message),
            ErrorKind::StoreUnavailable => {
                tracing::error!(error = %err, "Backing store unavailable");
                ApiError::service_unavailable(message)
            }
            ErrorKind::MalformedEvent => ApiError::new(ErrorCode::MalformedEvent, message),
            ErrorKind::IndexWriteFailed => ApiError::new(ErrorCode::IndexError, message),
            ErrorKind::ClockRollback => {
                tracing::error!(error = %err, "Identifier generation refused");
                ApiError::new(ErrorCode::ClockRollback, message)
            }
            ErrorKind::InvalidInput => ApiError::invalid_input(message),
            ErrorKind::Forbidden => ApiError::forbidden(message),
            ErrorKind::Internal => {
                tracing::error!(error = %err, "Internal error");
                ApiError::internal_error(message)
            }
        }
    }
}

// ============================================================================
// CONVERSIONS FROM BACKEND ERRORS
// ============================================================================

// Backend errors are logged in full here; clients only see the category.

impl From<tokio_postgres::Error> for ApiError {
    fn from(err: tokio_postgres::Error) -> Self {
        tracing::error!(error = ?err, "Postgres query failed");
        ApiError::from_code(ErrorCode::DatabaseError)
    }
}

impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!(error = ?err, "Postgres pool checkout failed");
        match err {
            deadpool_postgres::PoolError::Timeout(_) => ApiError::connection_pool_exhausted(),
            deadpool_postgres::PoolError::Closed => {
                ApiError::service_unavailable("Postgres pool is closed")
            }
            _ => ApiError::database_error("Could not check out a Postgres connection"),
        }
    }
}

impl From<redis::RedisError> for ApiError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!(error = ?err, "Redis command failed");
        if err.is_timeout() {
            ApiError::timeout("redis")
        } else {
            ApiError::service_unavailable("Coordination store unavailable")
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        tracing::error!(error = ?err, "Elasticsearch request failed");
        if err.is_timeout() {
            ApiError::timeout("search")
        } else {
            ApiError::service_unavailable("Search index unavailable")
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::warn!(error = %err, "JSON (de)serialization failed");
        ApiError::invalid_input(format!("Bad JSON: {}", err))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
