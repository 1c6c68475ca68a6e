//! PostgreSQL store of record
//!
//! PostgreSQL connection pooling using deadpool-postgres, and the
//! [`RecordStore`] implementation the services run against.
//!
//! Counter updates are single `SET col = col + $n` statements so concurrent
//! writers never lose increments.

use crate::constants::{
    DEFAULT_DB_HOST, DEFAULT_DB_NAME, DEFAULT_DB_POOL_SIZE, DEFAULT_DB_PORT,
    DEFAULT_DB_TIMEOUT_SECS, DEFAULT_DB_USER,
};
use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use blossom_core::{
    BlossomError, BlossomResult, Comment, CommentListQuery, EntityId, EntityKind, StorageError,
    Topic, TopicListQuery, TopicSort, User, Vote, VoteKind,
};
use blossom_storage::RecordStore;
use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts,
};
use std::time::Duration;
use tokio_postgres::{NoTls, Row};

// ============================================================================
// POOL SETTINGS
// ============================================================================

/// Postgres connection and pool settings.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection acquire timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            dbname: DEFAULT_DB_NAME.to_string(),
            user: DEFAULT_DB_USER.to_string(),
            password: "".to_string(),
            max_size: DEFAULT_DB_POOL_SIZE,
            timeout: Duration::from_secs(DEFAULT_DB_TIMEOUT_SECS),
        }
    }
}

impl DbConfig {
    /// Read settings from `BLOSSOM_DB_*` variables.
    ///
    /// # Environment Variables
    /// - `BLOSSOM_DB_HOST` (default: localhost)
    /// - `BLOSSOM_DB_PORT` (default: 5432)
    /// - `BLOSSOM_DB_NAME` (default: blossom)
    /// - `BLOSSOM_DB_USER` (default: postgres)
    /// - `BLOSSOM_DB_PASSWORD` (default: empty)
    /// - `BLOSSOM_DB_POOL_SIZE` (default: 16)
    /// - `BLOSSOM_DB_TIMEOUT` seconds (default: 5)
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("BLOSSOM_DB_HOST").unwrap_or_else(|_| DEFAULT_DB_HOST.to_string()),
            port: std::env::var("BLOSSOM_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DB_PORT),
            dbname: std::env::var("BLOSSOM_DB_NAME").unwrap_or_else(|_| DEFAULT_DB_NAME.to_string()),
            user: std::env::var("BLOSSOM_DB_USER").unwrap_or_else(|_| DEFAULT_DB_USER.to_string()),
            password: std::env::var("BLOSSOM_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("BLOSSOM_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DB_POOL_SIZE),
            timeout: Duration::from_secs(
                std::env::var("BLOSSOM_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DB_TIMEOUT_SECS),
            ),
        }
    }

    /// Build a deadpool pool over these settings.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig {
            max_size: self.max_size,
            timeouts: Timeouts {
                wait: Some(self.timeout),
                create: Some(self.timeout),
                recycle: Some(self.timeout),
            },
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Tables the store reads and writes. Applied by tooling and live tests;
/// the service itself never migrates.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          BIGINT PRIMARY KEY,
    username    VARCHAR(64) NOT NULL UNIQUE,
    email       VARCHAR(128) NOT NULL DEFAULT '',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS topics (
    id             BIGINT PRIMARY KEY,
    user_id        BIGINT NOT NULL,
    title          VARCHAR(200) NOT NULL,
    content        TEXT NOT NULL,
    category       VARCHAR(50) NOT NULL DEFAULT '',
    like_count     BIGINT NOT NULL DEFAULT 0,
    dislike_count  BIGINT NOT NULL DEFAULT 0,
    comment_count  BIGINT NOT NULL DEFAULT 0,
    view_count     BIGINT NOT NULL DEFAULT 0,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_topics_created_at ON topics (created_at DESC);
CREATE INDEX IF NOT EXISTS idx_topics_category ON topics (category);

CREATE TABLE IF NOT EXISTS comments (
    id          BIGINT PRIMARY KEY,
    topic_id    BIGINT NOT NULL,
    user_id     BIGINT NOT NULL,
    content     TEXT NOT NULL,
    parent_id   BIGINT,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_comments_topic ON comments (topic_id, created_at);

CREATE TABLE IF NOT EXISTS votes (
    id          BIGINT PRIMARY KEY,
    user_id     BIGINT NOT NULL,
    topic_id    BIGINT NOT NULL,
    vote_type   SMALLINT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (user_id, topic_id)
);
"#;

const TOPIC_COLUMNS: &str = "t.id, t.user_id, COALESCE(u.username, ''), t.title, t.content, \
     t.category, t.like_count, t.dislike_count, t.comment_count, t.view_count, \
     t.created_at, t.updated_at";

const COMMENT_COLUMNS: &str = "c.id, c.topic_id, c.user_id, COALESCE(u.username, ''), \
     c.content, c.parent_id, c.created_at, c.updated_at";

// ============================================================================
// RECORD STORE
// ============================================================================

/// Database client that wraps a connection pool and implements the store
/// of record.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
}

impl DbClient {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Pool plus client in one step.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Connections currently open in the pool.
    pub fn pool_size(&self) -> usize {
        let status = self.pool.status();
        status.size
    }

    /// Create the tables if they do not exist.
    pub async fn apply_schema(&self) -> ApiResult<()> {
        let conn = self.pool.get().await?;
        conn.batch_execute(SCHEMA_SQL).await?;
        Ok(())
    }

    /// Check out a pooled connection.
    async fn get_conn(&self) -> BlossomResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get database connection");
            BlossomError::Storage(StorageError::Unavailable {
                reason: e.to_string(),
            })
        })
    }
}

// ============================================================================
// ERROR AND ROW MAPPING
// ============================================================================

fn query_error(err: tokio_postgres::Error) -> BlossomError {
    tracing::error!(error = ?err, "Postgres statement failed");
    if err.is_closed() {
        StorageError::Unavailable {
            reason: err.to_string(),
        }
        .into()
    } else {
        StorageError::QueryFailed {
            reason: err.to_string(),
        }
        .into()
    }
}

fn insert_error(entity: EntityKind) -> impl FnOnce(tokio_postgres::Error) -> BlossomError {
    move |err| {
        tracing::error!(entity = %entity, "Insert failed: {:?}", err);
        StorageError::InsertFailed {
            entity,
            reason: err.to_string(),
        }
        .into()
    }
}

fn update_error(entity: EntityKind, id: EntityId) -> impl FnOnce(tokio_postgres::Error) -> BlossomError {
    move |err| {
        tracing::error!(entity = %entity, id, "Update failed: {:?}", err);
        StorageError::UpdateFailed {
            entity,
            id,
            reason: err.to_string(),
        }
        .into()
    }
}

fn topic_from_row(row: &Row) -> Topic {
    Topic {
        id: row.get(0),
        user_id: row.get(1),
        username: row.get(2),
        title: row.get(3),
        content: row.get(4),
        category: row.get(5),
        like_count: row.get(6),
        dislike_count: row.get(7),
        comment_count: row.get(8),
        view_count: row.get(9),
        created_at: row.get(10),
        updated_at: row.get(11),
    }
}

fn comment_from_row(row: &Row) -> Comment {
    Comment {
        id: row.get(0),
        topic_id: row.get(1),
        user_id: row.get(2),
        username: row.get(3),
        content: row.get(4),
        parent_id: row.get(5),
        created_at: row.get(6),
        updated_at: row.get(7),
    }
}

fn vote_from_row(row: &Row) -> BlossomResult<Vote> {
    let raw: i16 = row.get(3);
    let kind = VoteKind::from_db_value(raw).map_err(|e| StorageError::QueryFailed {
        reason: e.to_string(),
    })?;
    Ok(Vote {
        id: row.get(0),
        user_id: row.get(1),
        topic_id: row.get(2),
        kind,
    })
}

/// ORDER BY clause of a topic list.
fn order_clause(sort: TopicSort) -> &'static str {
    match sort {
        TopicSort::New => "t.created_at DESC, t.id DESC",
        TopicSort::Like => "t.like_count DESC, t.id DESC",
        TopicSort::Hot => "(t.like_count * 3 + t.comment_count * 2 + t.view_count) DESC, t.id DESC",
    }
}

fn vote_column(kind: VoteKind) -> &'static str {
    match kind {
        VoteKind::Like => "like_count",
        VoteKind::Dislike => "dislike_count",
    }
}

// ============================================================================
// RECORD STORE
// ============================================================================

#[async_trait]
impl RecordStore for DbClient {
    // ========================================================================
    // USER OPERATIONS
    // ========================================================================

    async fn user_insert(&self, user: &User) -> BlossomResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO users (id, username, email, created_at) VALUES ($1, $2, $3, $4)",
            &[&user.id, &user.username, &user.email, &user.created_at],
        )
        .await
        .map_err(insert_error(EntityKind::User))?;
        Ok(())
    }

    async fn user_get(&self, id: EntityId) -> BlossomResult<Option<User>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT id, username, email, created_at FROM users WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(query_error)?;
        Ok(row.map(|row| User {
            id: row.get(0),
            username: row.get(1),
            email: row.get(2),
            created_at: row.get(3),
        }))
    }

    // ========================================================================
    // TOPIC OPERATIONS
    // ========================================================================

    async fn topic_insert(&self, topic: &Topic) -> BlossomResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO topics (id, user_id, title, content, category, like_count, \
             dislike_count, comment_count, view_count, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            &[
                &topic.id,
                &topic.user_id,
                &topic.title,
                &topic.content,
                &topic.category,
                &topic.like_count,
                &topic.dislike_count,
                &topic.comment_count,
                &topic.view_count,
                &topic.created_at,
                &topic.updated_at,
            ],
        )
        .await
        .map_err(insert_error(EntityKind::Topic))?;
        Ok(())
    }

    async fn topic_get(&self, id: EntityId) -> BlossomResult<Option<Topic>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM topics t LEFT JOIN users u ON u.id = t.user_id WHERE t.id = $1",
            TOPIC_COLUMNS
        );
        let row = conn.query_opt(&sql, &[&id]).await.map_err(query_error)?;
        Ok(row.as_ref().map(topic_from_row))
    }

    async fn topic_list(&self, query: &TopicListQuery) -> BlossomResult<(Vec<Topic>, i64)> {
        let conn = self.get_conn().await?;

        let total: i64 = conn
            .query_one(
                "SELECT COUNT(*) FROM topics WHERE ($1::text IS NULL OR category = $1)",
                &[&query.category],
            )
            .await
            .map_err(query_error)?
            .get(0);

        let sql = format!(
            "SELECT {} FROM topics t LEFT JOIN users u ON u.id = t.user_id \
             WHERE ($1::text IS NULL OR t.category = $1) \
             ORDER BY {} LIMIT $2 OFFSET $3",
            TOPIC_COLUMNS,
            order_clause(query.sort)
        );
        let rows = conn
            .query(&sql, &[&query.category, &query.page_size, &query.offset()])
            .await
            .map_err(query_error)?;

        Ok((rows.iter().map(topic_from_row).collect(), total))
    }

    async fn topic_list_recent(&self, limit: i64) -> BlossomResult<Vec<Topic>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM topics t LEFT JOIN users u ON u.id = t.user_id \
             ORDER BY t.created_at DESC, t.id DESC LIMIT $1",
            TOPIC_COLUMNS
        );
        let rows = conn.query(&sql, &[&limit]).await.map_err(query_error)?;
        Ok(rows.iter().map(topic_from_row).collect())
    }

    async fn topic_get_many(&self, ids: &[EntityId]) -> BlossomResult<Vec<Topic>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM topics t LEFT JOIN users u ON u.id = t.user_id WHERE t.id = ANY($1)",
            TOPIC_COLUMNS
        );
        let rows = conn.query(&sql, &[&ids]).await.map_err(query_error)?;
        Ok(rows.iter().map(topic_from_row).collect())
    }

    async fn topic_scan(&self, after: EntityId, limit: i64) -> BlossomResult<Vec<Topic>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM topics t LEFT JOIN users u ON u.id = t.user_id \
             WHERE t.id > $1 ORDER BY t.id ASC LIMIT $2",
            TOPIC_COLUMNS
        );
        let rows = conn.query(&sql, &[&after, &limit]).await.map_err(query_error)?;
        Ok(rows.iter().map(topic_from_row).collect())
    }

    async fn topic_increment_views(&self, id: EntityId) -> BlossomResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE topics SET view_count = view_count + 1 WHERE id = $1",
            &[&id],
        )
        .await
        .map_err(update_error(EntityKind::Topic, id))?;
        Ok(())
    }

    async fn topic_adjust_votes(
        &self,
        id: EntityId,
        kind: VoteKind,
        delta: i64,
    ) -> BlossomResult<()> {
        let conn = self.get_conn().await?;
        let column = vote_column(kind);
        let sql = format!(
            "UPDATE topics SET {col} = {col} + $2 WHERE id = $1",
            col = column
        );
        conn.execute(&sql, &[&id, &delta])
            .await
            .map_err(update_error(EntityKind::Topic, id))?;
        Ok(())
    }

    async fn topic_adjust_comments(&self, id: EntityId, delta: i64) -> BlossomResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE topics SET comment_count = comment_count + $2 WHERE id = $1",
            &[&id, &delta],
        )
        .await
        .map_err(update_error(EntityKind::Topic, id))?;
        Ok(())
    }

    // ========================================================================
    // VOTE OPERATIONS
    // ========================================================================

    async fn vote_get(&self, user_id: EntityId, topic_id: EntityId) -> BlossomResult<Option<Vote>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT id, user_id, topic_id, vote_type FROM votes \
                 WHERE user_id = $1 AND topic_id = $2",
                &[&user_id, &topic_id],
            )
            .await
            .map_err(query_error)?;
        row.as_ref().map(vote_from_row).transpose()
    }

    async fn vote_insert(&self, vote: &Vote) -> BlossomResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO votes (id, user_id, topic_id, vote_type) VALUES ($1, $2, $3, $4)",
            &[
                &vote.id,
                &vote.user_id,
                &vote.topic_id,
                &vote.kind.as_db_value(),
            ],
        )
        .await
        .map_err(insert_error(EntityKind::Vote))?;
        Ok(())
    }

    async fn vote_update(
        &self,
        user_id: EntityId,
        topic_id: EntityId,
        kind: VoteKind,
    ) -> BlossomResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE votes SET vote_type = $3 WHERE user_id = $1 AND topic_id = $2",
            &[&user_id, &topic_id, &kind.as_db_value()],
        )
        .await
        .map_err(update_error(EntityKind::Vote, topic_id))?;
        Ok(())
    }

    async fn vote_delete(&self, user_id: EntityId, topic_id: EntityId) -> BlossomResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "DELETE FROM votes WHERE user_id = $1 AND topic_id = $2",
            &[&user_id, &topic_id],
        )
        .await
        .map_err(update_error(EntityKind::Vote, topic_id))?;
        Ok(())
    }

    // ========================================================================
    // COMMENT OPERATIONS
    // ========================================================================

    async fn comment_insert(&self, comment: &Comment) -> BlossomResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO comments (id, topic_id, user_id, content, parent_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &comment.id,
                &comment.topic_id,
                &comment.user_id,
                &comment.content,
                &comment.parent_id,
                &comment.created_at,
                &comment.updated_at,
            ],
        )
        .await
        .map_err(insert_error(EntityKind::Comment))?;
        Ok(())
    }

    async fn comment_get(&self, id: EntityId) -> BlossomResult<Option<Comment>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM comments c LEFT JOIN users u ON u.id = c.user_id WHERE c.id = $1",
            COMMENT_COLUMNS
        );
        let row = conn.query_opt(&sql, &[&id]).await.map_err(query_error)?;
        Ok(row.as_ref().map(comment_from_row))
    }

    async fn comment_list_by_topic(
        &self,
        topic_id: EntityId,
        query: &CommentListQuery,
    ) -> BlossomResult<(Vec<Comment>, i64)> {
        let total = self.comment_count_by_topic(topic_id).await?;

        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM comments c LEFT JOIN users u ON u.id = c.user_id \
             WHERE c.topic_id = $1 ORDER BY c.created_at ASC, c.id ASC LIMIT $2 OFFSET $3",
            COMMENT_COLUMNS
        );
        let rows = conn
            .query(&sql, &[&topic_id, &query.page_size, &query.offset()])
            .await
            .map_err(query_error)?;

        Ok((rows.iter().map(comment_from_row).collect(), total))
    }

    async fn comment_delete(&self, id: EntityId) -> BlossomResult<()> {
        let conn = self.get_conn().await?;
        let affected = conn
            .execute("DELETE FROM comments WHERE id = $1", &[&id])
            .await
            .map_err(update_error(EntityKind::Comment, id))?;
        if affected == 0 {
            return Err(BlossomError::not_found(EntityKind::Comment, id));
        }
        Ok(())
    }

    async fn comment_count_by_topic(&self, topic_id: EntityId) -> BlossomResult<i64> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_one(
                "SELECT COUNT(*) FROM comments WHERE topic_id = $1",
                &[&topic_id],
            )
            .await
            .map_err(query_error)?;
        Ok(row.get(0))
    }
}
