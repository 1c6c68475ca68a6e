//! Blossom API - Backends, Services and Jobs
//!
//! The runtime half of the forum consistency layer: PostgreSQL, Redis and
//! Elasticsearch implementations of the storage traits, the services the
//! HTTP layer calls, the hot-ranking and index-sync jobs, and the ambient
//! configuration, error, throttle and telemetry plumbing around them.

pub mod background;
pub mod config;
pub mod constants;
pub mod db;
pub mod elastic;
pub mod error;
pub mod jobs;
pub mod redis_store;
pub mod services;
pub mod state;
pub mod stream_feed;
pub mod telemetry;
pub mod throttle;

// Re-export commonly used types
pub use background::BackgroundTasks;
pub use config::{BlossomConfig, ChangeFeedConfig, RedisConfig, SearchConfig};
pub use db::{DbClient, DbConfig};
pub use elastic::ElasticSearchIndex;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use redis_store::RedisCoordinationStore;
pub use services::{AdminService, CommentService, SearchService, TopicService, VoteOutcome};
pub use state::{AppState, Backends};
pub use stream_feed::RedisStreamChangeSource;
pub use throttle::{RequestThrottle, ThrottleConfig, ThrottleKey};
