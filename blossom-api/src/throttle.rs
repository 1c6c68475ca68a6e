//! Request Throttle
//!
//! Token-bucket limits for whichever HTTP layer fronts the services: one
//! global bucket plus a bucket per user (authenticated) or per client IP
//! (anonymous). Rejections carry a retry-after in whole seconds.

use crate::constants::{
    DEFAULT_GLOBAL_BURST, DEFAULT_GLOBAL_RATE_PER_SEC, DEFAULT_IP_BURST, DEFAULT_IP_RATE_PER_SEC,
    DEFAULT_USER_BURST, DEFAULT_USER_RATE_PER_SEC,
};
use crate::error::{ApiError, ApiResult};
use blossom_core::EntityId;
use dashmap::DashMap;
use governor::{clock::DefaultClock, Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub enabled: bool,
    pub global_per_sec: u32,
    pub global_burst: u32,
    pub user_per_sec: u32,
    pub user_burst: u32,
    pub ip_per_sec: u32,
    pub ip_burst: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global_per_sec: DEFAULT_GLOBAL_RATE_PER_SEC,
            global_burst: DEFAULT_GLOBAL_BURST,
            user_per_sec: DEFAULT_USER_RATE_PER_SEC,
            user_burst: DEFAULT_USER_BURST,
            ip_per_sec: DEFAULT_IP_RATE_PER_SEC,
            ip_burst: DEFAULT_IP_BURST,
        }
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl ThrottleConfig {
    /// # Environment Variables
    /// - `BLOSSOM_RATE_LIMIT_ENABLED` (default: true)
    /// - `BLOSSOM_RATE_GLOBAL_PER_SEC` / `BLOSSOM_RATE_GLOBAL_BURST` (default: 100 / 200)
    /// - `BLOSSOM_RATE_USER_PER_SEC` / `BLOSSOM_RATE_USER_BURST` (default: 50 / 100)
    /// - `BLOSSOM_RATE_IP_PER_SEC` / `BLOSSOM_RATE_IP_BURST` (default: 20 / 40)
    pub fn from_env() -> Self {
        Self {
            enabled: std::env::var("BLOSSOM_RATE_LIMIT_ENABLED")
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(true),
            global_per_sec: env_u32("BLOSSOM_RATE_GLOBAL_PER_SEC", DEFAULT_GLOBAL_RATE_PER_SEC),
            global_burst: env_u32("BLOSSOM_RATE_GLOBAL_BURST", DEFAULT_GLOBAL_BURST),
            user_per_sec: env_u32("BLOSSOM_RATE_USER_PER_SEC", DEFAULT_USER_RATE_PER_SEC),
            user_burst: env_u32("BLOSSOM_RATE_USER_BURST", DEFAULT_USER_BURST),
            ip_per_sec: env_u32("BLOSSOM_RATE_IP_PER_SEC", DEFAULT_IP_RATE_PER_SEC),
            ip_burst: env_u32("BLOSSOM_RATE_IP_BURST", DEFAULT_IP_BURST),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

fn quota(per_sec: u32, burst: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(per_sec).unwrap_or(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN))
}

// ============================================================================
// THROTTLE
// ============================================================================

/// Bucket key below the global limit.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum ThrottleKey {
    User(EntityId),
    Ip(IpAddr),
}

#[derive(Clone)]
pub struct RequestThrottle {
    config: Arc<ThrottleConfig>,
    global: Arc<DirectRateLimiter>,
    limiters: Arc<DashMap<ThrottleKey, Arc<DirectRateLimiter>>>,
}

impl RequestThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        let global = RateLimiter::direct(quota(config.global_per_sec, config.global_burst));
        Self {
            config: Arc::new(config),
            global: Arc::new(global),
            limiters: Arc::new(DashMap::new()),
        }
    }

    /// Admit or reject one request. `user_id` selects the per-user bucket;
    /// anonymous requests fall back to the per-IP bucket.
    pub fn check(&self, user_id: Option<EntityId>, ip: IpAddr) -> ApiResult<()> {
        self.check_global()?;
        match user_id {
            Some(id) => self.check_user(id),
            None => self.check_ip(ip),
        }
    }

    pub fn check_global(&self) -> ApiResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        admit(&self.global)
    }

    pub fn check_user(&self, user_id: EntityId) -> ApiResult<()> {
        self.check_key(ThrottleKey::User(user_id))
    }

    pub fn check_ip(&self, ip: IpAddr) -> ApiResult<()> {
        self.check_key(ThrottleKey::Ip(ip))
    }

    /// Number of per-key buckets created so far.
    pub fn tracked_keys(&self) -> usize {
        self.limiters.len()
    }

    fn check_key(&self, key: ThrottleKey) -> ApiResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let limiter = self
            .limiters
            .entry(key)
            .or_insert_with(|| {
                let quota = match key {
                    ThrottleKey::User(_) => quota(self.config.user_per_sec, self.config.user_burst),
                    ThrottleKey::Ip(_) => quota(self.config.ip_per_sec, self.config.ip_burst),
                };
                Arc::new(RateLimiter::direct(quota))
            })
            .clone();

        admit(&limiter).inspect_err(|_| tracing::debug!(key = ?key, "Request throttled"))
    }
}

fn admit(limiter: &DirectRateLimiter) -> ApiResult<()> {
    limiter.check().map_err(|not_until| {
        let retry_after = not_until
            .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
            .as_secs()
            .max(1);
        ApiError::too_many_requests(Some(retry_after))
    })
}
