//! Rate limiting for guardian-relay.
//!
//! Three governor limiters:
//! - per validated [`DeviceId`] for authenticated operations
//! - per presented identity for authentication attempts, with one shared
//!   bucket for identities that are not valid device ids
//! - one global limiter across all callers
//!
//! Keyed limiters are backed by DashMap.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use guardian_types::DeviceId;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the relay.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits authenticated operations per device.
    request_limiter: Arc<KeyedLimiter<DeviceId>>,

    /// Limits authentication attempts per presented identity.
    ///
    /// Unknown but well-formed identities get their own key, so they are
    /// throttled too. `None` is the bucket for malformed ones.
    auth_limiter: Arc<KeyedLimiter<Option<DeviceId>>>,

    /// Caps aggregate throughput even if every device is within its quota.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("request_limiter", &"KeyedLimiter<DeviceId>")
            .field("auth_limiter", &"KeyedLimiter<Option<DeviceId>>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            request_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(
                config.requests_per_minute,
            ))),
            auth_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(
                config.auth_attempts_per_minute,
            ))),
            global_limiter: Arc::new(RateLimiter::direct(Quota::per_second(
                config.global_requests_per_second,
            ))),
        }
    }

    /// Check if an authenticated operation by `device` is allowed.
    pub fn check_request(&self, device: &DeviceId) -> Result<(), RateLimitError> {
        self.request_limiter
            .check_key(device)
            .map_err(|_| RateLimitError::RequestLimitExceeded)
    }

    /// Check if an authentication attempt for `identity` is allowed.
    ///
    /// Pass `None` when the presented identity did not parse; all such
    /// attempts share one quota.
    pub fn check_auth(&self, identity: Option<&DeviceId>) -> Result<(), RateLimitError> {
        self.auth_limiter
            .check_key(&identity.cloned())
            .map_err(|_| RateLimitError::AuthLimitExceeded)
    }

    /// Check if the global request rate is within limits.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Number of tracked device keys (for metrics).
    pub fn request_keys_count(&self) -> usize {
        self.request_limiter.len()
    }

    /// Number of tracked authentication keys (for metrics).
    pub fn auth_keys_count(&self) -> usize {
        self.auth_limiter.len()
    }

    /// Evict entries whose quota has fully recharged.
    ///
    /// Called periodically from the cleanup task.
    pub fn shrink(&self) {
        self.request_limiter.retain_recent();
        self.auth_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Too many requests from this device.
    RequestLimitExceeded,
    /// Too many authentication attempts for this identity.
    AuthLimitExceeded,
    /// Global request rate exceeded across all clients.
    GlobalLimitExceeded,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestLimitExceeded => write!(f, "request rate limit exceeded"),
            Self::AuthLimitExceeded => write!(f, "authentication rate limit exceeded"),
            Self::GlobalLimitExceeded => write!(f, "global rate limit exceeded"),
        }
    }
}

impl std::error::Error for RateLimitError {}
