//! Admission control: sliding-window counters and token buckets over a
//! shared store.
//!
//! ```text
//!   request ──► AdmissionGate ──► ip/minute ─► ip/hour ─► user/minute ─► user/hour ─► tool burst ─► tool/minute
//!                    │                 (first denial short-circuits)
//!                    ▼
//!            SlidingWindowLimiter / TokenBucketLimiter
//!                    │
//!                    ▼
//!              LimiterStore (one key = one unit of atomicity)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Error, Result};

pub mod gate;
pub mod lifecycle;
pub mod sliding_window;
pub mod store;
pub mod token_bucket;

pub use gate::{client_ip, AdmissionGate};
pub use lifecycle::{StoreHandle, StoreJanitor};
pub use sliding_window::SlidingWindowLimiter;
pub use store::{BucketOutcome, InMemoryStore, LimiterStore, WindowCount};
pub use token_bucket::{refill_and_debit, TokenBucketLimiter};

// =============================================================================
// Keys
// =============================================================================

/// What a counter series is counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScope {
    Ip,
    User,
    Tool,
}

impl LimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitScope::Ip => "ip",
            LimitScope::User => "user",
            LimitScope::Tool => "tool",
        }
    }
}

/// Window length of a counter series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitWindow {
    Minute,
    Hour,
}

impl LimitWindow {
    pub fn seconds(&self) -> u64 {
        match self {
            LimitWindow::Minute => 60,
            LimitWindow::Hour => 3600,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitWindow::Minute => "minute",
            LimitWindow::Hour => "hour",
        }
    }
}

/// Address of one counter series. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimiterKey {
    scope: LimitScope,
    identifier: String,
    window: LimitWindow,
}

impl LimiterKey {
    pub fn new(scope: LimitScope, identifier: impl Into<String>, window: LimitWindow) -> Self {
        Self {
            scope,
            identifier: identifier.into(),
            window,
        }
    }

    pub fn ip(ip: &str, window: LimitWindow) -> Self {
        Self::new(LimitScope::Ip, ip, window)
    }

    pub fn user(user_id: &str, window: LimitWindow) -> Self {
        Self::new(LimitScope::User, user_id, window)
    }

    /// Tool series are partitioned per caller: per user when authenticated,
    /// per IP otherwise.
    pub fn tool(tool_id: &str, user_id: Option<&str>, ip: &str) -> Self {
        let identifier = match user_id {
            Some(user) => format!("{tool_id}:user:{user}"),
            None => format!("{tool_id}:ip:{ip}"),
        };
        Self::new(LimitScope::Tool, identifier, LimitWindow::Minute)
    }

    pub fn scope(&self) -> LimitScope {
        self.scope
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn window(&self) -> LimitWindow {
        self.window
    }

    /// Key under which the series lives in the shared store.
    pub fn storage_key(&self) -> String {
        format!(
            "ratelimit:{}:{}:{}",
            self.scope.as_str(),
            self.identifier,
            self.window.as_str()
        )
    }
}

impl fmt::Display for LimiterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

// =============================================================================
// Decisions
// =============================================================================

/// Outcome of one admission check, with the quota metadata callers surface
/// as rate-limit headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at_epoch_seconds: i64,
    pub window_seconds: u64,
}

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

impl LimiterDecision {
    /// Standard rate-limit headers. `Retry-After` is only present on denial.
    pub fn rate_limit_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset_at_epoch_seconds.to_string()),
        ];
        if !self.allowed {
            headers.push((HEADER_RETRY_AFTER, self.window_seconds.to_string()));
        }
        headers
    }

    /// `Ok(self)` when admitted, `Err(RateLimitExceeded)` otherwise.
    pub fn into_result(self) -> Result<LimiterDecision> {
        if self.allowed {
            Ok(self)
        } else {
            Err(Error::rate_limited(self))
        }
    }
}

// =============================================================================
// Bucket state
// =============================================================================

/// Token-bucket state as persisted in the store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    pub available_tokens: f64,
    pub last_refill_epoch_seconds: f64,
}
