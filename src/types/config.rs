//! Configuration structures.
//!
//! Plain values only: the surrounding service loads them from wherever it
//! likes and hands the structs to the components that consume them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::limiter::LimitScope;

/// Global core configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Admission-control limits.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Tool discovery and invocation behaviour.
    #[serde(default)]
    pub tool_client: ToolClientConfig,

    /// Shared limiter store tuning.
    #[serde(default)]
    pub store: StoreConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Per-scope admission limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub ip_per_minute: u32,
    pub ip_per_hour: u32,
    pub user_per_minute: u32,
    pub user_per_hour: u32,

    /// Sustained tool invocations per minute (sliding window).
    pub tool_per_minute: u32,

    /// Tool burst bucket capacity.
    pub tool_burst_capacity: u32,

    /// Tool burst bucket refill rate (tokens per second).
    pub tool_refill_per_second: f64,

    /// Admit when the shared store fails. When false, store failures deny.
    pub fail_open: bool,

    /// Identifier-specific limits that replace the scope defaults.
    pub overrides: Vec<LimitOverride>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ip_per_minute: 60,
            ip_per_hour: 1000,
            user_per_minute: 100,
            user_per_hour: 2000,
            tool_per_minute: 30,
            tool_burst_capacity: 10,
            tool_refill_per_second: 1.0,
            fail_open: true,
            overrides: Vec::new(),
        }
    }
}

impl RateLimitConfig {
    /// Active override for a scope/identifier pair, if any.
    pub fn override_for(&self, scope: LimitScope, identifier: &str) -> Option<&LimitOverride> {
        self.overrides
            .iter()
            .find(|o| o.active && o.scope == scope && o.identifier == identifier)
    }

    /// Effective (per-minute, per-hour) limits for a scope/identifier pair.
    pub fn limits_for(&self, scope: LimitScope, identifier: &str) -> (u32, u32) {
        let defaults = match scope {
            LimitScope::Ip => (self.ip_per_minute, self.ip_per_hour),
            LimitScope::User => (self.user_per_minute, self.user_per_hour),
            // Tools only have a per-minute window; hour is unused.
            LimitScope::Tool => (self.tool_per_minute, u32::MAX),
        };
        match self.override_for(scope, identifier) {
            Some(o) => (o.per_minute, o.per_hour),
            None => defaults,
        }
    }

    /// Effective burst capacity for a tool identifier.
    pub fn burst_for(&self, identifier: &str) -> u32 {
        self.override_for(LimitScope::Tool, identifier)
            .and_then(|o| o.burst)
            .unwrap_or(self.tool_burst_capacity)
    }
}

/// Identifier-specific limit set (e.g. a partner IP or a premium tool).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitOverride {
    pub scope: LimitScope,
    pub identifier: String,
    pub per_minute: u32,
    pub per_hour: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<u32>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Tool discovery and invocation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolClientConfig {
    /// Hard per-attempt deadline.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Total attempts allowed per invocation.
    pub max_retries: u32,

    /// Linear backoff unit: attempt `n` waits `n * retry_base_delay`.
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,

    /// Retry connection-level failures (reset, refused) like timeouts.
    pub retry_transport_errors: bool,

    /// Deadline for `GET /health` probes.
    #[serde(with = "humantime_serde")]
    pub health_probe_timeout: Duration,

    /// Upstream error bodies are truncated to this many characters.
    pub max_error_body_chars: usize,
}

impl Default for ToolClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_transport_errors: true,
            health_probe_timeout: Duration::from_secs(5),
            max_error_body_chars: 200,
        }
    }
}

/// Shared limiter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How often the janitor purges expired entries.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Number of independently locked shards in the in-memory store.
    pub shard_count: usize,

    /// Idle lifetime of token-bucket state.
    #[serde(with = "humantime_serde")]
    pub bucket_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            shard_count: 16,
            bucket_ttl: Duration::from_secs(3600),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
