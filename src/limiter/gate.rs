//! Admission gate - the policy applied at the edge.
//!
//! Checks run in fixed precedence and stop at the first denial:
//!   1. IP per-minute
//!   2. IP per-hour
//!   3. user per-minute (authenticated only)
//!   4. user per-hour (authenticated only)
//!   5. tool burst bucket, then tool per-minute window (tool calls only)

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use super::lifecycle::StoreHandle;
use super::sliding_window::SlidingWindowLimiter;
use super::store::LimiterStore;
use super::token_bucket::TokenBucketLimiter;
use super::{LimitScope, LimitWindow, LimiterDecision, LimiterKey};
use crate::clock::Clock;
use crate::types::{RateLimitConfig, Result};

/// Composes the sliding window and token bucket limiters into one decision.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    windows: SlidingWindowLimiter,
    buckets: TokenBucketLimiter,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl AdmissionGate {
    pub fn new(
        store: Arc<dyn LimiterStore>,
        clock: Arc<dyn Clock>,
        config: RateLimitConfig,
        bucket_ttl: Duration,
    ) -> Self {
        Self {
            windows: SlidingWindowLimiter::new(store.clone(), clock.clone()),
            buckets: TokenBucketLimiter::new(store, clock.clone(), bucket_ttl),
            clock,
            config,
        }
    }

    /// Build a gate over a started store handle.
    pub fn from_handle(handle: &StoreHandle, config: RateLimitConfig) -> Self {
        Self::new(handle.store(), handle.clock(), config, handle.bucket_ttl())
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Sliding window limiter used by the gate, for usage queries and resets.
    pub fn windows(&self) -> &SlidingWindowLimiter {
        &self.windows
    }

    /// Evaluate an inbound request.
    ///
    /// Returns the first denial, or when everything admits, the admitted
    /// decision with the least headroom. Never fails: store errors follow the
    /// configured fail-open/fail-closed policy.
    pub async fn evaluate(
        &self,
        ip: &str,
        user_id: Option<&str>,
        tool_id: Option<&str>,
    ) -> LimiterDecision {
        let user_id = user_id.filter(|u| !u.is_empty());
        let tool_id = tool_id.filter(|t| !t.is_empty());

        let (ip_minute, ip_hour) = self.config.limits_for(LimitScope::Ip, ip);
        let mut binding = self
            .window_step(LimiterKey::ip(ip, LimitWindow::Minute), ip_minute)
            .await;
        if !binding.allowed {
            return self.deny(binding, LimitScope::Ip, ip);
        }

        let decision = self
            .window_step(LimiterKey::ip(ip, LimitWindow::Hour), ip_hour)
            .await;
        if !decision.allowed {
            return self.deny(decision, LimitScope::Ip, ip);
        }
        binding = tighter(binding, decision);

        if let Some(user) = user_id {
            let (user_minute, user_hour) = self.config.limits_for(LimitScope::User, user);
            for (window, limit) in [
                (LimitWindow::Minute, user_minute),
                (LimitWindow::Hour, user_hour),
            ] {
                let decision = self
                    .window_step(LimiterKey::user(user, window), limit)
                    .await;
                if !decision.allowed {
                    return self.deny(decision, LimitScope::User, user);
                }
                binding = tighter(binding, decision);
            }
        }

        if let Some(tool) = tool_id {
            let decision = self.tool_steps(tool, user_id, ip).await;
            if !decision.allowed {
                return decision;
            }
            binding = tighter(binding, decision);
        }

        binding
    }

    /// Tool-only check for callers that already passed the edge gate.
    pub async fn evaluate_tool(
        &self,
        tool_id: &str,
        user_id: Option<&str>,
        ip: &str,
    ) -> LimiterDecision {
        self.tool_steps(tool_id, user_id.filter(|u| !u.is_empty()), ip)
            .await
    }

    /// Burst bucket, then the sustained per-minute window. A window denial
    /// keeps the burst token it already spent.
    async fn tool_steps(&self, tool_id: &str, user_id: Option<&str>, ip: &str) -> LimiterDecision {
        let key = LimiterKey::tool(tool_id, user_id, ip);

        let burst = self.burst_step(key.identifier(), tool_id).await;
        if !burst.allowed {
            return self.deny(burst, LimitScope::Tool, key.identifier());
        }

        let (tool_minute, _) = self.config.limits_for(LimitScope::Tool, tool_id);
        let identifier = key.identifier().to_string();
        let decision = self.window_step(key, tool_minute).await;
        if !decision.allowed {
            return self.deny(decision, LimitScope::Tool, &identifier);
        }
        tighter(burst, decision)
    }

    async fn window_step(&self, key: LimiterKey, limit: u32) -> LimiterDecision {
        let window_seconds = key.window().seconds();
        let result = self.windows.check(&key, limit, window_seconds).await;
        self.apply_store_policy(result, limit, window_seconds, &key.storage_key())
    }

    async fn burst_step(&self, bucket_identifier: &str, tool_id: &str) -> LimiterDecision {
        let capacity = self.config.burst_for(tool_id);
        let result = self
            .buckets
            .consume_decision(
                &format!("tool:{bucket_identifier}"),
                1,
                capacity,
                self.config.tool_refill_per_second,
            )
            .await;
        let window_seconds = if self.config.tool_refill_per_second > 0.0 {
            (f64::from(capacity) / self.config.tool_refill_per_second).ceil() as u64
        } else {
            LimitWindow::Minute.seconds()
        };
        self.apply_store_policy(result, capacity, window_seconds, bucket_identifier)
    }

    fn apply_store_policy(
        &self,
        result: Result<LimiterDecision>,
        limit: u32,
        window_seconds: u64,
        key: &str,
    ) -> LimiterDecision {
        match result {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    key,
                    error = %e,
                    fail_open = self.config.fail_open,
                    "limiter_store_unavailable"
                );
                let now = self.clock.now();
                LimiterDecision {
                    allowed: self.config.fail_open,
                    limit,
                    remaining: if self.config.fail_open { limit } else { 0 },
                    reset_at_epoch_seconds: (now + window_seconds as f64).floor() as i64,
                    window_seconds,
                }
            }
        }
    }

    fn deny(&self, decision: LimiterDecision, scope: LimitScope, identifier: &str) -> LimiterDecision {
        tracing::info!(
            scope = scope.as_str(),
            identifier,
            limit = decision.limit,
            window_seconds = decision.window_seconds,
            "admission_denied"
        );
        decision
    }
}

/// The decision with less headroom; ties keep the earlier one.
fn tighter(current: LimiterDecision, candidate: LimiterDecision) -> LimiterDecision {
    if candidate.remaining < current.remaining {
        candidate
    } else {
        current
    }
}

/// Resolve the client address: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the socket peer, then `"unknown"`.
pub fn client_ip(forwarded_for: Option<&str>, real_ip: Option<&str>, peer: Option<IpAddr>) -> String {
    if let Some(first) = forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real) = real_ip.map(str::trim).filter(|v| !v.is_empty()) {
        return real.to_string();
    }
    peer.map(|p| p.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
