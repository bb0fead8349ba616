//! Token bucket burst control.
//!
//! Refill is computed lazily on each consume; there is no background timer.

use std::sync::Arc;
use std::time::Duration;

use super::store::LimiterStore;
use super::{BucketState, LimiterDecision};
use crate::clock::Clock;
use crate::types::Result;

/// Refill `previous` up to `now`, then try to debit `requested`.
///
/// A missing state starts full. Returns the state to persist (debited only on
/// admission) and whether the request was admitted. Available tokens never
/// exceed `capacity`.
pub fn refill_and_debit(
    previous: Option<BucketState>,
    now: f64,
    requested: u32,
    capacity: u32,
    refill_per_second: f64,
) -> (BucketState, bool) {
    let capacity = f64::from(capacity);
    let current = previous.unwrap_or(BucketState {
        available_tokens: capacity,
        last_refill_epoch_seconds: now,
    });

    let elapsed = (now - current.last_refill_epoch_seconds).max(0.0);
    let refill = elapsed * refill_per_second.max(0.0);
    let available = (current.available_tokens + refill).min(capacity);

    let requested = f64::from(requested);
    if available >= requested {
        (
            BucketState {
                available_tokens: available - requested,
                last_refill_epoch_seconds: now,
            },
            true,
        )
    } else {
        (
            BucketState {
                available_tokens: available,
                last_refill_epoch_seconds: now,
            },
            false,
        )
    }
}

/// Seconds until `deficit` tokens have refilled, rounded up, at least one.
fn seconds_until(deficit: f64, refill_per_second: f64, fallback: u64) -> u64 {
    if refill_per_second <= 0.0 {
        return fallback;
    }
    ((deficit / refill_per_second).ceil() as u64).max(1)
}

/// Burst limiter backed by the shared store.
#[derive(Debug, Clone)]
pub struct TokenBucketLimiter {
    store: Arc<dyn LimiterStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl TokenBucketLimiter {
    pub fn new(store: Arc<dyn LimiterStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    fn storage_key(bucket_id: &str) -> String {
        format!("bucket:{bucket_id}")
    }

    /// Consume tokens. Returns `(admitted, whole tokens remaining)`.
    pub async fn consume(
        &self,
        bucket_id: &str,
        tokens_requested: u32,
        capacity: u32,
        refill_per_second: f64,
    ) -> Result<(bool, u32)> {
        let outcome = self
            .store
            .consume_tokens(
                &Self::storage_key(bucket_id),
                self.clock.now(),
                tokens_requested,
                capacity,
                refill_per_second,
                self.ttl.as_secs(),
            )
            .await?;
        Ok((outcome.admitted, outcome.state.available_tokens.floor() as u32))
    }

    /// Consume and project the outcome onto a [`LimiterDecision`].
    ///
    /// `window_seconds` is the wait until the request could succeed (denied)
    /// or until the bucket is full again (admitted).
    pub async fn consume_decision(
        &self,
        bucket_id: &str,
        tokens_requested: u32,
        capacity: u32,
        refill_per_second: f64,
    ) -> Result<LimiterDecision> {
        let now = self.clock.now();
        let outcome = self
            .store
            .consume_tokens(
                &Self::storage_key(bucket_id),
                now,
                tokens_requested,
                capacity,
                refill_per_second,
                self.ttl.as_secs(),
            )
            .await?;

        let available = outcome.state.available_tokens;
        let fallback = self.ttl.as_secs().max(1);
        let window_seconds = if outcome.admitted {
            seconds_until(f64::from(capacity) - available, refill_per_second, fallback)
        } else {
            seconds_until(
                f64::from(tokens_requested) - available,
                refill_per_second,
                fallback,
            )
        };

        tracing::debug!(
            bucket_id,
            admitted = outcome.admitted,
            available,
            "token_bucket_consume"
        );

        Ok(LimiterDecision {
            allowed: outcome.admitted,
            limit: capacity,
            remaining: available.floor() as u32,
            reset_at_epoch_seconds: now.floor() as i64 + window_seconds as i64,
            window_seconds,
        })
    }
}
