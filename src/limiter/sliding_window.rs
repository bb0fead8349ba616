//! Sliding window rate limiting.
//!
//! Each key holds the timestamps of admitted events. A check evicts events
//! older than the window, counts the survivors and records the new event only
//! when under the limit, all inside one store primitive.

use std::sync::Arc;

use super::store::LimiterStore;
use super::{LimiterDecision, LimiterKey};
use crate::clock::Clock;
use crate::types::Result;

/// Extra lifetime given to a series beyond its window.
const EXPIRY_MARGIN_SECONDS: u64 = 1;

/// Sliding window limiter over the shared store.
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    store: Arc<dyn LimiterStore>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn LimiterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Check the key and record the request if admitted.
    pub async fn check(
        &self,
        key: &LimiterKey,
        limit: u32,
        window_seconds: u64,
    ) -> Result<LimiterDecision> {
        let now = self.clock.now();
        let storage_key = key.storage_key();
        let outcome = self
            .store
            .record_event(
                &storage_key,
                now,
                window_seconds,
                limit,
                window_seconds + EXPIRY_MARGIN_SECONDS,
            )
            .await?;

        let count = u32::try_from(outcome.count).unwrap_or(u32::MAX);
        let remaining = if outcome.admitted {
            limit.saturating_sub(count).saturating_sub(1)
        } else {
            limit.saturating_sub(count)
        };

        tracing::debug!(
            key = %storage_key,
            count = outcome.count,
            limit,
            admitted = outcome.admitted,
            "sliding_window_check"
        );

        Ok(LimiterDecision {
            allowed: outcome.admitted,
            limit,
            remaining,
            reset_at_epoch_seconds: (now + window_seconds as f64).floor() as i64,
            window_seconds,
        })
    }

    /// Live event count for a key without recording anything.
    pub async fn usage(&self, key: &LimiterKey, window_seconds: u64) -> Result<u64> {
        self.store
            .window_count(&key.storage_key(), self.clock.now(), window_seconds)
            .await
    }

    /// Clear a key's series.
    pub async fn reset(&self, key: &LimiterKey) -> Result<bool> {
        self.store.remove(&key.storage_key()).await
    }
}
