//! Shared limiter store.
//!
//! The store exposes the two atomic primitives the limiters need, each
//! covering a full read-modify-write of a single key. Cross-key operations
//! never need coordination.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use tokio::sync::Mutex;

use super::token_bucket::refill_and_debit;
use super::BucketState;
use crate::types::Result;

/// Result of the evict+count+conditional-insert primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Events inside the window before this request.
    pub count: u64,
    /// Whether this request was recorded.
    pub admitted: bool,
}

/// Result of the read+refill+debit primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketOutcome {
    pub admitted: bool,
    /// State after the operation (debited only when admitted).
    pub state: BucketState,
}

/// Shared key/value store backing the limiters.
///
/// Implementations must execute each method as one atomic unit per key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LimiterStore: Send + Sync + std::fmt::Debug {
    /// Evict events at or before `now - window_seconds`, count survivors and,
    /// if the count is below `limit`, record `now` and push the key's expiry
    /// to `now + ttl_seconds`.
    async fn record_event(
        &self,
        key: &str,
        now: f64,
        window_seconds: u64,
        limit: u32,
        ttl_seconds: u64,
    ) -> Result<WindowCount>;

    /// Evict stale events and return the live count without recording.
    async fn window_count(&self, key: &str, now: f64, window_seconds: u64) -> Result<u64>;

    /// Lazily refill the bucket, then debit `requested` tokens if available.
    async fn consume_tokens(
        &self,
        bucket_id: &str,
        now: f64,
        requested: u32,
        capacity: u32,
        refill_per_second: f64,
        ttl_seconds: u64,
    ) -> Result<BucketOutcome>;

    /// Drop a key. Returns whether something was removed.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Drop every entry whose expiry is at or before `now`.
    async fn purge_expired(&self, now: f64) -> Result<usize>;
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Debug, Default)]
struct Series {
    events: VecDeque<f64>,
    expires_at: f64,
}

impl Series {
    fn evict(&mut self, cutoff: f64) {
        while let Some(&ts) = self.events.front() {
            if ts <= cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug)]
struct Bucket {
    state: BucketState,
    expires_at: f64,
}

#[derive(Debug, Default)]
struct Shard {
    series: HashMap<String, Series>,
    buckets: HashMap<String, Bucket>,
}

impl Shard {
    fn len(&self) -> usize {
        self.series.len() + self.buckets.len()
    }
}

/// Process-local store. Keys hash onto independently locked shards; a key's
/// shard lock is held for the whole primitive.
#[derive(Debug)]
pub struct InMemoryStore {
    shards: Vec<Mutex<Shard>>,
}

impl InMemoryStore {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(Shard::default())).collect(),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    /// Number of live keys across all shards.
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.lock().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(16)
    }
}

#[async_trait]
impl LimiterStore for InMemoryStore {
    async fn record_event(
        &self,
        key: &str,
        now: f64,
        window_seconds: u64,
        limit: u32,
        ttl_seconds: u64,
    ) -> Result<WindowCount> {
        let mut shard = self.shard(key).lock().await;
        let series = shard.series.entry(key.to_string()).or_default();

        // An expired key is a cold key.
        if series.expires_at <= now {
            series.events.clear();
        }
        series.evict(now - window_seconds as f64);

        let count = series.events.len() as u64;
        let admitted = count < u64::from(limit);
        if admitted {
            series.events.push_back(now);
            series.expires_at = now + ttl_seconds as f64;
        }

        Ok(WindowCount { count, admitted })
    }

    async fn window_count(&self, key: &str, now: f64, window_seconds: u64) -> Result<u64> {
        let mut shard = self.shard(key).lock().await;
        match shard.series.get_mut(key) {
            Some(series) if series.expires_at > now => {
                series.evict(now - window_seconds as f64);
                Ok(series.events.len() as u64)
            }
            _ => Ok(0),
        }
    }

    async fn consume_tokens(
        &self,
        bucket_id: &str,
        now: f64,
        requested: u32,
        capacity: u32,
        refill_per_second: f64,
        ttl_seconds: u64,
    ) -> Result<BucketOutcome> {
        let mut shard = self.shard(bucket_id).lock().await;

        let previous = shard
            .buckets
            .get(bucket_id)
            .filter(|bucket| bucket.expires_at > now)
            .map(|bucket| bucket.state);
        let (state, admitted) =
            refill_and_debit(previous, now, requested, capacity, refill_per_second);

        shard.buckets.insert(
            bucket_id.to_string(),
            Bucket {
                state,
                expires_at: now + ttl_seconds as f64,
            },
        );

        Ok(BucketOutcome { admitted, state })
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut shard = self.shard(key).lock().await;
        let series = shard.series.remove(key).is_some();
        let bucket = shard.buckets.remove(key).is_some();
        Ok(series || bucket)
    }

    async fn purge_expired(&self, now: f64) -> Result<usize> {
        let mut purged = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().await;
            let before = shard.len();
            shard.series.retain(|_, series| series.expires_at > now);
            shard.buckets.retain(|_, bucket| bucket.expires_at > now);
            purged += before - shard.len();
        }
        Ok(purged)
    }
}
