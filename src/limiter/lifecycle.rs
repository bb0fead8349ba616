//! Store lifecycle: the process-wide handle and its background janitor.
//!
//! The janitor periodically drops expired series and buckets so a
//! long-running process does not accumulate cold keys.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use super::store::{InMemoryStore, LimiterStore};
use crate::clock::{Clock, SystemClock};
use crate::types::StoreConfig;

/// Background task purging expired store entries.
#[derive(Debug)]
pub struct StoreJanitor {
    store: Arc<dyn LimiterStore>,
    clock: Arc<dyn Clock>,
    sweep_interval: Duration,
    cancel: CancellationToken,
}

impl StoreJanitor {
    pub fn new(store: Arc<dyn LimiterStore>, clock: Arc<dyn Clock>, sweep_interval: Duration) -> Self {
        Self {
            store,
            clock,
            sweep_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Start the sweep loop. Returns immediately; sweeping runs in a spawned
    /// task until [`StoreJanitor::stop`] is called.
    pub fn start(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let clock = self.clock.clone();
        let cancel = self.cancel.clone();
        let period = self.sweep_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = interval(period);
            // First tick fires immediately; nothing has expired yet.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("store_janitor_stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        Self::sweep_once(store.as_ref(), clock.as_ref()).await;
                    }
                }
            }
        })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run one purge pass. Failures are logged, never propagated.
    pub async fn sweep_once(store: &dyn LimiterStore, clock: &dyn Clock) -> usize {
        match store.purge_expired(clock.now()).await {
            Ok(purged) => {
                if purged > 0 {
                    tracing::debug!(purged, "store_sweep_completed");
                }
                purged
            }
            Err(e) => {
                tracing::error!(error = %e, "store_sweep_failed");
                0
            }
        }
    }
}

/// Process-wide limiter store handle.
///
/// Created once at startup and disposed at shutdown; gates are built from it
/// with [`crate::limiter::AdmissionGate::from_handle`].
#[derive(Debug)]
pub struct StoreHandle {
    store: Arc<dyn LimiterStore>,
    clock: Arc<dyn Clock>,
    bucket_ttl: Duration,
    janitor: StoreJanitor,
    task: Option<JoinHandle<()>>,
}

impl StoreHandle {
    /// Wrap an existing store and start its janitor.
    pub fn start(store: Arc<dyn LimiterStore>, clock: Arc<dyn Clock>, config: &StoreConfig) -> Self {
        let janitor = StoreJanitor::new(store.clone(), clock.clone(), config.sweep_interval);
        let task = janitor.start();
        tracing::info!(
            sweep_interval_ms = config.sweep_interval.as_millis() as u64,
            "limiter_store_started"
        );
        Self {
            store,
            clock,
            bucket_ttl: config.bucket_ttl,
            janitor,
            task: Some(task),
        }
    }

    /// In-memory store on the system clock.
    pub fn in_memory(config: &StoreConfig) -> Self {
        Self::start(
            Arc::new(InMemoryStore::new(config.shard_count)),
            Arc::new(SystemClock),
            config,
        )
    }

    pub fn store(&self) -> Arc<dyn LimiterStore> {
        self.store.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn bucket_ttl(&self) -> Duration {
        self.bucket_ttl
    }

    /// Stop the janitor and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.janitor.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "store_janitor_join_failed");
            }
        }
        tracing::info!("limiter_store_shutdown");
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        self.janitor.stop();
    }
}
