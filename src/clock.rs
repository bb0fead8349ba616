//! Wall-clock source for limiter arithmetic.
//!
//! Limiters work in fractional epoch seconds. Injecting the clock keeps window
//! expiry and bucket refill testable without sleeping.

use chrono::Utc;
use std::fmt::Debug;
use std::sync::Mutex;

/// Source of "now" in epoch seconds with sub-second precision.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> f64;
}

/// Real time from the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Manually advanced clock.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move time forward by `seconds`.
    pub fn advance(&self, seconds: f64) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += seconds;
    }

    pub fn set(&self, at: f64) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
