//! Tool health tracking.
//!
//! In-memory sliding-window outcome metrics per (endpoint, tool). Status is
//! advisory: callers may surface it or route around unhealthy tools, but the
//! invoker never refuses a call because of it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

// =============================================================================
// Configuration
// =============================================================================

/// Health assessment thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Minimum success rate for HEALTHY status (default: 0.95).
    pub success_rate_healthy: f64,
    /// Minimum success rate for DEGRADED status (default: 0.80).
    pub success_rate_degraded: f64,
    /// Maximum avg latency (ms) for HEALTHY status (default: 2000).
    pub latency_healthy_ms: u64,
    /// Maximum avg latency (ms) for DEGRADED status (default: 5000).
    pub latency_degraded_ms: u64,
    /// Minimum calls before health assessment (default: 5).
    pub min_calls_for_assessment: usize,
    /// Window over which recent failures are counted (default: 5 minutes).
    #[serde(with = "humantime_serde")]
    pub recent_failure_window: Duration,
    /// Outcomes kept per tool (default: 100).
    pub window_size: usize,
    /// Pairs with no outcome for this long are dropped (default: 1 hour).
    #[serde(with = "humantime_serde")]
    pub idle_expiry: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            success_rate_healthy: 0.95,
            success_rate_degraded: 0.80,
            latency_healthy_ms: 2000,
            latency_degraded_ms: 5000,
            min_calls_for_assessment: 5,
            recent_failure_window: Duration::from_secs(300),
            window_size: 100,
            idle_expiry: Duration::from_secs(3600),
        }
    }
}

/// Health classification of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

// =============================================================================
// Per-tool metrics
// =============================================================================

#[derive(Debug, Clone)]
struct Outcome {
    success: bool,
    latency_ms: u64,
    at: Instant,
    failure_kind: Option<&'static str>,
}

#[derive(Debug)]
struct ToolMetrics {
    outcomes: VecDeque<Outcome>,
    window_size: usize,
}

impl ToolMetrics {
    fn new(window_size: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(window_size.min(1024)),
            window_size: window_size.max(1),
        }
    }

    fn record(&mut self, outcome: Outcome) {
        if self.outcomes.len() >= self.window_size {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(outcome);
    }

    fn idle_for(&self, now: Instant) -> Duration {
        self.outcomes
            .back()
            .map(|o| now.duration_since(o.at))
            .unwrap_or(Duration::MAX)
    }

    fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let ok = self.outcomes.iter().filter(|o| o.success).count();
        ok as f64 / self.outcomes.len() as f64
    }

    fn avg_latency_ms(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.outcomes.iter().map(|o| o.latency_ms).sum();
        sum as f64 / self.outcomes.len() as f64
    }

    fn recent_failures(&self, window: Duration) -> usize {
        let now = Instant::now();
        self.outcomes
            .iter()
            .filter(|o| !o.success && now.duration_since(o.at) <= window)
            .count()
    }

    fn failure_kinds(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for outcome in self.outcomes.iter().filter(|o| !o.success) {
            *counts.entry(outcome.failure_kind.unwrap_or("unknown")).or_default() += 1;
        }
        let mut kinds: Vec<(String, usize)> =
            counts.into_iter().map(|(k, n)| (k.to_string(), n)).collect();
        kinds.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        kinds
    }
}

// =============================================================================
// Report
// =============================================================================

/// Health report for one (endpoint, tool) pair.
#[derive(Debug, Clone, Serialize)]
pub struct ToolHealthReport {
    pub endpoint: String,
    pub tool_name: String,
    pub status: HealthStatus,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub total_calls: usize,
    pub recent_failures: usize,
    pub issues: Vec<String>,
}

// =============================================================================
// Tracker
// =============================================================================

type ToolKey = (String, String);

/// Shared tracker; safe to hold behind an `Arc` and record from many tasks.
#[derive(Debug)]
pub struct ToolHealthTracker {
    config: HealthConfig,
    metrics: Mutex<HashMap<ToolKey, ToolMetrics>>,
}

impl ToolHealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            metrics: Mutex::new(HashMap::new()),
        }
    }

    fn key(endpoint: &str, tool_name: &str) -> ToolKey {
        (endpoint.trim_end_matches('/').to_string(), tool_name.to_string())
    }

    /// Record the final outcome of one invocation.
    pub fn record(
        &self,
        endpoint: &str,
        tool_name: &str,
        success: bool,
        latency_ms: u64,
        failure_kind: Option<&'static str>,
    ) {
        let now = Instant::now();
        let key = Self::key(endpoint, tool_name);
        let mut metrics = self.metrics.lock().unwrap_or_else(|p| p.into_inner());
        if !metrics.contains_key(&key) {
            // Sweep idle pairs whenever a new one arrives.
            Self::evict_idle(&mut metrics, now, self.config.idle_expiry);
        }
        metrics
            .entry(key)
            .or_insert_with(|| ToolMetrics::new(self.config.window_size))
            .record(Outcome {
                success,
                latency_ms,
                at: now,
                failure_kind,
            });
    }

    /// Drop pairs idle for longer than `idle_expiry`. Returns how many went.
    pub fn prune_idle(&self) -> usize {
        let mut metrics = self.metrics.lock().unwrap_or_else(|p| p.into_inner());
        Self::evict_idle(&mut metrics, Instant::now(), self.config.idle_expiry)
    }

    /// Forget one (endpoint, tool) pair, e.g. after the tool is unregistered.
    pub fn remove(&self, endpoint: &str, tool_name: &str) -> bool {
        self.metrics
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&Self::key(endpoint, tool_name))
            .is_some()
    }

    fn evict_idle(
        metrics: &mut HashMap<ToolKey, ToolMetrics>,
        now: Instant,
        idle_expiry: Duration,
    ) -> usize {
        let before = metrics.len();
        metrics.retain(|_, m| m.idle_for(now) <= idle_expiry);
        before - metrics.len()
    }

    pub fn status(&self, endpoint: &str, tool_name: &str) -> HealthStatus {
        self.report(endpoint, tool_name).status
    }

    pub fn report(&self, endpoint: &str, tool_name: &str) -> ToolHealthReport {
        let key = Self::key(endpoint, tool_name);
        let metrics = self.metrics.lock().unwrap_or_else(|p| p.into_inner());
        let mut report = ToolHealthReport {
            endpoint: key.0.clone(),
            tool_name: key.1.clone(),
            status: HealthStatus::Unknown,
            success_rate: 0.0,
            avg_latency_ms: 0.0,
            total_calls: 0,
            recent_failures: 0,
            issues: Vec::new(),
        };

        let Some(m) = metrics.get(&key) else {
            report.issues.push("No execution history".to_string());
            return report;
        };

        report.total_calls = m.outcomes.len();
        report.success_rate = m.success_rate();
        report.avg_latency_ms = m.avg_latency_ms();
        report.recent_failures = m.recent_failures(self.config.recent_failure_window);

        if report.total_calls < self.config.min_calls_for_assessment {
            report.issues.push(format!(
                "Insufficient data ({}/{})",
                report.total_calls, self.config.min_calls_for_assessment
            ));
            return report;
        }

        let rate_status = if report.success_rate >= self.config.success_rate_healthy {
            HealthStatus::Healthy
        } else if report.success_rate >= self.config.success_rate_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
        let latency_status = if report.avg_latency_ms <= self.config.latency_healthy_ms as f64 {
            HealthStatus::Healthy
        } else if report.avg_latency_ms <= self.config.latency_degraded_ms as f64 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
        report.status = worse_status(rate_status, latency_status);

        if report.success_rate < self.config.success_rate_healthy {
            report.issues.push(format!(
                "Success rate {:.1}% below {:.0}% threshold",
                report.success_rate * 100.0,
                self.config.success_rate_healthy * 100.0,
            ));
        }
        if report.avg_latency_ms > self.config.latency_healthy_ms as f64 {
            report.issues.push(format!(
                "Avg latency {:.0}ms exceeds {}ms threshold",
                report.avg_latency_ms, self.config.latency_healthy_ms,
            ));
        }
        report
    }

    /// Failure kinds for a tool, most frequent first.
    pub fn failure_kinds(&self, endpoint: &str, tool_name: &str) -> Vec<(String, usize)> {
        let metrics = self.metrics.lock().unwrap_or_else(|p| p.into_inner());
        metrics
            .get(&Self::key(endpoint, tool_name))
            .map(ToolMetrics::failure_kinds)
            .unwrap_or_default()
    }

    /// Number of tracked (endpoint, tool) pairs.
    pub fn tool_count(&self) -> usize {
        self.metrics.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Default for ToolHealthTracker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

fn worse_status(a: HealthStatus, b: HealthStatus) -> HealthStatus {
    let rank = |s: HealthStatus| -> u8 {
        match s {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
            HealthStatus::Unknown => 3,
        }
    };
    if rank(a) >= rank(b) {
        a
    } else {
        b
    }
}
