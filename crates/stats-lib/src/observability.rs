//! Observability infrastructure for the stats agent
//!
//! Provides:
//! - Prometheus self-metrics (tick latency, listing/fetch failures, evictions)
//! - Structured logging of agent and collector lifecycle events
//! - The process start timestamp used for the uptime series

use crate::collector::TickReport;
use chrono::{DateTime, Utc};
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::fmt::Display;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Histogram buckets for tick durations (in seconds)
const TICK_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

static PROCESS_START: OnceLock<DateTime<Utc>> = OnceLock::new();

/// Time the process started. The first call fixes the value, so call it
/// early in `main`.
pub fn process_start_time() -> DateTime<Utc> {
    *PROCESS_START.get_or_init(Utc::now)
}

/// Seconds elapsed since [`process_start_time`]
pub fn uptime_seconds() -> f64 {
    let elapsed = Utc::now() - process_start_time();
    elapsed.num_milliseconds() as f64 / 1000.0
}

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<CollectorMetricsInner> = OnceLock::new();

struct CollectorMetricsInner {
    tick_duration_seconds: Histogram,
    list_failures: IntCounter,
    fetch_failures: IntCounter,
    evictions: IntCounter,
    containers_tracked: IntGauge,
}

impl CollectorMetricsInner {
    fn new() -> Self {
        Self {
            tick_duration_seconds: register_histogram!(
                "stats_agent_tick_duration_seconds",
                "Time spent on one container collector tick",
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),

            list_failures: register_int_counter!(
                "stats_agent_list_failures_total",
                "Container listings that failed"
            )
            .expect("Failed to register list_failures"),

            fetch_failures: register_int_counter!(
                "stats_agent_fetch_failures_total",
                "Per-container stats fetches that failed or timed out"
            )
            .expect("Failed to register fetch_failures"),

            evictions: register_int_counter!(
                "stats_agent_evictions_total",
                "Container records removed after their TTL"
            )
            .expect("Failed to register evictions"),

            containers_tracked: register_int_gauge!(
                "stats_agent_containers_tracked",
                "Container records currently held in memory"
            )
            .expect("Failed to register containers_tracked"),
        }
    }
}

/// Collector self-metrics
///
/// Lightweight handle to the global instance; clones share the same metrics.
#[derive(Clone)]
pub struct CollectorMetrics {
    _private: (),
}

impl Default for CollectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CollectorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_tick_duration(&self, duration_secs: f64) {
        self.inner().tick_duration_seconds.observe(duration_secs);
    }

    pub fn inc_list_failures(&self) {
        self.inner().list_failures.inc();
    }

    pub fn inc_fetch_failures(&self) {
        self.inner().fetch_failures.inc();
    }

    pub fn inc_evictions(&self, count: u64) {
        self.inner().evictions.inc_by(count);
    }

    pub fn set_containers_tracked(&self, count: i64) {
        self.inner().containers_tracked.set(count);
    }
}

/// Structured logger for agent events
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, label_keys: &[String]) {
        info!(
            event = "agent_started",
            component = %self.component,
            version = %version,
            label_keys = ?label_keys,
            "Stats agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            component = %self.component,
            reason = %reason,
            "Stats agent shutting down"
        );
    }

    /// Log the outcome of a collector tick
    pub fn log_tick(&self, tick: u64, report: &TickReport, elapsed: Duration) {
        debug!(
            event = "tick_completed",
            component = %self.component,
            tick = tick,
            listed = ?report.listed,
            running = report.running,
            fetch_failures = report.fetch_failures,
            evicted = report.evicted,
            tracked = report.tracked,
            elapsed_ms = elapsed.as_millis() as u64,
            "Stats tick complete"
        );
    }

    /// Log a failed container listing
    pub fn log_listing_failure(&self, error: &impl Display) {
        warn!(
            event = "listing_failed",
            component = %self.component,
            error = %error,
            "Failed to list containers, keeping previous state"
        );
    }
}
