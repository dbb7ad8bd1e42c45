//! Stats collection loop
//!
//! Each tick lists the containers known to the runtime, reconciles them
//! against the container table, fetches a resource sample for every running
//! container concurrently, commits the merged records and evicts expired ones.

use super::{ContainerTable, RuntimeClient, RuntimeError};
use crate::health::{components, HealthRegistry};
use crate::models::{ContainerListing, ContainerRecord, ResourceSample};
use crate::observability::{CollectorMetrics, StructuredLogger};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Configuration for the stats collector
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Pause between two ticks (default: 10 seconds)
    pub interval: Duration,
    /// How long a record outlives its last running observation (default: 5 minutes)
    pub ttl: Duration,
    /// Container label keys exported with every record, in order
    pub label_keys: Vec<String>,
    /// Upper bound on stats requests in flight during one tick
    pub max_concurrent_fetches: usize,
    /// Deadline for a single stats request
    pub fetch_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            ttl: Duration::from_secs(5 * 60),
            label_keys: Vec::new(),
            max_concurrent_fetches: 16,
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of a single tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Containers returned by the runtime, `None` when listing failed
    pub listed: Option<usize>,
    pub running: usize,
    pub fetch_failures: usize,
    pub evicted: usize,
    /// Records held after the tick
    pub tracked: usize,
}

/// Periodically collects container stats into a [`ContainerTable`]
pub struct StatsCollector {
    runtime: Arc<dyn RuntimeClient>,
    table: Arc<ContainerTable>,
    config: CollectorConfig,
    ttl: chrono::Duration,
    fetch_permits: Arc<Semaphore>,
    health: Option<HealthRegistry>,
    metrics: CollectorMetrics,
    logger: StructuredLogger,
    ticks: AtomicU64,
}

impl StatsCollector {
    /// Create a new collector writing into `table`
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        table: Arc<ContainerTable>,
        config: CollectorConfig,
    ) -> Result<Self> {
        let ttl = chrono::Duration::from_std(config.ttl).context("TTL out of range")?;
        anyhow::ensure!(
            Utc::now().checked_add_signed(ttl).is_some(),
            "TTL of {}s puts record expiry past the representable range",
            config.ttl.as_secs()
        );
        let permits = config.max_concurrent_fetches.max(1);

        Ok(Self {
            runtime,
            table,
            ttl,
            fetch_permits: Arc::new(Semaphore::new(permits)),
            config,
            health: None,
            metrics: CollectorMetrics::new(),
            logger: StructuredLogger::new("container_collector"),
            ticks: AtomicU64::new(0),
        })
    }

    /// Table this collector writes into
    pub fn table(&self) -> Arc<ContainerTable> {
        self.table.clone()
    }

    /// Run ticks until a shutdown signal arrives
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            ttl_secs = self.config.ttl.as_secs(),
            label_keys = ?self.config.label_keys,
            "Starting container stats collector"
        );

        loop {
            tokio::select! {
                _ = self.tick() => {}
                _ = shutdown.recv() => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = shutdown.recv() => break,
            }
        }

        info!("Shutting down container stats collector");
    }

    /// Run a single tick at the current time
    pub async fn tick(&self) -> TickReport {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let start = Instant::now();

        let report = self.tick_at(Utc::now()).await;

        let elapsed = start.elapsed();
        self.metrics.observe_tick_duration(elapsed.as_secs_f64());
        self.metrics.set_containers_tracked(report.tracked as i64);
        self.logger.log_tick(tick, &report, elapsed);

        report
    }

    /// Run a single tick treating `now` as the current time
    pub(crate) async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let listings = match self.runtime.list_containers().await {
            Ok(listings) => listings,
            Err(e) => {
                self.logger.log_listing_failure(&e);
                self.metrics.inc_list_failures();
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::CONTAINER_COLLECTOR, e.to_string())
                        .await;
                }
                return TickReport {
                    listed: None,
                    tracked: self.table.len().await,
                    ..Default::default()
                };
            }
        };

        if let Some(health) = &self.health {
            health.set_healthy(components::CONTAINER_COLLECTOR).await;
        }

        let mut current = self.reconcile(&listings, now).await;
        let running = current.values().filter(|r| r.up).count();

        let samples = self.fetch_all(&current).await;
        let mut fetch_failures = 0;
        for (id, result) in samples {
            match result {
                Ok(sample) => {
                    if let Some(record) = current.get_mut(&id) {
                        merge_sample(record, &sample);
                    }
                }
                Err(e) => {
                    fetch_failures += 1;
                    self.metrics.inc_fetch_failures();
                    warn!(container_id = %id, error = %e, "Failed to fetch container stats");
                }
            }
        }

        self.table.commit(current).await;

        let evicted = self.table.evict_expired(now).await;
        self.metrics.inc_evictions(evicted as u64);

        TickReport {
            listed: Some(listings.len()),
            running,
            fetch_failures,
            evicted,
            tracked: self.table.len().await,
        }
    }

    /// Build this tick's record for every listed container
    async fn reconcile(
        &self,
        listings: &[ContainerListing],
        now: DateTime<Utc>,
    ) -> HashMap<String, ContainerRecord> {
        let mut previous = self
            .table
            .get_many(listings.iter().map(|l| l.id.as_str()))
            .await;

        let mut current = HashMap::with_capacity(listings.len());
        for listing in listings {
            let record = reconcile_record(
                previous.remove(&listing.id),
                listing,
                &self.config.label_keys,
                now,
                self.ttl,
            );
            current.insert(listing.id.clone(), record);
        }

        current
    }

    /// Fetch a sample for every running record concurrently and wait for all
    async fn fetch_all(
        &self,
        current: &HashMap<String, ContainerRecord>,
    ) -> Vec<(String, Result<ResourceSample, RuntimeError>)> {
        let mut fetches = JoinSet::new();

        for id in current.values().filter(|r| r.up).map(|r| r.id.clone()) {
            let runtime = self.runtime.clone();
            let permits = self.fetch_permits.clone();
            let timeout = self.config.fetch_timeout;

            fetches.spawn(async move {
                // The semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                let result = match tokio::time::timeout(timeout, runtime.fetch_stats(&id)).await {
                    Ok(result) => result,
                    Err(_) => Err(RuntimeError::Timeout {
                        id: id.clone(),
                        timeout,
                    }),
                };
                (id, result)
            });
        }

        let mut results = Vec::with_capacity(fetches.len());
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Stats fetch task failed"),
            }
        }

        results
    }
}

/// Derive this tick's record from the previous one and the runtime listing.
///
/// Usage counters always start zeroed; for running containers they are
/// filled in by a successful stats fetch.
fn reconcile_record(
    previous: Option<ContainerRecord>,
    listing: &ContainerListing,
    label_keys: &[String],
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> ContainerRecord {
    let mut record =
        previous.unwrap_or_else(|| ContainerRecord::new(&listing.id, expiry_after(now, ttl)));

    record.labels = listing.label_values(label_keys);
    record.clear_usage();

    if listing.is_running() {
        record.up = true;
        record.expires_at = expiry_after(now, ttl);
    } else {
        record.up = false;
    }

    record
}

/// `now + ttl`, clamped to the latest representable instant
fn expiry_after(now: DateTime<Utc>, ttl: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn merge_sample(record: &mut ContainerRecord, sample: &ResourceSample) {
    record.mem_used = sample.memory_usage;
    record.mem_total = sample.memory_limit;
    record.cpu_used = sample.cpu_fraction();
}

/// Builder for creating the stats collector
pub struct StatsCollectorBuilder {
    runtime: Option<Arc<dyn RuntimeClient>>,
    table: Option<Arc<ContainerTable>>,
    health: Option<HealthRegistry>,
    config: CollectorConfig,
}

impl StatsCollectorBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            runtime: None,
            table: None,
            health: None,
            config: CollectorConfig::default(),
        }
    }

    /// Set the runtime adapter
    pub fn runtime(mut self, runtime: Arc<dyn RuntimeClient>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Share an existing table instead of creating a fresh one
    pub fn table(mut self, table: Arc<ContainerTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Report listing health into a registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    pub fn label_keys(mut self, keys: Vec<String>) -> Self {
        self.config.label_keys = keys;
        self
    }

    pub fn max_concurrent_fetches(mut self, max: usize) -> Self {
        self.config.max_concurrent_fetches = max;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    /// Build the collector
    pub fn build(self) -> Result<StatsCollector> {
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("Runtime client is required"))?;
        let table = self.table.unwrap_or_default();

        let mut collector = StatsCollector::new(runtime, table, self.config)?;
        collector.health = self.health;
        Ok(collector)
    }
}

impl Default for StatsCollectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CpuCounters;

    fn listing(id: &str, state: &str) -> ContainerListing {
        ContainerListing {
            id: id.to_string(),
            state: state.to_string(),
            labels: [("service".to_string(), "web".to_string())].into(),
        }
    }

    #[test]
    fn test_collector_config_default() {
        let config = CollectorConfig::default();
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.ttl, Duration::from_secs(300));
        assert!(config.label_keys.is_empty());
    }

    #[test]
    fn test_reconcile_new_running_container() {
        let now = Utc::now();
        let ttl = chrono::Duration::minutes(5);
        let keys = vec!["service".to_string(), "env".to_string()];

        let record = reconcile_record(None, &listing("a", "running"), &keys, now, ttl);

        assert!(record.up);
        assert_eq!(record.expires_at, now + ttl);
        assert_eq!(record.labels, vec!["web", "missed"]);
    }

    #[test]
    fn test_reconcile_new_stopped_container_gets_expiry() {
        let now = Utc::now();
        let ttl = chrono::Duration::minutes(5);

        let record = reconcile_record(None, &listing("a", "exited"), &[], now, ttl);

        assert!(!record.up);
        assert_eq!(record.expires_at, now + ttl);
    }

    #[test]
    fn test_reconcile_stopped_keeps_expiry_and_zeroes_usage() {
        let now = Utc::now();
        let ttl = chrono::Duration::minutes(5);
        let mut previous = ContainerRecord::new("a", now - chrono::Duration::minutes(1));
        previous.up = true;
        previous.mem_used = 10;
        previous.mem_total = 20;
        previous.cpu_used = 0.5;

        let record = reconcile_record(Some(previous), &listing("a", "exited"), &[], now, ttl);

        assert!(!record.up);
        assert_eq!(record.expires_at, now - chrono::Duration::minutes(1));
        assert_eq!(record.mem_used, 0);
        assert_eq!(record.mem_total, 0);
        assert_eq!(record.cpu_used, 0.0);
    }

    #[test]
    fn test_merge_sample() {
        let mut record = ContainerRecord::new("a", Utc::now());
        let sample = ResourceSample {
            memory_usage: 1_000,
            memory_limit: 4_000,
            cpu: CpuCounters {
                total_usage: 1_200,
                system_usage: 12_000,
            },
            precpu: CpuCounters {
                total_usage: 1_000,
                system_usage: 10_000,
            },
            online_cpus: 4,
        };

        merge_sample(&mut record, &sample);

        assert_eq!(record.mem_used, 1_000);
        assert_eq!(record.mem_total, 4_000);
        assert!((record.cpu_used - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_expiry_after_clamps_on_overflow() {
        let now = Utc::now();
        assert_eq!(
            expiry_after(now, chrono::Duration::minutes(5)),
            now + chrono::Duration::minutes(5)
        );
        assert_eq!(
            expiry_after(DateTime::<Utc>::MAX_UTC, chrono::Duration::seconds(1)),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[test]
    fn test_builder_missing_runtime() {
        let result = StatsCollectorBuilder::new().build();
        assert!(result.is_err());
    }
}
