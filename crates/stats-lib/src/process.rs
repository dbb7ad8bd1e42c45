//! Process and thread counting from procfs
//!
//! A sibling of the container collector with no per-entity state: every tick
//! re-counts the numeric entries under `/proc` and their `task` directories.

use crate::health::{components, HealthRegistry};
use crate::models::ProcessCounts;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

fn is_numeric(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

/// Count processes and threads under `proc_root`.
///
/// Processes whose `task` directory cannot be read are skipped; they most
/// likely exited during the scan.
pub async fn count_processes(proc_root: &Path) -> Result<ProcessCounts> {
    let mut entries = fs::read_dir(proc_root)
        .await
        .with_context(|| format!("Failed to read {}", proc_root.display()))?;

    let mut counts = ProcessCounts::default();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(pid) = name.to_str().filter(|n| is_numeric(n)) else {
            continue;
        };
        if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }

        let mut tasks = match fs::read_dir(proc_root.join(pid).join("task")).await {
            Ok(tasks) => tasks,
            Err(_) => continue,
        };

        counts.processes += 1;
        while let Ok(Some(task)) = tasks.next_entry().await {
            if task.file_name().to_str().is_some_and(is_numeric) {
                counts.threads += 1;
            }
        }
    }

    Ok(counts)
}

/// Periodically refreshed process/thread counts
pub struct ProcessCounter {
    proc_root: PathBuf,
    interval: Duration,
    latest: RwLock<ProcessCounts>,
    health: Option<HealthRegistry>,
}

impl ProcessCounter {
    pub fn new(proc_root: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            proc_root: proc_root.into(),
            interval,
            latest: RwLock::new(ProcessCounts::default()),
            health: None,
        }
    }

    /// Report poll health into a registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Counts published by the last refresh
    pub async fn latest(&self) -> ProcessCounts {
        *self.latest.read().await
    }

    /// Re-count once and publish the result. Failures publish zero counts.
    pub async fn refresh(&self) -> ProcessCounts {
        let counts = match count_processes(&self.proc_root).await {
            Ok(counts) => {
                if let Some(health) = &self.health {
                    health.set_healthy(components::PROCESS_COUNTER).await;
                }
                counts
            }
            Err(e) => {
                warn!(
                    error = %e,
                    proc_root = %self.proc_root.display(),
                    "Failed to count processes"
                );
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::PROCESS_COUNTER, e.to_string())
                        .await;
                }
                ProcessCounts::default()
            }
        };

        *self.latest.write().await = counts;
        debug!(
            processes = counts.processes,
            threads = counts.threads,
            "Process count refreshed"
        );
        counts
    }

    /// Refresh until a shutdown signal arrives
    pub async fn run(self: std::sync::Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            proc_root = %self.proc_root.display(),
            "Starting process counter"
        );

        loop {
            self.refresh().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => break,
            }
        }

        info!("Shutting down process counter");
    }
}
