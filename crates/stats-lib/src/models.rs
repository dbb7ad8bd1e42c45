//! Core data models for the stats agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Placeholder value for a configured label key the container does not carry
pub const MISSED_LABEL: &str = "missed";

/// Runtime state string reported for running containers
pub const RUNNING_STATE: &str = "running";

/// Latest known state of one container, as held in the container table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub up: bool,
    pub mem_used: u64,
    pub mem_total: u64,
    pub cpu_used: f64,
    /// Values positionally aligned with the configured label keys
    pub labels: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl ContainerRecord {
    /// Create an empty record for a container seen for the first time
    pub fn new(id: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            up: false,
            mem_used: 0,
            mem_total: 0,
            cpu_used: 0.0,
            labels: Vec::new(),
            expires_at,
        }
    }

    /// Zero the resource counters
    pub fn clear_usage(&mut self) {
        self.mem_used = 0;
        self.mem_total = 0;
        self.cpu_used = 0.0;
    }

    /// Mark the container as not running and zero its counters
    pub fn mark_down(&mut self) {
        self.up = false;
        self.clear_usage();
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// One entry of a runtime container listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerListing {
    pub id: String,
    pub state: String,
    pub labels: HashMap<String, String>,
}

impl ContainerListing {
    pub fn is_running(&self) -> bool {
        self.state == RUNNING_STATE
    }

    /// Resolve the configured label keys against this container's labels
    pub fn label_values(&self, keys: &[String]) -> Vec<String> {
        keys.iter()
            .map(|key| {
                self.labels
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| MISSED_LABEL.to_string())
            })
            .collect()
    }
}

/// Cumulative CPU counters at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuCounters {
    /// CPU time consumed by the container
    pub total_usage: u64,
    /// CPU time elapsed on the whole host
    pub system_usage: u64,
}

/// Single-shot resource usage sample for one container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub cpu: CpuCounters,
    pub precpu: CpuCounters,
    pub online_cpus: u64,
}

/// Process and thread counts read from procfs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCounts {
    /// Equivalent of `ps ax | wc -l`
    pub processes: usize,
    /// Equivalent of `ps -eL | wc -l`
    pub threads: usize,
}
