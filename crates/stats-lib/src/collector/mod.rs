//! Container stats collection
//!
//! This module polls a container runtime on a fixed tick, reconciles the
//! listed containers against an in-memory table, fetches a resource sample
//! for every running container concurrently and keeps the latest record per
//! container until it expires.

mod cpu;
mod docker;
mod r#loop;
mod table;


pub use cpu::cpu_fraction;
pub use docker::DockerRuntime;
pub use r#loop::{CollectorConfig, StatsCollector, StatsCollectorBuilder, TickReport};
pub use table::ContainerTable;

use crate::models::{ContainerListing, ResourceSample};
use std::time::Duration;

pub use async_trait::async_trait;

/// Errors reported by a container runtime adapter
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to connect to container runtime: {0}")]
    Connect(String),
    #[error("failed to list containers: {0}")]
    List(String),
    #[error("failed to fetch stats for {id}: {reason}")]
    Stats { id: String, reason: String },
    #[error("malformed stats payload for {id}: {reason}")]
    Malformed { id: String, reason: String },
    #[error("stats fetch for {id} timed out after {timeout:?}")]
    Timeout { id: String, timeout: Duration },
}

/// Trait for container runtime implementations
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// List the containers known to the runtime
    async fn list_containers(&self) -> Result<Vec<ContainerListing>, RuntimeError>;

    /// Take a single resource usage sample for one container
    async fn fetch_stats(&self, container_id: &str) -> Result<ResourceSample, RuntimeError>;
}
