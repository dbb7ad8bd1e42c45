//! Core library for the container stats agent
//!
//! This crate provides:
//! - Container stats collection with TTL-based retention
//! - Process/thread counting from procfs
//! - Health tracking and observability

pub mod collector;
pub mod health;
pub mod models;
pub mod observability;
pub mod process;

pub use collector::{
    ContainerTable, DockerRuntime, RuntimeClient, RuntimeError, StatsCollector,
    StatsCollectorBuilder,
};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{CollectorMetrics, StructuredLogger};
pub use process::{count_processes, ProcessCounter};
