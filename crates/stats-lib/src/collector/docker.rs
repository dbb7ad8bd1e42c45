//! Docker Engine runtime adapter
//!
//! Lists containers and takes single-shot stats through the Docker Engine
//! API using the local defaults (unix socket or `DOCKER_HOST`).

use super::{RuntimeClient, RuntimeError};
use crate::models::{ContainerListing, CpuCounters, ResourceSample};
use async_trait::async_trait;
use bollard::container::{CPUStats, ListContainersOptions, Stats, StatsOptions};
use bollard::Docker;
use futures::StreamExt;
use tracing::debug;

/// Runtime adapter backed by the Docker Engine API
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    include_stopped: bool,
}

impl DockerRuntime {
    /// Connect using the local defaults.
    ///
    /// This only builds the client; the daemon is not contacted until the
    /// first request.
    pub fn connect(include_stopped: bool) -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Connect(e.to_string()))?;

        Ok(Self {
            docker,
            include_stopped,
        })
    }

    /// Check that the daemon answers
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Connect(e.to_string()))
    }

    fn counters(stats: &CPUStats) -> CpuCounters {
        CpuCounters {
            total_usage: stats.cpu_usage.total_usage,
            system_usage: stats.system_cpu_usage.unwrap_or(0),
        }
    }

    /// Convert a raw stats payload into a resource sample
    fn sample_from_stats(id: &str, stats: Stats) -> Result<ResourceSample, RuntimeError> {
        let memory_usage = stats.memory_stats.usage.ok_or_else(|| RuntimeError::Malformed {
            id: id.to_string(),
            reason: "missing memory usage".to_string(),
        })?;

        // Older engines omit online_cpus; fall back to the per-cpu breakdown
        let online_cpus = stats
            .cpu_stats
            .online_cpus
            .or_else(|| {
                stats
                    .cpu_stats
                    .cpu_usage
                    .percpu_usage
                    .as_ref()
                    .map(|per_cpu| per_cpu.len() as u64)
            })
            .unwrap_or(0);

        Ok(ResourceSample {
            memory_usage,
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
            cpu: Self::counters(&stats.cpu_stats),
            precpu: Self::counters(&stats.precpu_stats),
            online_cpus,
        })
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerListing>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: self.include_stopped,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::List(e.to_string()))?;

        let listings = summaries
            .into_iter()
            .filter_map(|summary| {
                let Some(id) = summary.id else {
                    debug!("Skipping container summary without id");
                    return None;
                };
                Some(ContainerListing {
                    id,
                    state: summary.state.unwrap_or_default(),
                    labels: summary.labels.unwrap_or_default(),
                })
            })
            .collect();

        Ok(listings)
    }

    async fn fetch_stats(&self, container_id: &str) -> Result<ResourceSample, RuntimeError> {
        // A non-streaming (but not one-shot) request makes the daemon fill in
        // the previous CPU counters, which the utilization needs.
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };

        let mut stream = Box::pin(self.docker.stats(container_id, Some(options)));
        let stats = match stream.next().await {
            Some(Ok(stats)) => stats,
            Some(Err(e)) => {
                return Err(RuntimeError::Stats {
                    id: container_id.to_string(),
                    reason: e.to_string(),
                })
            }
            None => {
                return Err(RuntimeError::Malformed {
                    id: container_id.to_string(),
                    reason: "empty stats response".to_string(),
                })
            }
        };

        Self::sample_from_stats(container_id, stats)
    }
}
