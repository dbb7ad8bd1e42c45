//! Stats Agent - Prometheus exporter for container and process stats
//!
//! Polls the local container runtime and procfs on fixed ticks and serves
//! the latest values over HTTP.

use anyhow::{Context, Result};
use clap::Parser;
use stats_agent::{
    api,
    config::{AgentConfig, CliArgs},
    exporter::Exporter,
    AGENT_VERSION,
};
use stats_lib::{
    health::{components, HealthRegistry},
    observability::{process_start_time, StructuredLogger},
    ContainerTable, DockerRuntime, ProcessCounter, StatsCollectorBuilder,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    process_start_time();

    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = CliArgs::parse();
    let config = AgentConfig::load(&args)?;
    let label_keys = config.label_keys();

    let logger = StructuredLogger::new("agent");
    logger.log_startup(AGENT_VERSION, &label_keys);

    let health_registry = HealthRegistry::new();
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut exporter = Exporter::new(AGENT_VERSION)?;
    let mut table: Option<Arc<ContainerTable>> = None;

    if config.docker_metrics {
        // Without a runtime client there is nothing to collect
        let runtime = DockerRuntime::connect(config.include_stopped)
            .context("Failed to set up container runtime client")?;
        if let Err(e) = runtime.ping().await {
            warn!(error = %e, "Container runtime not reachable yet, will retry every tick");
        }

        health_registry.register(components::CONTAINER_COLLECTOR).await;
        let collector_config = config.collector_config();
        let collector = Arc::new(
            StatsCollectorBuilder::new()
                .runtime(Arc::new(runtime))
                .health(health_registry.clone())
                .interval(collector_config.interval)
                .ttl(collector_config.ttl)
                .label_keys(collector_config.label_keys)
                .max_concurrent_fetches(collector_config.max_concurrent_fetches)
                .fetch_timeout(collector_config.fetch_timeout)
                .build()?,
        );

        exporter = exporter.with_containers(collector.table(), &label_keys)?;
        table = Some(collector.table());
        let task = tokio::spawn(collector.run(shutdown_tx.subscribe()));
        health_registry.watch_task(components::CONTAINER_COLLECTOR, task);
    }

    if config.ps_metrics {
        health_registry.register(components::PROCESS_COUNTER).await;
        let counter = Arc::new(
            ProcessCounter::new(&config.proc_root, config.ps_interval())
                .with_health(health_registry.clone()),
        );

        exporter = exporter.with_processes(counter.clone())?;
        let task = tokio::spawn(counter.run(shutdown_tx.subscribe()));
        health_registry.watch_task(components::PROCESS_COUNTER, task);
    }

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        Arc::new(exporter),
        table,
    ));

    health_registry.set_ready(true).await;
    info!(
        addr = %config.bind_addr(),
        docker_metrics = config.docker_metrics,
        ps_metrics = config.ps_metrics,
        "Agent configured"
    );

    let addr = config.bind_addr();
    tokio::select! {
        result = api::serve(&addr, app_state) => {
            result.context("API server failed")?;
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
    }

    let _ = shutdown_tx.send(());
    info!("Shutting down");

    Ok(())
}
