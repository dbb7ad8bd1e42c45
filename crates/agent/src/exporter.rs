//! Prometheus exposition of the collected stats
//!
//! Container series are rebuilt from a fresh table snapshot on every scrape,
//! so containers evicted from the table disappear from the output.

use anyhow::{bail, Context, Result};
use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, Opts, Registry, TextEncoder};
use stats_lib::observability::uptime_seconds;
use stats_lib::{ContainerTable, ProcessCounter};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Label carrying the short container id, appended after the configured keys
const ID_LABEL: &str = "id";

/// Turn an arbitrary container label key into a valid Prometheus label name
pub fn sanitize_label_name(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// First 8 characters of a container id
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec> {
    let gauge = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

struct ContainerSeries {
    table: Arc<ContainerTable>,
    up: GaugeVec,
    mem_used: GaugeVec,
    mem_total: GaugeVec,
    cpu_used: GaugeVec,
}

impl ContainerSeries {
    fn new(registry: &Registry, table: Arc<ContainerTable>, label_keys: &[String]) -> Result<Self> {
        let mut names: Vec<String> = label_keys.iter().map(|k| sanitize_label_name(k)).collect();
        names.push(ID_LABEL.to_string());

        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                bail!("Container label keys map to duplicate metric label {:?}", name);
            }
        }

        let labels: Vec<&str> = names.iter().map(String::as_str).collect();
        Ok(Self {
            table,
            up: gauge_vec(registry, "docker_up", "is container up", &labels)?,
            mem_used: gauge_vec(registry, "docker_mem_used", "memory used", &labels)?,
            mem_total: gauge_vec(registry, "docker_mem_total", "memory total", &labels)?,
            cpu_used: gauge_vec(registry, "docker_cpu_used", "cpu used", &labels)?,
        })
    }

    async fn refresh(&self) {
        let records = self.table.snapshot().await;

        for gauge in [&self.up, &self.mem_used, &self.mem_total, &self.cpu_used] {
            gauge.reset();
        }

        for record in &records {
            let values: Vec<&str> = record
                .labels
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(short_id(&record.id)))
                .collect();

            self.up
                .with_label_values(&values)
                .set(if record.up { 1.0 } else { 0.0 });
            self.mem_used
                .with_label_values(&values)
                .set(record.mem_used as f64);
            self.mem_total
                .with_label_values(&values)
                .set(record.mem_total as f64);
            self.cpu_used.with_label_values(&values).set(record.cpu_used);
        }
    }
}

struct ProcessSeries {
    counter: Arc<ProcessCounter>,
    processes: IntGauge,
    threads: IntGauge,
}

impl ProcessSeries {
    fn new(registry: &Registry, counter: Arc<ProcessCounter>) -> Result<Self> {
        let processes = IntGauge::new("stats_ps_ax", "ps ax count")?;
        let threads = IntGauge::new("stats_ps_el", "ps -eL count")?;
        registry.register(Box::new(processes.clone()))?;
        registry.register(Box::new(threads.clone()))?;
        Ok(Self {
            counter,
            processes,
            threads,
        })
    }

    async fn refresh(&self) {
        let counts = self.counter.latest().await;
        self.processes.set(counts.processes as i64);
        self.threads.set(counts.threads as i64);
    }
}

/// Renders container, process and agent series in the Prometheus text format
pub struct Exporter {
    registry: Registry,
    containers: Option<ContainerSeries>,
    processes: Option<ProcessSeries>,
    uptime: Gauge,
    /// Serializes scrapes so concurrent resets cannot interleave
    render_lock: Mutex<()>,
}

impl Exporter {
    /// Exporter with only the version and uptime series
    pub fn new(version: &str) -> Result<Self> {
        let registry = Registry::new();

        let version_info = gauge_vec(
            &registry,
            "docker_stats_version",
            "docker-stats version",
            &["version"],
        )?;
        version_info.with_label_values(&[version]).set(1.0);

        let uptime = Gauge::new("docker_stats_uptime", "docker-stats uptime")?;
        registry.register(Box::new(uptime.clone()))?;

        Ok(Self {
            registry,
            containers: None,
            processes: None,
            uptime,
            render_lock: Mutex::new(()),
        })
    }

    /// Export the records held in `table`, labelled with `label_keys`
    pub fn with_containers(
        mut self,
        table: Arc<ContainerTable>,
        label_keys: &[String],
    ) -> Result<Self> {
        self.containers = Some(ContainerSeries::new(&self.registry, table, label_keys)?);
        Ok(self)
    }

    /// Export the counts published by `counter`
    pub fn with_processes(mut self, counter: Arc<ProcessCounter>) -> Result<Self> {
        self.processes = Some(ProcessSeries::new(&self.registry, counter)?);
        Ok(self)
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    /// Render all series, including the agent's self-metrics
    pub async fn render(&self) -> Result<String> {
        let _guard = self.render_lock.lock().await;

        if let Some(series) = &self.containers {
            series.refresh().await;
        }
        if let Some(series) = &self.processes {
            series.refresh().await;
        }
        self.uptime.set(uptime_seconds());

        let mut families = self.registry.gather();
        families.extend(prometheus::gather());

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics output is not UTF-8")
    }
}
