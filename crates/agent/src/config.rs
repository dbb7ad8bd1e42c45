//! Agent configuration
//!
//! Values are layered: built-in defaults, an optional config file,
//! `STATS_*` environment variables, then command-line flags.

use anyhow::{ensure, Context, Result};
use clap::Parser;
use serde::Deserialize;
use stats_lib::collector::CollectorConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line flags
#[derive(Debug, Default, Parser)]
#[command(
    name = "stats-agent",
    version,
    about = "Prometheus exporter for container and process stats"
)]
pub struct CliArgs {
    /// Config file (toml, yaml or json)
    #[arg(long, env = "STATS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind to host
    #[arg(long)]
    pub host: Option<String>,

    /// Bind to port
    #[arg(long)]
    pub port: Option<u16>,

    /// Comma separated container label keys
    #[arg(long)]
    pub labels: Option<String>,

    /// Enable container metrics
    #[arg(long)]
    pub docker_metrics: bool,

    /// Enable process/thread count metrics
    #[arg(long)]
    pub ps_metrics: bool,
}

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Comma separated container label keys
    #[serde(default)]
    pub labels: String,

    #[serde(default)]
    pub docker_metrics: bool,

    #[serde(default)]
    pub ps_metrics: bool,

    /// List stopped containers as well as running ones
    #[serde(default)]
    pub include_stopped: bool,

    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_ps_interval")]
    pub ps_interval_secs: u64,

    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3130
}

fn default_tick_interval() -> u64 {
    10
}

fn default_ttl() -> u64 {
    300
}

fn default_max_concurrent_fetches() -> usize {
    16
}

fn default_fetch_timeout() -> u64 {
    5
}

fn default_ps_interval() -> u64 {
    10
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            labels: String::new(),
            docker_metrics: false,
            ps_metrics: false,
            include_stopped: false,
            tick_interval_secs: default_tick_interval(),
            ttl_secs: default_ttl(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            fetch_timeout_secs: default_fetch_timeout(),
            ps_interval_secs: default_ps_interval(),
            proc_root: default_proc_root(),
        }
    }
}

/// Split a comma separated key list, dropping blank entries
pub fn parse_label_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

impl AgentConfig {
    /// Load configuration from file, environment and flags
    pub fn load(args: &CliArgs) -> Result<Self> {
        Self::load_with_env_prefix(args, "STATS")
    }

    fn load_with_env_prefix(args: &CliArgs, env_prefix: &str) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(env_prefix).try_parsing(true))
            .set_override_option("host", args.host.clone())?
            .set_override_option("port", args.port.map(i64::from))?
            .set_override_option("labels", args.labels.clone())?
            .set_override_option("docker_metrics", args.docker_metrics.then_some(true))?
            .set_override_option("ps_metrics", args.ps_metrics.then_some(true))?
            .build()
            .context("Failed to load configuration")?;

        let config: AgentConfig = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.tick_interval_secs > 0, "tick_interval_secs must be positive");
        ensure!(self.ttl_secs > 0, "ttl_secs must be positive");
        ensure!(self.ps_interval_secs > 0, "ps_interval_secs must be positive");
        ensure!(self.fetch_timeout_secs > 0, "fetch_timeout_secs must be positive");
        ensure!(
            self.max_concurrent_fetches > 0,
            "max_concurrent_fetches must be positive"
        );
        Ok(())
    }

    pub fn label_keys(&self) -> Vec<String> {
        parse_label_keys(&self.labels)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            interval: Duration::from_secs(self.tick_interval_secs),
            ttl: Duration::from_secs(self.ttl_secs),
            label_keys: self.label_keys(),
            max_concurrent_fetches: self.max_concurrent_fetches,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }

    pub fn ps_interval(&self) -> Duration {
        Duration::from_secs(self.ps_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // Unset prefix so the developer's environment cannot leak into tests
    const TEST_PREFIX: &str = "STATS_AGENT_CONFIG_TEST";

    #[test]
    fn test_parse_label_keys() {
        assert_eq!(
            parse_label_keys("com.docker.compose.service, env,,team "),
            vec!["com.docker.compose.service", "env", "team"]
        );
        assert!(parse_label_keys("").is_empty());
        assert!(parse_label_keys(" , ").is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::load_with_env_prefix(&CliArgs::default(), TEST_PREFIX).unwrap();

        assert_eq!(config.bind_addr(), "127.0.0.1:3130");
        assert!(!config.docker_metrics);
        assert!(!config.ps_metrics);
        assert!(config.label_keys().is_empty());

        let collector = config.collector_config();
        assert_eq!(collector.interval, Duration::from_secs(10));
        assert_eq!(collector.ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "host = \"0.0.0.0\"\nport = 9000\nlabels = \"service\"\nttl_secs = 60"
        )
        .unwrap();

        let args = CliArgs {
            config: Some(file.path().to_path_buf()),
            port: Some(9100),
            labels: Some("service,env".to_string()),
            docker_metrics: true,
            ..Default::default()
        };
        let config = AgentConfig::load_with_env_prefix(&args, TEST_PREFIX).unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9100);
        assert_eq!(config.label_keys(), vec!["service", "env"]);
        assert_eq!(config.ttl_secs, 60);
        assert!(config.docker_metrics);
        assert!(!config.ps_metrics);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "tick_interval_secs = 0").unwrap();

        let args = CliArgs {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(AgentConfig::load_with_env_prefix(&args, TEST_PREFIX).is_err());
    }
}
