//! Container stats agent
//!
//! Wires the collectors from `stats-lib` to configuration and the HTTP
//! exposition endpoint.

pub mod api;
pub mod config;
pub mod exporter;

pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
