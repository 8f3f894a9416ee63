//! reqmeter - request lifecycle metrics with Prometheus text exposition
//!
//! This crate provides:
//! - A metric store with get-or-register counters, gauges and histograms
//! - A pluggable collector interface driven by request lifecycle hooks
//! - A built-in collector for request counts, response classes and durations
//! - A renderer and HTTP endpoint for the Prometheus text format
//! - YAML configuration with hot reload of ignored routes

pub mod config;
pub mod metrics;
pub mod state;
pub mod util;

pub use config::Config;
pub use state::AppState;
