//! Configuration data types.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Metrics collection and exposition settings
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Configuration hot reload settings
    #[serde(default)]
    pub reload: ReloadConfig,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Prefix for every metric written by the built-in collector
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Address to bind metrics server
    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,

    /// Path for metrics endpoint
    #[serde(default = "default_metrics_path")]
    pub path: String,

    /// Host identifier for the instance gauge (falls back to $HOSTNAME)
    #[serde(default)]
    pub instance: Option<String>,

    /// Route names excluded from collection
    #[serde(default = "default_ignored_routes")]
    pub ignored_routes: Vec<String>,

    /// Request duration histogram buckets, in seconds
    #[serde(default)]
    pub buckets: Option<Vec<f64>>,
}

impl MetricsConfig {
    /// Host identifier: the configured instance, else `$HOSTNAME`.
    pub fn resolve_instance(&self) -> Option<String> {
        self.instance
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .filter(|host| !host.is_empty())
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            address: default_metrics_address(),
            path: default_metrics_path(),
            instance: None,
            ignored_routes: default_ignored_routes(),
            buckets: None,
        }
    }
}

/// Hot reload configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReloadConfig {
    /// Watch the configuration file for changes
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often the file watcher polls
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: default_poll_interval(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_namespace() -> String {
    "app".to_string()
}

fn default_metrics_address() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 9090))
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_ignored_routes() -> Vec<String> {
    vec!["metrics".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
