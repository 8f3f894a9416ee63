//! Configuration validation.

use crate::config::Config;
use crate::metrics::{full_name, is_valid_metric_name, validate_buckets};

/// Validate the configuration.
///
/// Checks for:
/// - A namespace usable as a metric name prefix
/// - A metrics path starting with `/`
/// - Histogram buckets that are finite and strictly increasing
/// - Non-empty ignored route names
/// - A known log level
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing every problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();
    let metrics = &config.metrics;

    // The namespace is joined to metric names, so the joined form must be valid
    let probe = full_name(&metrics.namespace, "x");
    if !is_valid_metric_name(&probe) {
        errors.push(format!(
            "invalid metrics namespace '{}': must match [a-zA-Z_:][a-zA-Z0-9_:]*",
            metrics.namespace
        ));
    }

    if !metrics.path.starts_with('/') {
        errors.push(format!(
            "metrics path '{}' must start with '/'",
            metrics.path
        ));
    }

    if let Some(ref buckets) = metrics.buckets {
        if let Err(e) = validate_buckets("request_durations_histogram_seconds", buckets) {
            errors.push(e.to_string());
        }
    }

    if metrics.ignored_routes.iter().any(|route| route.is_empty()) {
        errors.push("ignored route names cannot be empty".to_string());
    }

    if config.reload.poll_interval.is_zero() {
        errors.push("reload poll_interval must be greater than zero".to_string());
    }

    // Validate log level
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
