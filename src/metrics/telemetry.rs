//! Exporter self-telemetry using prometheus-client.
//!
//! Tracks how the exporter itself behaves (scrapes served, updates dropped by
//! the fail-open lifecycle dispatch). Kept apart from the [`MetricStore`] so
//! that rendering never writes into the store it is rendering.
//!
//! [`MetricStore`]: crate::metrics::MetricStore

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue, LabelValueEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle hook a dropped update came from.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Hook {
    Start,
    Received,
    Completed,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::Start => "start",
            Hook::Received => "received",
            Hook::Completed => "completed",
        }
    }
}

impl EncodeLabelValue for Hook {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), std::fmt::Error> {
        encoder.write_str(self.as_str())
    }
}

/// Labels for dropped update metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HookLabels {
    pub hook: Hook,
}

/// Metrics describing the exporter itself.
#[derive(Clone)]
pub struct ExporterMetrics {
    inner: Arc<ExporterMetricsInner>,
}

struct ExporterMetricsInner {
    /// Exposition documents rendered.
    scrapes_total: Counter,
    /// Time spent rendering the store (in seconds).
    render_duration_seconds: Histogram,
    /// Collector updates dropped after an error.
    dropped_updates_total: Family<HookLabels, Counter>,
    registry: Registry,
}

impl ExporterMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let scrapes_total = Counter::default();
        // Buckets: 100us .. ~1.6s
        let render_duration_seconds = Histogram::new(exponential_buckets(0.0001, 4.0, 8));
        let dropped_updates_total = Family::<HookLabels, Counter>::default();

        registry.register(
            "reqmeter_scrapes",
            "Total number of exposition documents rendered",
            scrapes_total.clone(),
        );
        registry.register(
            "reqmeter_render_duration_seconds",
            "Time spent rendering the metric store in seconds",
            render_duration_seconds.clone(),
        );
        registry.register(
            "reqmeter_dropped_updates",
            "Metric updates dropped because a collector hook failed",
            dropped_updates_total.clone(),
        );

        Self {
            inner: Arc::new(ExporterMetricsInner {
                scrapes_total,
                render_duration_seconds,
                dropped_updates_total,
                registry,
            }),
        }
    }

    /// Record a rendered exposition document.
    pub fn record_scrape(&self, duration: Duration) {
        self.inner.scrapes_total.inc();
        self.inner
            .render_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Record a collector update that was dropped.
    pub fn record_dropped_update(&self, hook: Hook) {
        self.inner
            .dropped_updates_total
            .get_or_create(&HookLabels { hook })
            .inc();
    }

    pub fn scrapes(&self) -> u64 {
        self.inner.scrapes_total.get()
    }

    pub fn dropped_updates(&self, hook: Hook) -> u64 {
        self.inner
            .dropped_updates_total
            .get_or_create(&HookLabels { hook })
            .get()
    }

    /// Append the exporter metrics to `out` in the 0.0.4 text format.
    pub fn encode(&self, out: &mut String) -> std::fmt::Result {
        let mut buffer = String::new();
        encode(&mut buffer, &self.inner.registry)?;
        append_text_format(&buffer, out);
        Ok(())
    }
}

/// Adapt OpenMetrics output to the 0.0.4 text format.
///
/// OpenMetrics names a counter family without the `_total` suffix its samples
/// carry; the text format needs HELP and TYPE to use the sample name. The
/// trailing `# EOF` marker is dropped so the result can be embedded in a
/// larger document.
fn append_text_format(openmetrics: &str, out: &mut String) {
    let counters: Vec<&str> = openmetrics
        .lines()
        .filter_map(|line| line.strip_prefix("# TYPE ")?.strip_suffix(" counter"))
        .filter(|name| !name.ends_with("_total"))
        .collect();

    for line in openmetrics.lines() {
        if line == "# EOF" {
            continue;
        }

        let renamed = ["# HELP ", "# TYPE "].iter().find_map(|prefix| {
            let (name, rest) = line.strip_prefix(prefix)?.split_once(' ')?;
            counters
                .contains(&name)
                .then(|| format!("{}{}_total {}", prefix, name, rest))
        });

        match renamed {
            Some(line) => out.push_str(&line),
            None => out.push_str(line),
        }
        out.push('\n');
    }
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}
