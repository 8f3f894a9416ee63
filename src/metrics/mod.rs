//! Metrics collection and exposition.

mod app;
mod collector;
mod lifecycle;
mod render;
mod server;
mod store;
mod telemetry;

pub use app::{RequestMetrics, StatusClass, DEFAULT_INSTANCE};
pub use collector::{Collector, CollectorRegistry, RequestContext};
pub use lifecycle::Instrumentation;
pub use render::{text_response, RenderError, Renderer, EXPOSITION_CONTENT_TYPE};
pub use server::MetricsServer;
pub use store::{
    full_name, is_valid_metric_name, validate_buckets, Counter, Gauge, Histogram, HistogramSample,
    LabelValues, MetricFamily, MetricKind, MetricStore, Sample, SampleValue, StoreError,
    DEFAULT_BUCKETS,
};
pub use telemetry::{ExporterMetrics, Hook};
