//! Built-in request lifecycle collector.
//!
//! Collected metrics:
//! - `instance_name`: host identifier, set once per process
//! - `http_requests_total`: requests per method and route
//! - `http_{2xx,3xx,4xx,5xx}_responses_total`: responses per class
//! - `request_durations_histogram_seconds`: request durations
//!
//! Every counter and histogram update is recorded twice: once under the
//! `"all"` rollup labels and once under the detailed labels.

use crate::metrics::collector::{Collector, RequestContext};
use crate::metrics::store::{MetricStore, StoreError};
use hyper::http::StatusCode;
use std::time::Instant;

const INSTANCE_NAME: &str = "instance_name";
const REQUESTS_TOTAL: &str = "http_requests_total";
const REQUEST_DURATIONS: &str = "request_durations_histogram_seconds";

/// Host identifier used when the request carries none.
pub const DEFAULT_INSTANCE: &str = "dev";

/// Rollup label value.
const ALL: &str = "all";

/// Response status class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Redirection,
    ClientError,
    ServerError,
}

impl StatusClass {
    /// Classify a status code. Informational codes (below 200) have no class.
    pub fn from_status(status: StatusCode) -> Option<Self> {
        match status.as_u16() {
            200..=299 => Some(StatusClass::Success),
            300..=399 => Some(StatusClass::Redirection),
            400..=499 => Some(StatusClass::ClientError),
            500..=u16::MAX => Some(StatusClass::ServerError),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusClass::Success => "2xx",
            StatusClass::Redirection => "3xx",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
        }
    }
}

/// Request-scoped timer started in [`Collector::on_start`].
#[derive(Debug, Clone, Copy)]
struct RequestTimer(Instant);

/// Collector for request counts, response classes and durations.
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    namespace: String,
    store: MetricStore,
    buckets: Option<Vec<f64>>,
}

impl RequestMetrics {
    /// Create a collector writing `namespace`-prefixed metrics into `store`.
    pub fn new(namespace: impl Into<String>, store: MetricStore) -> Self {
        Self {
            namespace: namespace.into(),
            store,
            buckets: None,
        }
    }

    /// Use custom bucket bounds for the duration histogram.
    pub fn with_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    /// Set the instance gauge, but only from the caller that registers it.
    fn set_instance(&self, instance: &str) -> Result<(), StoreError> {
        if self.store.find_gauge(&self.namespace, INSTANCE_NAME)?.is_some() {
            return Ok(());
        }

        match self
            .store
            .register_gauge(&self.namespace, INSTANCE_NAME, "app instance name", &["instance"])
        {
            Ok(gauge) => gauge.set(1.0, &[instance]),
            // Another request registered it first.
            Err(StoreError::AlreadyRegistered(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn inc_requests_total(&self, action: &str, uri: &str) -> Result<(), StoreError> {
        let counter = self.store.get_or_register_counter(
            &self.namespace,
            REQUESTS_TOTAL,
            "total request count",
            &["action", "uri"],
        )?;

        counter.inc(&[ALL, ALL])?;
        counter.inc(&[action, uri])
    }

    fn inc_responses_total(
        &self,
        class: StatusClass,
        action: &str,
        status: &str,
        uri: &str,
    ) -> Result<(), StoreError> {
        let counter = self.store.get_or_register_counter(
            &self.namespace,
            &format!("http_{}_responses_total", class.as_str()),
            &format!("total {} response count", class.as_str()),
            &["action", "status", "uri"],
        )?;

        counter.inc(&[ALL, ALL, ALL])?;
        counter.inc(&[action, status, uri])
    }

    fn observe_duration(
        &self,
        seconds: f64,
        action: &str,
        status: &str,
        uri: &str,
    ) -> Result<(), StoreError> {
        let histogram = self.store.get_or_register_histogram(
            &self.namespace,
            REQUEST_DURATIONS,
            "request durations in seconds",
            &["action", "status", "uri"],
            self.buckets.as_deref(),
        )?;

        histogram.observe(seconds, &[ALL, ALL, ALL])?;
        histogram.observe(seconds, &[action, status, uri])
    }
}

/// `{method}-{route}`, with an empty route token when routing failed.
fn action(ctx: &RequestContext) -> String {
    format!("{}-{}", ctx.method(), ctx.route().unwrap_or_default())
}

impl Collector for RequestMetrics {
    fn name(&self) -> &str {
        "request_metrics"
    }

    fn on_start(&self, ctx: &mut RequestContext) -> Result<(), StoreError> {
        if ctx.is_options() {
            return Ok(());
        }
        ctx.extensions_mut().insert(RequestTimer(Instant::now()));
        Ok(())
    }

    fn on_received(&self, ctx: &mut RequestContext) -> Result<(), StoreError> {
        if ctx.is_options() {
            return Ok(());
        }

        // A broken instance gauge must not cost the request count.
        let instance = self.set_instance(ctx.hostname().unwrap_or(DEFAULT_INSTANCE));
        self.inc_requests_total(&action(ctx), &ctx.uri().to_string())?;
        instance
    }

    fn on_completed(&self, ctx: &mut RequestContext, status: StatusCode) -> Result<(), StoreError> {
        if ctx.is_options() {
            return Ok(());
        }

        let action = action(ctx);
        let uri = ctx.uri().to_string();
        let status_code = status.as_u16().to_string();

        if let Some(class) = StatusClass::from_status(status) {
            self.inc_responses_total(class, &action, &status_code, &uri)?;
        }

        if let Some(RequestTimer(started)) = ctx.extensions_mut().remove::<RequestTimer>() {
            let seconds = started.elapsed().as_secs_f64();
            self.observe_duration(seconds, &action, &status_code, &uri)?;
        }

        Ok(())
    }
}
