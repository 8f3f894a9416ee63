//! In-memory metric store.
//!
//! Holds every registered metric together with its label schema and the
//! values accumulated per label tuple. Metrics are addressed by their full
//! name (`{namespace}_{name}`); the first registration of a name fixes its
//! type and label names for the lifetime of the store.
//!
//! The store is a cheap handle around shared state. Clone it into every
//! collector and into the renderer instead of reaching for a global.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Histogram boundaries used when a registration does not supply its own.
pub const DEFAULT_BUCKETS: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

/// Families written by the renderer itself rather than taken from the store.
const RESERVED_FAMILIES: [(&str, MetricKind); 4] = [
    ("reqmeter_info", MetricKind::Gauge),
    ("reqmeter_scrapes_total", MetricKind::Counter),
    ("reqmeter_dropped_updates_total", MetricKind::Counter),
    ("reqmeter_render_duration_seconds", MetricKind::Histogram),
];

/// Sample name suffixes a histogram adds to its family name.
const HISTOGRAM_SUFFIXES: [&str; 3] = ["_bucket", "_count", "_sum"];

/// Label values identifying one series within a metric.
pub type LabelValues = Vec<String>;

/// Errors returned by the metric store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metric '{name}' is registered as {registered}, requested as {requested}")]
    SchemaConflict {
        name: String,
        registered: String,
        requested: String,
    },

    #[error("metric '{0}' not found")]
    MetricNotFound(String),

    #[error("metric '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("metric '{name}' expects {expected} label values, got {actual}")]
    LabelCardinality {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("metric '{name}' collides with the samples written for '{existing}'")]
    NameCollision { name: String, existing: String },

    #[error("invalid {kind} name '{name}'")]
    InvalidName { kind: &'static str, name: String },

    #[error("invalid buckets for histogram '{name}': {reason}")]
    InvalidBuckets { name: String, reason: String },

    #[error("invalid value {value} for metric '{name}'")]
    InvalidValue { name: String, value: f64 },
}

/// Type of a registered metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    /// Name used on the exposition `# TYPE` line.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulated state of a histogram series.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSample {
    /// `(upper bound, cumulative count)` in ascending bound order.
    pub buckets: Vec<(f64, u64)>,
    /// Number of observations; also the `+Inf` bucket count.
    pub count: u64,
    /// Sum of all observed values.
    pub sum: f64,
}

impl HistogramSample {
    fn empty(bounds: &[f64]) -> Self {
        Self {
            buckets: bounds.iter().map(|bound| (*bound, 0)).collect(),
            count: 0,
            sum: 0.0,
        }
    }

    fn observe(&mut self, value: f64) {
        for (bound, count) in &mut self.buckets {
            if value <= *bound {
                *count += 1;
            }
        }
        self.count += 1;
        self.sum += value;
    }
}

/// Value of one series.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Counter(f64),
    Gauge(f64),
    Histogram(HistogramSample),
}

/// One labelled series of a metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: LabelValues,
    pub value: SampleValue,
}

/// Point-in-time view of a registered metric, as consumed by the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_names: Vec<String>,
    /// Series sorted by label values.
    pub samples: Vec<Sample>,
}

#[derive(Debug)]
struct Metric {
    name: String,
    help: String,
    kind: MetricKind,
    label_names: Vec<String>,
    buckets: Vec<f64>,
    values: Mutex<BTreeMap<LabelValues, SampleValue>>,
}

impl Metric {
    fn schema(&self) -> String {
        describe_schema(self.kind, self.label_names.iter().map(String::as_str))
    }

    fn matches(&self, kind: MetricKind, label_names: &[&str]) -> bool {
        self.kind == kind
            && self
                .label_names
                .iter()
                .map(String::as_str)
                .eq(label_names.iter().copied())
    }

    fn zero(&self) -> SampleValue {
        match self.kind {
            MetricKind::Counter => SampleValue::Counter(0.0),
            MetricKind::Gauge => SampleValue::Gauge(0.0),
            MetricKind::Histogram => SampleValue::Histogram(HistogramSample::empty(&self.buckets)),
        }
    }

    fn key(&self, labels: &[&str]) -> Result<LabelValues, StoreError> {
        if labels.len() != self.label_names.len() {
            return Err(StoreError::LabelCardinality {
                name: self.name.clone(),
                expected: self.label_names.len(),
                actual: labels.len(),
            });
        }
        Ok(labels.iter().map(|value| value.to_string()).collect())
    }

    /// Apply `update` to the series keyed by `labels`, creating it at zero.
    fn update<F>(&self, labels: &[&str], update: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut SampleValue),
    {
        let key = self.key(labels)?;
        let mut values = self.values.lock();
        let entry = values.entry(key).or_insert_with(|| self.zero());
        update(entry);
        Ok(())
    }

    fn sample(&self, labels: &[&str]) -> Option<SampleValue> {
        let key = self.key(labels).ok()?;
        self.values.lock().get(&key).cloned()
    }

    fn invalid_value(&self, value: f64) -> StoreError {
        StoreError::InvalidValue {
            name: self.name.clone(),
            value,
        }
    }

    fn family(&self) -> MetricFamily {
        let samples = self
            .values
            .lock()
            .iter()
            .map(|(labels, value)| Sample {
                labels: labels.clone(),
                value: value.clone(),
            })
            .collect();

        MetricFamily {
            name: self.name.clone(),
            help: self.help.clone(),
            kind: self.kind,
            label_names: self.label_names.clone(),
            samples,
        }
    }
}

/// Handle to a registered counter.
#[derive(Debug, Clone)]
pub struct Counter {
    metric: Arc<Metric>,
}

impl Counter {
    /// Full metric name.
    pub fn name(&self) -> &str {
        &self.metric.name
    }

    /// Increment the series for `labels` by one.
    pub fn inc(&self, labels: &[&str]) -> Result<(), StoreError> {
        self.inc_by(1.0, labels)
    }

    /// Increment the series for `labels` by `delta`, which must be finite and non-negative.
    pub fn inc_by(&self, delta: f64, labels: &[&str]) -> Result<(), StoreError> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(self.metric.invalid_value(delta));
        }
        self.metric.update(labels, |value| {
            if let SampleValue::Counter(total) = value {
                *total += delta;
            }
        })
    }

    /// Current value of the series for `labels`, if it has been touched.
    pub fn value(&self, labels: &[&str]) -> Option<f64> {
        match self.metric.sample(labels)? {
            SampleValue::Counter(total) => Some(total),
            _ => None,
        }
    }
}

/// Handle to a registered gauge.
#[derive(Debug, Clone)]
pub struct Gauge {
    metric: Arc<Metric>,
}

impl Gauge {
    /// Full metric name.
    pub fn name(&self) -> &str {
        &self.metric.name
    }

    /// Replace the value of the series for `labels`.
    pub fn set(&self, value: f64, labels: &[&str]) -> Result<(), StoreError> {
        if value.is_nan() {
            return Err(self.metric.invalid_value(value));
        }
        self.metric.update(labels, |current| {
            if let SampleValue::Gauge(gauge) = current {
                *gauge = value;
            }
        })
    }

    /// Add `delta` to the series for `labels`.
    pub fn inc_by(&self, delta: f64, labels: &[&str]) -> Result<(), StoreError> {
        if delta.is_nan() {
            return Err(self.metric.invalid_value(delta));
        }
        self.metric.update(labels, |current| {
            if let SampleValue::Gauge(gauge) = current {
                *gauge += delta;
            }
        })
    }

    /// Subtract `delta` from the series for `labels`.
    pub fn dec_by(&self, delta: f64, labels: &[&str]) -> Result<(), StoreError> {
        self.inc_by(-delta, labels)
    }

    /// Current value of the series for `labels`, if it has been touched.
    pub fn value(&self, labels: &[&str]) -> Option<f64> {
        match self.metric.sample(labels)? {
            SampleValue::Gauge(gauge) => Some(gauge),
            _ => None,
        }
    }
}

/// Handle to a registered histogram.
#[derive(Debug, Clone)]
pub struct Histogram {
    metric: Arc<Metric>,
}

impl Histogram {
    /// Full metric name.
    pub fn name(&self) -> &str {
        &self.metric.name
    }

    /// Bucket upper bounds, excluding the implicit `+Inf`.
    pub fn buckets(&self) -> &[f64] {
        &self.metric.buckets
    }

    /// Record one observation of `value` for `labels`.
    pub fn observe(&self, value: f64, labels: &[&str]) -> Result<(), StoreError> {
        if !value.is_finite() {
            return Err(self.metric.invalid_value(value));
        }
        self.metric.update(labels, |current| {
            if let SampleValue::Histogram(histogram) = current {
                histogram.observe(value);
            }
        })
    }

    /// Bucket counts, count and sum for `labels`, or `None` if nothing was observed.
    pub fn sample(&self, labels: &[&str]) -> Option<HistogramSample> {
        match self.metric.sample(labels)? {
            SampleValue::Histogram(histogram) => Some(histogram),
            _ => None,
        }
    }
}

/// Registration request, shared by every `get_or_register_*` entry point.
struct Registration<'a> {
    namespace: &'a str,
    name: &'a str,
    help: &'a str,
    kind: MetricKind,
    label_names: &'a [&'a str],
    buckets: Option<&'a [f64]>,
    exclusive: bool,
}

/// Shared store of all metrics.
#[derive(Clone, Default)]
pub struct MetricStore {
    inner: Arc<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    /// Lookup by full name.
    index: DashMap<String, Arc<Metric>>,
    /// Registration order. Held while inserting into `index` so both stay in step.
    order: Mutex<Vec<Arc<Metric>>>,
}

impl MetricStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered metrics.
    pub fn len(&self) -> usize {
        self.inner.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.index.is_empty()
    }

    /// Return the counter `namespace_name`, registering it on first use.
    pub fn get_or_register_counter(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<Counter, StoreError> {
        let metric = self.register(Registration {
            namespace,
            name,
            help,
            kind: MetricKind::Counter,
            label_names,
            buckets: None,
            exclusive: false,
        })?;
        Ok(Counter { metric })
    }

    /// Return the gauge `namespace_name`, registering it on first use.
    pub fn get_or_register_gauge(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<Gauge, StoreError> {
        let metric = self.register(Registration {
            namespace,
            name,
            help,
            kind: MetricKind::Gauge,
            label_names,
            buckets: None,
            exclusive: false,
        })?;
        Ok(Gauge { metric })
    }

    /// Register a new gauge, failing with [`StoreError::AlreadyRegistered`] if
    /// the name is taken. Exactly one concurrent caller wins the registration.
    pub fn register_gauge(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<Gauge, StoreError> {
        let metric = self.register(Registration {
            namespace,
            name,
            help,
            kind: MetricKind::Gauge,
            label_names,
            buckets: None,
            exclusive: true,
        })?;
        Ok(Gauge { metric })
    }

    /// Return the histogram `namespace_name`, registering it on first use.
    ///
    /// `buckets` must be strictly increasing; `None` selects
    /// [`DEFAULT_BUCKETS`]. An existing histogram keeps the boundaries it was
    /// first registered with.
    pub fn get_or_register_histogram(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        label_names: &[&str],
        buckets: Option<&[f64]>,
    ) -> Result<Histogram, StoreError> {
        let metric = self.register(Registration {
            namespace,
            name,
            help,
            kind: MetricKind::Histogram,
            label_names,
            buckets,
            exclusive: false,
        })?;
        Ok(Histogram { metric })
    }

    /// Look up an existing gauge.
    ///
    /// Returns `Ok(None)` when nothing is registered under the name, and
    /// [`StoreError::SchemaConflict`] when the name belongs to another type.
    pub fn find_gauge(&self, namespace: &str, name: &str) -> Result<Option<Gauge>, StoreError> {
        Ok(self
            .lookup(namespace, name, MetricKind::Gauge)?
            .map(|metric| Gauge { metric }))
    }

    /// Look up an existing gauge, failing with [`StoreError::MetricNotFound`].
    pub fn get_gauge(&self, namespace: &str, name: &str) -> Result<Gauge, StoreError> {
        self.find_gauge(namespace, name)?
            .ok_or_else(|| StoreError::MetricNotFound(full_name(namespace, name)))
    }

    /// Snapshot every metric in registration order.
    pub fn metrics(&self) -> Vec<MetricFamily> {
        let order = self.inner.order.lock().clone();
        order.iter().map(|metric| metric.family()).collect()
    }

    fn lookup(
        &self,
        namespace: &str,
        name: &str,
        kind: MetricKind,
    ) -> Result<Option<Arc<Metric>>, StoreError> {
        let full = full_name(namespace, name);
        let Some(metric) = self.inner.index.get(&full).map(|m| Arc::clone(m.value())) else {
            return Ok(None);
        };
        if metric.kind != kind {
            return Err(StoreError::SchemaConflict {
                name: full,
                registered: metric.schema(),
                requested: kind.to_string(),
            });
        }
        Ok(Some(metric))
    }

    /// Find another metric whose rendered sample names overlap those of
    /// `name`, such as a counter `lat_count` next to a histogram `lat`.
    ///
    /// Must run under the `order` lock and outside any `index` entry guard.
    fn colliding(&self, name: &str, kind: MetricKind) -> Option<Arc<Metric>> {
        exposed_names(name, kind).iter().find_map(|exposed| {
            let same_family = (exposed != name)
                .then(|| self.inner.index.get(exposed).map(|m| Arc::clone(m.value())))
                .flatten();

            same_family.or_else(|| {
                HISTOGRAM_SUFFIXES
                    .iter()
                    .filter_map(|suffix| exposed.strip_suffix(suffix))
                    .filter(|base| *base != name)
                    .filter_map(|base| self.inner.index.get(base).map(|m| Arc::clone(m.value())))
                    .find(|metric| metric.kind == MetricKind::Histogram)
            })
        })
    }

    fn register(&self, request: Registration<'_>) -> Result<Arc<Metric>, StoreError> {
        let full = full_name(request.namespace, request.name);

        // Fast path: no store-wide lock when the metric already exists.
        let existing = self.inner.index.get(&full).map(|m| Arc::clone(m.value()));
        if let Some(metric) = existing {
            return reuse(metric, &request);
        }

        validate_metric_name(&full)?;
        validate_not_reserved(&full, request.kind)?;
        validate_label_names(&full, request.kind, request.label_names)?;
        let buckets = match request.kind {
            MetricKind::Histogram => {
                let buckets = request.buckets.unwrap_or(&DEFAULT_BUCKETS);
                validate_buckets(&full, buckets)?;
                buckets.to_vec()
            }
            _ => Vec::new(),
        };

        let mut order = self.inner.order.lock();
        if let Some(existing) = self.colliding(&full, request.kind) {
            return Err(StoreError::NameCollision {
                name: full,
                existing: existing.name.clone(),
            });
        }
        match self.inner.index.entry(full) {
            Entry::Occupied(entry) => {
                let metric = Arc::clone(entry.get());
                drop(entry);
                drop(order);
                reuse(metric, &request)
            }
            Entry::Vacant(entry) => {
                let metric = Arc::new(Metric {
                    name: entry.key().clone(),
                    help: request.help.to_string(),
                    kind: request.kind,
                    label_names: request.label_names.iter().map(|l| l.to_string()).collect(),
                    buckets,
                    values: Mutex::new(BTreeMap::new()),
                });
                entry.insert(Arc::clone(&metric));
                order.push(Arc::clone(&metric));
                tracing::debug!(
                    metric = %metric.name,
                    kind = %metric.kind,
                    labels = ?metric.label_names,
                    "registered metric"
                );
                Ok(metric)
            }
        }
    }
}

impl fmt::Debug for MetricStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricStore")
            .field("metrics", &self.len())
            .finish()
    }
}

fn reuse(metric: Arc<Metric>, request: &Registration<'_>) -> Result<Arc<Metric>, StoreError> {
    if request.exclusive {
        return Err(StoreError::AlreadyRegistered(metric.name.clone()));
    }
    if !metric.matches(request.kind, request.label_names) {
        return Err(StoreError::SchemaConflict {
            name: metric.name.clone(),
            registered: metric.schema(),
            requested: describe_schema(request.kind, request.label_names.iter().copied()),
        });
    }
    Ok(metric)
}

/// Join a namespace and a metric name. An empty namespace leaves the name as is.
pub fn full_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}_{}", namespace, name)
    }
}

fn describe_schema<'a>(kind: MetricKind, labels: impl Iterator<Item = &'a str>) -> String {
    format!("{}{{{}}}", kind, labels.collect::<Vec<_>>().join(","))
}

/// Whether `name` is a valid metric name (`[a-zA-Z_:][a-zA-Z0-9_:]*`).
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_metric_name(name: &str) -> Result<(), StoreError> {
    if is_valid_metric_name(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidName {
            kind: "metric",
            name: name.to_string(),
        })
    }
}

/// Every sample name a metric contributes to the exposition document.
fn exposed_names(name: &str, kind: MetricKind) -> Vec<String> {
    let mut names = vec![name.to_string()];
    if kind == MetricKind::Histogram {
        names.extend(HISTOGRAM_SUFFIXES.iter().map(|suffix| format!("{}{}", name, suffix)));
    }
    names
}

fn validate_not_reserved(name: &str, kind: MetricKind) -> Result<(), StoreError> {
    let exposed = exposed_names(name, kind);
    for (reserved, reserved_kind) in RESERVED_FAMILIES {
        if exposed_names(reserved, reserved_kind)
            .iter()
            .any(|sample| exposed.contains(sample))
        {
            return Err(StoreError::NameCollision {
                name: name.to_string(),
                existing: reserved.to_string(),
            });
        }
    }
    Ok(())
}

fn validate_label_names(metric: &str, kind: MetricKind, labels: &[&str]) -> Result<(), StoreError> {
    for (i, label) in labels.iter().enumerate() {
        let reserved = kind == MetricKind::Histogram && *label == "le";
        let duplicate = labels[..i].contains(label);
        if !is_valid_label_name(label) || reserved || duplicate {
            return Err(StoreError::InvalidName {
                kind: "label",
                name: format!("{}.{}", metric, label),
            });
        }
    }
    Ok(())
}

/// Check that histogram bounds are non-empty, finite and strictly increasing.
pub fn validate_buckets(metric: &str, buckets: &[f64]) -> Result<(), StoreError> {
    let invalid = |reason: &str| StoreError::InvalidBuckets {
        name: metric.to_string(),
        reason: reason.to_string(),
    };

    if buckets.is_empty() {
        return Err(invalid("at least one bucket is required"));
    }
    if buckets.iter().any(|b| !b.is_finite()) {
        return Err(invalid("bucket bounds must be finite"));
    }
    if buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(invalid("bucket bounds must be strictly increasing"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_register_returns_same_metric() {
        let store = MetricStore::new();
        let first = store
            .get_or_register_counter("app", "hits_total", "hits", &["route"])
            .unwrap();
        let second = store
            .get_or_register_counter("app", "hits_total", "hits", &["route"])
            .unwrap();

        first.inc(&["home"]).unwrap();
        second.inc(&["home"]).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(first.value(&["home"]), Some(2.0));
        assert_eq!(first.name(), "app_hits_total");
    }

    #[test]
    fn test_schema_conflict_on_labels() {
        let store = MetricStore::new();
        store
            .get_or_register_counter("app", "hits_total", "hits", &["route"])
            .unwrap();

        let result = store.get_or_register_counter("app", "hits_total", "hits", &["route", "uri"]);
        assert!(matches!(result, Err(StoreError::SchemaConflict { .. })));
    }

    #[test]
    fn test_schema_conflict_on_type() {
        let store = MetricStore::new();
        store
            .get_or_register_counter("app", "thing", "a thing", &[])
            .unwrap();

        let result = store.get_or_register_gauge("app", "thing", "a thing", &[]);
        match result {
            Err(StoreError::SchemaConflict {
                registered,
                requested,
                ..
            }) => {
                assert_eq!(registered, "counter{}");
                assert_eq!(requested, "gauge{}");
            }
            other => panic!("expected schema conflict, got {:?}", other),
        }

        assert!(matches!(
            store.find_gauge("app", "thing"),
            Err(StoreError::SchemaConflict { .. })
        ));
    }

    #[test]
    fn test_label_cardinality_checked() {
        let store = MetricStore::new();
        let counter = store
            .get_or_register_counter("app", "hits_total", "hits", &["action", "uri"])
            .unwrap();

        let result = counter.inc(&["all"]);
        assert!(matches!(
            result,
            Err(StoreError::LabelCardinality {
                expected: 2,
                actual: 1,
                ..
            })
        ));
        assert_eq!(counter.value(&["all"]), None);
    }

    #[test]
    fn test_counter_rejects_negative_delta() {
        let store = MetricStore::new();
        let counter = store
            .get_or_register_counter("", "bytes_total", "bytes", &[])
            .unwrap();

        assert!(counter.inc_by(-1.0, &[]).is_err());
        assert!(counter.inc_by(f64::NAN, &[]).is_err());
        counter.inc_by(2.5, &[]).unwrap();
        assert_eq!(counter.value(&[]), Some(2.5));
        assert_eq!(counter.name(), "bytes_total");
    }

    #[test]
    fn test_gauge_lookup() {
        let store = MetricStore::new();

        assert!(store.find_gauge("app", "instance_name").unwrap().is_none());
        assert!(matches!(
            store.get_gauge("app", "instance_name"),
            Err(StoreError::MetricNotFound(name)) if name == "app_instance_name"
        ));

        let gauge = store
            .register_gauge("app", "instance_name", "app instance name", &["instance"])
            .unwrap();
        gauge.set(1.0, &["web-1"]).unwrap();

        let found = store.get_gauge("app", "instance_name").unwrap();
        assert_eq!(found.value(&["web-1"]), Some(1.0));
    }

    #[test]
    fn test_register_gauge_is_exclusive() {
        let store = MetricStore::new();
        store.register_gauge("app", "up", "up", &[]).unwrap();

        assert!(matches!(
            store.register_gauge("app", "up", "up", &[]),
            Err(StoreError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_gauge_set_and_adjust() {
        let store = MetricStore::new();
        let gauge = store
            .get_or_register_gauge("app", "in_flight", "in flight", &["route"])
            .unwrap();

        gauge.set(5.0, &["a"]).unwrap();
        gauge.inc_by(2.0, &["a"]).unwrap();
        gauge.dec_by(4.0, &["a"]).unwrap();
        assert_eq!(gauge.value(&["a"]), Some(3.0));

        gauge.set(-1.5, &["a"]).unwrap();
        assert_eq!(gauge.value(&["a"]), Some(-1.5));
        assert!(gauge.set(f64::NAN, &["a"]).is_err());
    }

    #[test]
    fn test_histogram_observe() {
        let store = MetricStore::new();
        let histogram = store
            .get_or_register_histogram("app", "latency", "latency", &["route"], Some(&[0.1, 0.5, 1.0]))
            .unwrap();

        histogram.observe(0.3, &["a"]).unwrap();
        histogram.observe(0.1, &["a"]).unwrap();
        histogram.observe(4.0, &["a"]).unwrap();

        let sample = histogram.sample(&["a"]).unwrap();
        assert_eq!(sample.buckets, vec![(0.1, 1), (0.5, 2), (1.0, 2)]);
        assert_eq!(sample.count, 3);
        assert!((sample.sum - 4.4).abs() < 1e-9);
        assert!(histogram.observe(f64::INFINITY, &["a"]).is_err());
    }

    #[test]
    fn test_histogram_default_buckets() {
        let store = MetricStore::new();
        let histogram = store
            .get_or_register_histogram("app", "latency", "latency", &[], None)
            .unwrap();
        assert_eq!(histogram.buckets(), &DEFAULT_BUCKETS);

        // Re-registration keeps the first-registered bounds.
        let again = store
            .get_or_register_histogram("app", "latency", "latency", &[], Some(&[1.0]))
            .unwrap();
        assert_eq!(again.buckets(), &DEFAULT_BUCKETS);
    }

    #[test]
    fn test_invalid_buckets() {
        let store = MetricStore::new();
        for buckets in [&[][..], &[1.0, 1.0][..], &[2.0, 1.0][..], &[1.0, f64::INFINITY][..]] {
            let result = store.get_or_register_histogram("app", "h", "h", &[], Some(buckets));
            assert!(matches!(result, Err(StoreError::InvalidBuckets { .. })));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_invalid_names() {
        let store = MetricStore::new();
        assert!(store.get_or_register_counter("app", "bad-name", "", &[]).is_err());
        assert!(store.get_or_register_counter("1app", "ok", "", &[]).is_err());
        assert!(store.get_or_register_counter("app", "ok", "", &["bad label"]).is_err());
        assert!(store.get_or_register_counter("app", "ok", "", &["__reserved"]).is_err());
        assert!(store.get_or_register_counter("app", "ok", "", &["a", "a"]).is_err());
        assert!(store
            .get_or_register_histogram("app", "ok", "", &["le"], None)
            .is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_metrics_in_registration_order() {
        let store = MetricStore::new();
        store.get_or_register_gauge("app", "zeta", "z", &[]).unwrap();
        store.get_or_register_counter("app", "alpha", "a", &[]).unwrap();
        store
            .get_or_register_histogram("app", "mid", "m", &[], None)
            .unwrap();

        let names: Vec<_> = store.metrics().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["app_zeta", "app_alpha", "app_mid"]);
    }

    #[test]
    fn test_samples_sorted_by_labels() {
        let store = MetricStore::new();
        let counter = store
            .get_or_register_counter("app", "hits_total", "hits", &["route"])
            .unwrap();
        counter.inc(&["b"]).unwrap();
        counter.inc(&["a"]).unwrap();
        counter.inc(&["b"]).unwrap();

        let family = store.metrics().remove(0);
        assert_eq!(family.kind, MetricKind::Counter);
        assert_eq!(family.label_names, vec!["route"]);
        assert_eq!(
            family.samples,
            vec![
                Sample {
                    labels: vec!["a".to_string()],
                    value: SampleValue::Counter(1.0),
                },
                Sample {
                    labels: vec!["b".to_string()],
                    value: SampleValue::Counter(2.0),
                },
            ]
        );
    }

    #[test]
    fn test_concurrent_increments() {
        const THREADS: usize = 8;
        const ITERATIONS: usize = 1000;

        let store = MetricStore::new();
        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                let store = store.clone();
                scope.spawn(move || {
                    for _ in 0..ITERATIONS {
                        let counter = store
                            .get_or_register_counter("app", "hits_total", "hits", &["route"])
                            .unwrap();
                        counter.inc(&["home"]).unwrap();
                    }
                });
            }
        });

        let counter = store
            .get_or_register_counter("app", "hits_total", "hits", &["route"])
            .unwrap();
        assert_eq!(counter.value(&["home"]), Some((THREADS * ITERATIONS) as f64));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reserved_names_rejected() {
        let store = MetricStore::new();

        let info = store.get_or_register_gauge("reqmeter", "info", "user", &[]);
        assert!(matches!(
            info,
            Err(StoreError::NameCollision { ref existing, .. }) if existing == "reqmeter_info"
        ));

        let render_count = store.get_or_register_counter("reqmeter", "render_duration_seconds_count", "", &[]);
        assert!(matches!(render_count, Err(StoreError::NameCollision { .. })));

        // The prefix alone is fine
        assert!(store.get_or_register_gauge("reqmeter", "info_other", "", &[]).is_ok());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_histogram_suffix_collisions() {
        let store = MetricStore::new();
        store
            .get_or_register_histogram("", "lat", "latency", &[], None)
            .unwrap();

        for name in ["lat_count", "lat_sum", "lat_bucket"] {
            let result = store.get_or_register_counter("", name, "", &[]);
            assert!(
                matches!(result, Err(StoreError::NameCollision { ref existing, .. }) if existing == "lat"),
                "{} should collide",
                name
            );
        }

        // The other way round: a histogram over an existing `_sum` metric
        store.get_or_register_gauge("", "size_sum", "", &[]).unwrap();
        let result = store.get_or_register_histogram("", "size", "", &[], None);
        assert!(matches!(
            result,
            Err(StoreError::NameCollision { ref existing, .. }) if existing == "size_sum"
        ));

        // Re-registering the histogram itself is unaffected
        assert!(store.get_or_register_histogram("", "lat", "latency", &[], None).is_ok());
        assert_eq!(store.len(), 2);
    }
}
