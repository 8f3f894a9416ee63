//! Text exposition of the metric store.
//!
//! Produces the Prometheus text format (version 0.0.4):
//!
//! ```text
//! # HELP app_http_requests_total total request count
//! # TYPE app_http_requests_total counter
//! app_http_requests_total{action="all",uri="all"} 3
//! ```

use crate::metrics::store::{MetricFamily, MetricStore, SampleValue};
use crate::metrics::ExporterMetrics;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use std::fmt::{self, Write};
use std::time::Instant;
use thiserror::Error;
use tracing::error;

/// Media type of the text exposition format.
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Errors that can occur while rendering.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to format exposition document: {0}")]
    Format(#[from] fmt::Error),
}

/// Renders the metric store into exposition documents.
#[derive(Clone)]
pub struct Renderer {
    store: MetricStore,
    telemetry: ExporterMetrics,
}

impl Renderer {
    pub fn new(store: MetricStore, telemetry: ExporterMetrics) -> Self {
        Self { store, telemetry }
    }

    /// Render every registered metric, the runtime info metric and the
    /// exporter's own metrics. The store is only read.
    pub fn render(&self) -> Result<String, RenderError> {
        let start = Instant::now();
        let mut out = String::new();

        for family in self.store.metrics() {
            write_family(&mut out, &family)?;
        }
        write_runtime_info(&mut out)?;

        self.telemetry.record_scrape(start.elapsed());
        self.telemetry.encode(&mut out)?;

        Ok(out)
    }

    /// Render into an HTTP response. Rendering failures become a 500.
    pub fn render_response(&self) -> Response<Full<Bytes>> {
        match self.render() {
            Ok(body) => text_response(StatusCode::OK, EXPOSITION_CONTENT_TYPE, body),
            Err(e) => {
                error!(error = %e, "failed to render metrics");
                text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    "Failed to encode metrics\n",
                )
            }
        }
    }
}

/// Build a plain response with the given content type.
pub fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn write_family(out: &mut String, family: &MetricFamily) -> fmt::Result {
    let name = &family.name;
    writeln!(out, "# HELP {} {}", name, EscapedHelp(&family.help))?;
    writeln!(out, "# TYPE {} {}", name, family.kind)?;

    for sample in &family.samples {
        let labels = LabelSet {
            names: &family.label_names,
            values: &sample.labels,
            le: None,
        };

        match &sample.value {
            SampleValue::Counter(value) | SampleValue::Gauge(value) => {
                writeln!(out, "{}{} {}", name, labels, Number(*value))?;
            }
            SampleValue::Histogram(histogram) => {
                for (bound, count) in &histogram.buckets {
                    let le = Number(*bound).to_string();
                    writeln!(out, "{}_bucket{} {}", name, labels.with_le(&le), count)?;
                }
                writeln!(out, "{}_bucket{} {}", name, labels.with_le("+Inf"), histogram.count)?;
                writeln!(out, "{}_count{} {}", name, labels, histogram.count)?;
                writeln!(out, "{}_sum{} {}", name, labels, Number(histogram.sum))?;
            }
        }
    }
    Ok(())
}

fn write_runtime_info(out: &mut String) -> fmt::Result {
    writeln!(out, "# HELP reqmeter_info Information about the reqmeter runtime.")?;
    writeln!(out, "# TYPE reqmeter_info gauge")?;
    writeln!(
        out,
        "reqmeter_info{{version=\"{}\"}} 1",
        EscapedLabel(env!("CARGO_PKG_VERSION"))
    )
}

/// `{name="value",...}` for one series, empty when there are no labels.
#[derive(Clone, Copy)]
struct LabelSet<'a> {
    names: &'a [String],
    values: &'a [String],
    le: Option<&'a str>,
}

impl<'a> LabelSet<'a> {
    fn with_le(self, le: &'a str) -> Self {
        Self {
            le: Some(le),
            ..self
        }
    }
}

impl fmt::Display for LabelSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.names.is_empty() && self.le.is_none() {
            return Ok(());
        }

        f.write_char('{')?;
        let mut first = true;
        for (name, value) in self.names.iter().zip(self.values) {
            if !first {
                f.write_char(',')?;
            }
            first = false;
            write!(f, "{}=\"{}\"", name, EscapedLabel(value))?;
        }
        if let Some(le) = self.le {
            if !first {
                f.write_char(',')?;
            }
            write!(f, "le=\"{}\"", le)?;
        }
        f.write_char('}')
    }
}

/// Sample value; integral values are written without a fraction.
struct Number(f64);

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;
        if value.is_nan() {
            f.write_str("NaN")
        } else if value == f64::INFINITY {
            f.write_str("+Inf")
        } else if value == f64::NEG_INFINITY {
            f.write_str("-Inf")
        } else {
            write!(f, "{}", value)
        }
    }
}

/// Label value with `\`, `"` and newlines escaped.
struct EscapedLabel<'a>(&'a str);

impl fmt::Display for EscapedLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            match c {
                '\\' => f.write_str("\\\\")?,
                '"' => f.write_str("\\\"")?,
                '\n' => f.write_str("\\n")?,
                c => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

/// Help text with `\` and newlines escaped.
struct EscapedHelp<'a>(&'a str);

impl fmt::Display for EscapedHelp<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            match c {
                '\\' => f.write_str("\\\\")?,
                '\n' => f.write_str("\\n")?,
                c => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> (MetricStore, Renderer) {
        let store = MetricStore::new();
        let renderer = Renderer::new(store.clone(), ExporterMetrics::new());
        (store, renderer)
    }

    #[test]
    fn test_empty_store_has_runtime_info() {
        let (_, renderer) = renderer();
        let output = renderer.render().unwrap();

        let expected = format!(
            "# HELP reqmeter_info Information about the reqmeter runtime.\n# TYPE reqmeter_info gauge\nreqmeter_info{{version=\"{}\"}} 1\n",
            env!("CARGO_PKG_VERSION")
        );
        assert!(output.starts_with(&expected));
    }

    #[test]
    fn test_render_counter_and_gauge() {
        let (store, renderer) = renderer();
        let counter = store
            .get_or_register_counter("dummy", "http_requests_total", "total request count", &["action", "uri"])
            .unwrap();
        counter.inc(&["all", "all"]).unwrap();
        counter.inc_by(2.0, &["GET-home", "/"]).unwrap();
        store
            .get_or_register_gauge("dummy", "temperature", "temp", &[])
            .unwrap()
            .set(-3.5, &[])
            .unwrap();

        let output = renderer.render().unwrap();
        assert!(output.contains("# HELP dummy_http_requests_total total request count\n"));
        assert!(output.contains("# TYPE dummy_http_requests_total counter\n"));
        assert!(output.contains("dummy_http_requests_total{action=\"all\",uri=\"all\"} 1\n"));
        assert!(output.contains("dummy_http_requests_total{action=\"GET-home\",uri=\"/\"} 2\n"));
        assert!(output.contains("# TYPE dummy_temperature gauge\n"));
        assert!(output.contains("dummy_temperature -3.5\n"));
    }

    #[test]
    fn test_render_histogram() {
        let (store, renderer) = renderer();
        let histogram = store
            .get_or_register_histogram("dummy", "latency_seconds", "latency", &["route"], Some(&[0.1, 1.0]))
            .unwrap();
        histogram.observe(0.05, &["home"]).unwrap();
        histogram.observe(0.5, &["home"]).unwrap();
        histogram.observe(3.0, &["home"]).unwrap();

        let output = renderer.render().unwrap();
        let expected = "\
# HELP dummy_latency_seconds latency
# TYPE dummy_latency_seconds histogram
dummy_latency_seconds_bucket{route=\"home\",le=\"0.1\"} 1
dummy_latency_seconds_bucket{route=\"home\",le=\"1\"} 2
dummy_latency_seconds_bucket{route=\"home\",le=\"+Inf\"} 3
dummy_latency_seconds_count{route=\"home\"} 3
dummy_latency_seconds_sum{route=\"home\"} 3.55
";
        assert!(output.starts_with(expected), "unexpected output:\n{}", output);
    }

    #[test]
    fn test_unlabelled_histogram_buckets() {
        let (store, renderer) = renderer();
        store
            .get_or_register_histogram("", "jobs", "jobs", &[], Some(&[1.0]))
            .unwrap()
            .observe(2.0, &[])
            .unwrap();

        let output = renderer.render().unwrap();
        assert!(output.contains("jobs_bucket{le=\"1\"} 0\n"));
        assert!(output.contains("jobs_bucket{le=\"+Inf\"} 1\n"));
        assert!(output.contains("jobs_count 1\n"));
        assert!(output.contains("jobs_sum 2\n"));
    }

    #[test]
    fn test_escaping() {
        let (store, renderer) = renderer();
        store
            .get_or_register_counter("app", "odd_total", "line one\nback\\slash", &["path"])
            .unwrap()
            .inc(&["/a\"b\\c\nd"])
            .unwrap();

        let output = renderer.render().unwrap();
        assert!(output.contains("# HELP app_odd_total line one\\nback\\\\slash\n"));
        assert!(output.contains("app_odd_total{path=\"/a\\\"b\\\\c\\nd\"} 1\n"));
    }

    #[test]
    fn test_render_does_not_mutate_store() {
        let (store, renderer) = renderer();
        store
            .get_or_register_counter("app", "hits_total", "hits", &[])
            .unwrap()
            .inc(&[])
            .unwrap();

        let before = store.metrics();
        let first = renderer.render().unwrap();
        let second = renderer.render().unwrap();

        assert_eq!(store.metrics(), before);
        assert_eq!(store.len(), 1);
        assert!(first.contains("app_hits_total 1\n"));
        assert!(second.contains("app_hits_total 1\n"));
    }

    #[test]
    fn test_render_records_scrapes() {
        let store = MetricStore::new();
        let telemetry = ExporterMetrics::new();
        let renderer = Renderer::new(store, telemetry.clone());

        renderer.render().unwrap();
        let output = renderer.render().unwrap();

        assert_eq!(telemetry.scrapes(), 2);
        assert!(output.contains("# TYPE reqmeter_scrapes_total counter\nreqmeter_scrapes_total 2\n"));
        assert!(!output.contains("# EOF"));
    }

    #[test]
    fn test_every_sample_belongs_to_one_declared_family() {
        let store = MetricStore::new();
        let telemetry = ExporterMetrics::new();
        let renderer = Renderer::new(store.clone(), telemetry.clone());

        store
            .get_or_register_histogram("", "lat", "latency", &[], None)
            .unwrap()
            .observe(0.2, &[])
            .unwrap();
        assert!(store.get_or_register_counter("", "lat_count", "", &[]).is_err());
        assert!(store.get_or_register_gauge("reqmeter", "info", "", &[]).is_err());
        telemetry.record_dropped_update(crate::metrics::Hook::Received);

        let output = renderer.render().unwrap();

        let mut families: Vec<(&str, &str)> = Vec::new();
        for line in output.lines() {
            if let Some(declared) = line.strip_prefix("# TYPE ") {
                let (name, kind) = declared.split_once(' ').unwrap();
                assert!(
                    families.iter().all(|(seen, _)| *seen != name),
                    "{} declared twice",
                    name
                );
                families.push((name, kind));
            } else if !line.starts_with('#') {
                let sample = line.split(['{', ' ']).next().unwrap();
                let (family, kind) = *families.last().unwrap();
                let suffix = sample.strip_prefix(family).unwrap_or_else(|| {
                    panic!("sample {} outside family {}", sample, family)
                });
                match kind {
                    "histogram" => assert!(["_bucket", "_count", "_sum"].contains(&suffix)),
                    _ => assert_eq!(suffix, "", "sample {} in family {}", sample, family),
                }
            }
        }
    }

    #[test]
    fn test_render_response() {
        let (_, renderer) = renderer();
        let response = renderer.render_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            EXPOSITION_CONTENT_TYPE
        );
    }

    #[test]
    fn test_number_format() {
        assert_eq!(Number(1.0).to_string(), "1");
        assert_eq!(Number(0.25).to_string(), "0.25");
        assert_eq!(Number(f64::INFINITY).to_string(), "+Inf");
        assert_eq!(Number(f64::NEG_INFINITY).to_string(), "-Inf");
        assert_eq!(Number(f64::NAN).to_string(), "NaN");
    }
}
