//! Lifecycle dispatch to registered collectors.
//!
//! The integration layer calls [`Instrumentation::start`],
//! [`Instrumentation::received`] and [`Instrumentation::completed`] for every
//! request; each call fans out to all collectors in registration order.
//!
//! Metrics collection is fail-open: a failing collector is logged and
//! counted, the remaining collectors still run, and nothing is reported back
//! to the request being instrumented.

use crate::metrics::collector::{Collector, CollectorRegistry, RequestContext};
use crate::metrics::telemetry::{ExporterMetrics, Hook};
use crate::metrics::StoreError;
use arc_swap::ArcSwap;
use hyper::http::StatusCode;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{trace, warn};

/// Dispatches lifecycle signals to collectors.
pub struct Instrumentation {
    collectors: CollectorRegistry,
    /// Route names excluded from collection. Swapped on config reload.
    ignored_routes: ArcSwap<HashSet<String>>,
    telemetry: ExporterMetrics,
}

impl Instrumentation {
    pub fn new(collectors: CollectorRegistry, telemetry: ExporterMetrics) -> Self {
        Self {
            collectors,
            ignored_routes: ArcSwap::from_pointee(HashSet::new()),
            telemetry,
        }
    }

    /// Set the initial ignored routes.
    pub fn with_ignored_routes<I, S>(self, routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_ignored_routes(routes);
        self
    }

    /// Replace the ignored routes atomically.
    pub fn set_ignored_routes<I, S>(&self, routes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let routes: HashSet<String> = routes.into_iter().map(Into::into).collect();
        self.ignored_routes.store(Arc::new(routes));
    }

    pub fn ignored_routes(&self) -> Arc<HashSet<String>> {
        self.ignored_routes.load_full()
    }

    pub fn collectors(&self) -> &CollectorRegistry {
        &self.collectors
    }

    /// Whether the request's route is excluded from collection.
    pub fn is_ignored(&self, ctx: &RequestContext) -> bool {
        ctx.route()
            .is_some_and(|route| self.ignored_routes.load().contains(route))
    }

    /// Request started, before routing.
    pub fn start(&self, ctx: &mut RequestContext) {
        self.dispatch(Hook::Start, ctx, |collector, ctx| collector.on_start(ctx));
    }

    /// Request routed, before the handler runs.
    pub fn received(&self, ctx: &mut RequestContext) {
        self.dispatch(Hook::Received, ctx, |collector, ctx| {
            collector.on_received(ctx)
        });
    }

    /// Response status known, before it is written.
    pub fn completed(&self, ctx: &mut RequestContext, status: StatusCode) {
        self.dispatch(Hook::Completed, ctx, |collector, ctx| {
            collector.on_completed(ctx, status)
        });
    }

    fn dispatch<F>(&self, hook: Hook, ctx: &mut RequestContext, mut invoke: F)
    where
        F: FnMut(&dyn Collector, &mut RequestContext) -> Result<(), StoreError>,
    {
        if self.is_ignored(ctx) {
            trace!(route = ?ctx.route(), hook = hook.as_str(), "route ignored by metrics");
            return;
        }

        for collector in self.collectors.collectors() {
            if let Err(e) = invoke(collector.as_ref(), ctx) {
                warn!(
                    collector = collector.name(),
                    hook = hook.as_str(),
                    method = %ctx.method(),
                    route = ?ctx.route(),
                    error = %e,
                    "dropping metrics update"
                );
                self.telemetry.record_dropped_update(hook);
            }
        }
    }
}
