//! Shared application state.
//!
//! Built once at process start: the metric store, the collector registry
//! with the built-in request collector first, the lifecycle dispatch and the
//! renderer all come from here.

use crate::config::Config;
use crate::metrics::{
    Collector, CollectorRegistry, ExporterMetrics, Instrumentation, MetricStore, MetricsServer,
    Renderer, RequestMetrics,
};
use crate::util::ShutdownSignal;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state accessible from all tasks.
#[derive(Clone)]
pub struct AppState {
    /// Current configuration (swapped atomically on hot reload).
    config: Arc<ArcSwap<Config>>,

    /// Store holding every collected metric.
    store: MetricStore,

    /// Lifecycle dispatch to the registered collectors.
    instrumentation: Arc<Instrumentation>,

    /// Exposition renderer.
    renderer: Renderer,

    /// Shutdown signal.
    shutdown: ShutdownSignal,
}

impl AppState {
    /// Create state with only the built-in request collector.
    pub fn new(config: Config) -> Self {
        Self::with_collectors(config, Vec::new())
    }

    /// Create state with additional collectors, invoked after the built-in one
    /// in the order given.
    pub fn with_collectors(config: Config, extra: Vec<Arc<dyn Collector>>) -> Self {
        let store = MetricStore::new();
        let telemetry = ExporterMetrics::new();

        let mut request_metrics = RequestMetrics::new(config.metrics.namespace.clone(), store.clone());
        if let Some(ref buckets) = config.metrics.buckets {
            request_metrics = request_metrics.with_buckets(buckets.clone());
        }

        let mut collectors = CollectorRegistry::new();
        collectors.register(Arc::new(request_metrics));
        for collector in extra {
            collectors.register(collector);
        }

        let instrumentation = Instrumentation::new(collectors, telemetry.clone())
            .with_ignored_routes(config.metrics.ignored_routes.iter().cloned());
        let renderer = Renderer::new(store.clone(), telemetry);

        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            store,
            instrumentation: Arc::new(instrumentation),
            renderer,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Get the current configuration.
    pub fn config(&self) -> arc_swap::Guard<Arc<Config>> {
        self.config.load()
    }

    /// Apply a reloaded configuration.
    ///
    /// Only the ignored routes take effect immediately; the namespace,
    /// buckets and listener settings are fixed at startup.
    pub fn apply_reload(&self, new_config: Config) {
        let current = self.config.load();
        let old = &current.metrics;
        let new = &new_config.metrics;

        if old.namespace != new.namespace
            || old.buckets != new.buckets
            || old.address != new.address
            || old.path != new.path
            || old.instance != new.instance
        {
            warn!("metrics settings other than ignored_routes changed; restart to apply them");
        }

        self.instrumentation
            .set_ignored_routes(new.ignored_routes.iter().cloned());
        info!(ignored_routes = ?new.ignored_routes, "applied ignored routes");

        self.config.store(Arc::new(new_config));
    }

    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    pub fn instrumentation(&self) -> &Arc<Instrumentation> {
        &self.instrumentation
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Build the HTTP server for the current configuration.
    pub fn metrics_server(&self) -> MetricsServer {
        let config = self.config();
        MetricsServer::new(
            config.metrics.address,
            config.metrics.path.clone(),
            self.renderer.clone(),
            Arc::clone(&self.instrumentation),
        )
        .with_hostname(config.metrics.resolve_instance())
    }

    /// Get the shutdown signal.
    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Trigger shutdown.
    pub fn trigger_shutdown(&self) {
        self.shutdown.shutdown();
    }
}
