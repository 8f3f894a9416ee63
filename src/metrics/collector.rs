//! Collector plugin interface and registry.
//!
//! A collector observes the lifecycle of each request through three hooks,
//! each of which is optional. Per-request state (timers and the like) is kept
//! in the [`RequestContext`] extensions, never in the collector itself, since
//! one collector instance serves every request concurrently.

use crate::metrics::StoreError;
use hyper::http::{Extensions, Method, StatusCode, Uri};
use std::fmt;
use std::sync::Arc;

/// The request being instrumented, as seen by collectors.
#[derive(Debug)]
pub struct RequestContext {
    method: Method,
    uri: Uri,
    route: Option<String>,
    hostname: Option<String>,
    extensions: Extensions,
}

impl RequestContext {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            route: None,
            hostname: None,
            extensions: Extensions::new(),
        }
    }

    /// Attach the name of the route the request matched.
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Attach the identifier of the host serving the request.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Matched route name, `None` if routing did not resolve one.
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn is_options(&self) -> bool {
        self.method == Method::OPTIONS
    }

    /// Request-scoped state shared between the hooks of one request.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

/// A pluggable metrics collector.
///
/// Every hook defaults to a no-op so implementors only provide the ones they
/// need. Hooks run in the order start, received, completed for one request;
/// start and completed may be absent when the integration layer does not emit
/// them.
pub trait Collector: Send + Sync {
    /// Name used when logging failures of this collector.
    fn name(&self) -> &str {
        "collector"
    }

    /// Called before routing.
    fn on_start(&self, _ctx: &mut RequestContext) -> Result<(), StoreError> {
        Ok(())
    }

    /// Called after routing, before the handler runs.
    fn on_received(&self, _ctx: &mut RequestContext) -> Result<(), StoreError> {
        Ok(())
    }

    /// Called once the response status is known, before it is written.
    fn on_completed(&self, _ctx: &mut RequestContext, _status: StatusCode) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Ordered, append-only list of collectors.
///
/// Registration order is invocation order.
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    collectors: Vec<Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a collector. Registering the same collector twice invokes it twice.
    pub fn register(&mut self, collector: Arc<dyn Collector>) {
        self.collectors.push(collector);
    }

    pub fn collectors(&self) -> &[Arc<dyn Collector>] {
        &self.collectors
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

impl fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.collectors.iter().map(|c| c.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl Collector for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_register_preserves_order() {
        let first: Arc<dyn Collector> = Arc::new(Named("first"));
        let second: Arc<dyn Collector> = Arc::new(Named("second"));

        let mut registry = CollectorRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::clone(&first));
        registry.register(Arc::clone(&second));
        registry.register(Arc::clone(&first));

        let names: Vec<_> = registry.collectors().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["first", "second", "first"]);
        assert_eq!(registry.len(), 3);
        assert!(Arc::ptr_eq(&registry.collectors()[1], &second));
    }

    #[test]
    fn test_default_hooks_are_noops() {
        let collector = Named("noop");
        let mut ctx = RequestContext::new(Method::GET, Uri::from_static("/"));

        assert!(collector.on_start(&mut ctx).is_ok());
        assert!(collector.on_received(&mut ctx).is_ok());
        assert!(collector.on_completed(&mut ctx, StatusCode::OK).is_ok());
        assert!(ctx.extensions().is_empty());
    }

    #[test]
    fn test_request_context_accessors() {
        let ctx = RequestContext::new(Method::OPTIONS, Uri::from_static("/users?page=2"))
            .with_route("user_list")
            .with_hostname("web-1");

        assert!(ctx.is_options());
        assert_eq!(ctx.route(), Some("user_list"));
        assert_eq!(ctx.hostname(), Some("web-1"));
        assert_eq!(ctx.uri().to_string(), "/users?page=2");
    }
}
