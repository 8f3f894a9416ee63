//! Metrics HTTP server.
//!
//! Serves the exposition document on a configurable path. Every request the
//! server handles is itself instrumented through the lifecycle hooks.

use crate::metrics::{text_response, Instrumentation, Renderer, RequestContext};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, ALLOW};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Route names resolved by the server.
pub const METRICS_ROUTE: &str = "metrics";
pub const HEALTH_ROUTE: &str = "health";
pub const INDEX_ROUTE: &str = "index";

/// Prometheus metrics HTTP server.
pub struct MetricsServer {
    /// Address to bind.
    address: SocketAddr,
    /// Shared per-request state.
    context: Arc<ServerContext>,
}

struct ServerContext {
    /// Path for metrics endpoint.
    path: String,
    renderer: Renderer,
    instrumentation: Arc<Instrumentation>,
    /// Host identifier attached to every request.
    hostname: Option<String>,
}

impl MetricsServer {
    /// Create a new metrics server.
    pub fn new(
        address: SocketAddr,
        path: impl Into<String>,
        renderer: Renderer,
        instrumentation: Arc<Instrumentation>,
    ) -> Self {
        Self {
            address,
            context: Arc::new(ServerContext {
                path: path.into(),
                renderer,
                instrumentation,
                hostname: None,
            }),
        }
    }

    /// Set the host identifier reported by the instance gauge.
    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        if let Some(context) = Arc::get_mut(&mut self.context) {
            context.hostname = hostname;
        }
        self
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn path(&self) -> &str {
        &self.context.path
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) {
        let listener = match TcpListener::bind(self.address).await {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, address = %self.address, "failed to bind metrics server");
                return;
            }
        };

        self.serve(listener, shutdown).await;
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        let address = listener.local_addr().unwrap_or(self.address);
        info!(address = %address, path = %self.context.path, "metrics server started");

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let context = Arc::clone(&self.context);

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let context = Arc::clone(&context);
                                    async move { handle_request(req, &context).await }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(error = %e, "metrics connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept metrics connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("metrics server shutting down");
                    break;
                }
            }
        }
    }
}

/// Handle one request, wrapped in the lifecycle hooks.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    context: &ServerContext,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let mut request = RequestContext::new(req.method().clone(), req.uri().clone());
    if let Some(hostname) = &context.hostname {
        request = request.with_hostname(hostname.clone());
    }

    context.instrumentation.start(&mut request);

    if let Some(route) = resolve_route(req.uri().path(), &context.path) {
        request = request.with_route(route);
    }
    debug!(path = %req.uri().path(), method = %req.method(), route = ?request.route(), "metrics request");

    context.instrumentation.received(&mut request);
    let response = respond(&request, context);
    context
        .instrumentation
        .completed(&mut request, response.status());

    Ok(response)
}

/// Map a request path to a route name.
fn resolve_route(path: &str, metrics_path: &str) -> Option<&'static str> {
    if path == metrics_path {
        Some(METRICS_ROUTE)
    } else if path == "/health" || path == "/healthz" {
        Some(HEALTH_ROUTE)
    } else if path == "/" {
        Some(INDEX_ROUTE)
    } else {
        None
    }
}

fn respond(request: &RequestContext, context: &ServerContext) -> Response<Full<Bytes>> {
    if request.route().is_none() {
        return text_response(StatusCode::NOT_FOUND, "text/plain", "Not found\n");
    }

    if request.is_options() {
        let mut response = text_response(StatusCode::NO_CONTENT, "text/plain", Bytes::new());
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET, OPTIONS"));
        return response;
    }

    if request.method() != Method::GET {
        return text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "text/plain",
            "Method not allowed\n",
        );
    }

    match request.route() {
        Some(METRICS_ROUTE) => context.renderer.render_response(),
        Some(HEALTH_ROUTE) => text_response(StatusCode::OK, "text/plain", "OK\n"),
        _ => {
            let body = format!(
                "reqmeter metrics server\n\nEndpoints:\n  {} - Prometheus metrics\n  /health - Health check\n",
                context.path
            );
            text_response(StatusCode::OK, "text/plain", body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{CollectorRegistry, ExporterMetrics, MetricStore};
    use hyper::http::Uri;

    fn test_context() -> ServerContext {
        let store = MetricStore::new();
        let telemetry = ExporterMetrics::new();
        ServerContext {
            path: "/metrics".to_string(),
            renderer: Renderer::new(store, telemetry.clone()),
            instrumentation: Arc::new(Instrumentation::new(CollectorRegistry::new(), telemetry)),
            hostname: None,
        }
    }

    fn routed(method: Method, path: &'static str) -> RequestContext {
        let mut ctx = RequestContext::new(method, Uri::from_static(path));
        if let Some(route) = resolve_route(path, "/metrics") {
            ctx = ctx.with_route(route);
        }
        ctx
    }

    #[test]
    fn test_metrics_server_new() {
        let context = test_context();
        let server = MetricsServer::new(
            "127.0.0.1:9090".parse().unwrap(),
            "/metrics",
            context.renderer.clone(),
            Arc::clone(&context.instrumentation),
        )
        .with_hostname(Some("web-1".to_string()));

        assert_eq!(server.address(), "127.0.0.1:9090".parse().unwrap());
        assert_eq!(server.path(), "/metrics");
        assert_eq!(server.context.hostname.as_deref(), Some("web-1"));
    }

    #[test]
    fn test_resolve_route() {
        assert_eq!(resolve_route("/metrics", "/metrics"), Some(METRICS_ROUTE));
        assert_eq!(resolve_route("/custom", "/custom"), Some(METRICS_ROUTE));
        assert_eq!(resolve_route("/healthz", "/metrics"), Some(HEALTH_ROUTE));
        assert_eq!(resolve_route("/", "/metrics"), Some(INDEX_ROUTE));
        assert_eq!(resolve_route("/nope", "/metrics"), None);
    }

    #[test]
    fn test_respond() {
        let context = test_context();

        let metrics = respond(&routed(Method::GET, "/metrics"), &context);
        assert_eq!(metrics.status(), StatusCode::OK);

        let health = respond(&routed(Method::GET, "/health"), &context);
        assert_eq!(health.status(), StatusCode::OK);

        let missing = respond(&routed(Method::GET, "/missing"), &context);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let post = respond(&routed(Method::POST, "/metrics"), &context);
        assert_eq!(post.status(), StatusCode::METHOD_NOT_ALLOWED);

        let options = respond(&routed(Method::OPTIONS, "/metrics"), &context);
        assert_eq!(options.status(), StatusCode::NO_CONTENT);
        assert_eq!(options.headers().get(ALLOW).unwrap(), "GET, OPTIONS");
    }
}
