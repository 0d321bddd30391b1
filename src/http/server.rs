//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: health route plus a catch-all proxy route
//! - Wire up middleware (request ID, tracing)
//! - Run the health prober next to the listener
//! - Serve until the shutdown signal fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::health::HealthProber;
use crate::http::pipeline::Pipeline;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::load_balancer::BackendRegistry;
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    registry: Arc<BackendRegistry>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Self {
        let registry = Arc::new(BackendRegistry::new(&config.backends));
        let state = AppState {
            pipeline: Arc::new(Pipeline::new(&config, registry.clone())),
        };
        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            registry,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route(&config.listener.health_path, any(health_handler))
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(propagate_request_id_layer()),
            )
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// The router, for driving the server without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backends = self.registry.len(),
            "HTTP server starting"
        );

        let prober = HealthProber::new(self.registry.clone(), self.config.health_check.clone());
        let prober = tokio::spawn(prober.run(shutdown.resubscribe()));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        let _ = prober.await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 0)));
    let method = request.method().to_string();
    let span = tracing::info_span!(
        "proxy",
        request_id = %request_id(request.headers()),
        client = %client_addr,
    );

    let result = state
        .pipeline
        .handle(request, client_addr)
        .instrument(span.clone())
        .await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(response) => {
            span.in_scope(|| {
                tracing::info!(
                    backend = %response.backend(),
                    status = response.status.as_u16(),
                    elapsed_ms,
                    "Response head relayed"
                )
            });
            metrics::record_request(&method, response.status.as_u16(), response.backend(), start);
            response.into_response()
        }
        Err(err) => {
            let status = err.status_code();
            let backend = err.backend().unwrap_or("none");
            if err.is_backend_failure() {
                span.in_scope(|| {
                    tracing::error!(
                        backend = %backend,
                        status = status.as_u16(),
                        elapsed_ms,
                        error = %err,
                        "Upstream request failed"
                    )
                });
            } else if matches!(err, ProxyError::ClientDisconnect { .. }) {
                metrics::record_client_disconnect(backend);
                span.in_scope(|| {
                    tracing::info!(
                        backend = %backend,
                        elapsed_ms,
                        "Client disconnected mid-upload, aborting backend request"
                    )
                });
            }
            metrics::record_request(&method, status.as_u16(), backend, start);
            err.into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub backends: Vec<BackendStatus>,
}

#[derive(Debug, Serialize)]
pub struct BackendStatus {
    pub id: String,
    pub url: String,
    pub healthy: bool,
    pub active_connections: usize,
    pub last_checked_ms: Option<u64>,
}

/// The proxy's own health route. Always 200; `status` turns "degraded"
/// when no backend is currently healthy.
async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    let registry = state.pipeline.registry();
    let backends = registry
        .all()
        .iter()
        .map(|b| BackendStatus {
            id: b.id.clone(),
            url: b.url.to_string(),
            healthy: b.is_healthy(),
            active_connections: b.active_connections(),
            last_checked_ms: b.last_checked_ms(),
        })
        .collect();

    Json(HealthReport {
        status: if registry.any_healthy() { "ok" } else { "degraded" },
        backends,
    })
}
