//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every backend, each on its own task
//! - Update the registry from the probe result
//!
//! A slow or hung backend only stalls its own loop, and each probe is cut off
//! by a timeout shorter than the interval, so checks never pile up.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::load_balancer::{Backend, BackendRegistry};
use crate::observability::metrics;

pub struct HealthProber {
    registry: Arc<BackendRegistry>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthProber {
    pub fn new(registry: Arc<BackendRegistry>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(HttpConnector::new());

        Self {
            registry,
            config,
            client,
        }
    }

    /// Probe until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            timeout = self.config.timeout_secs,
            path = %self.config.path,
            backends = self.registry.len(),
            "Health prober starting"
        );

        let prober = Arc::new(self);
        let mut loops = JoinSet::new();
        for backend in prober.registry.all() {
            let prober = prober.clone();
            let backend = backend.clone();
            loops.spawn(async move { prober.probe_loop(backend).await });
        }

        let _ = shutdown.recv().await;
        tracing::info!("Health prober received shutdown signal, exiting");
        loops.shutdown().await;
    }

    async fn probe_loop(&self, backend: Arc<Backend>) {
        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.check(&backend).await;
        }
    }

    /// Probe one backend once and record the result.
    pub async fn check(&self, backend: &Backend) -> bool {
        let healthy = self.probe(backend).await;
        if healthy {
            self.registry.mark_healthy(&backend.id);
        } else {
            self.registry.mark_unhealthy(&backend.id);
        }
        metrics::record_backend_health(&backend.id, backend.is_healthy());
        healthy
    }

    async fn probe(&self, backend: &Backend) -> bool {
        let uri = format!("{}{}", backend.url.as_str().trim_end_matches('/'), self.config.path);
        let request = match Request::builder()
            .method("GET")
            .uri(uri)
            .header("user-agent", "streaming-proxy-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(backend = %backend.id, error = %e, "Failed to build health check request");
                return false;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if success {
                    tracing::debug!(backend = %backend.id, "Backend is healthy");
                } else {
                    tracing::warn!(backend = %backend.id, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = %backend.id, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(backend = %backend.id, "Health check failed: timeout");
                false
            }
        }
    }
}
