//! Per-request orchestration.
//!
//! ```text
//! Received → BackendSelected → Forwarding → Completed
//!     │             │               │
//!     │             │               ├─ BackendTimeout     → 504
//!     │             │               ├─ BackendUnreachable → 502
//!     │             │               └─ ClientDisconnect   → 499, backend health untouched
//!     │             └─ NoBackendAvailable → 503 (no network call)
//!     └─ client gone at any point → exchange dropped, backend transfer aborted
//! ```
//!
//! Exactly one backend is tried per request. A failure after the response
//! head was relayed aborts the client connection; there is no retry.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::health::PassiveHealth;
use crate::http::forwarder::{Forwarder, ProxyRequest, ProxyResponse};
use crate::http::headers::{self, ForwardContext};
use crate::load_balancer::{BackendRegistry, RoundRobin};

pub struct Pipeline {
    selector: RoundRobin,
    forwarder: Forwarder,
    passive: PassiveHealth,
    scheme: String,
}

impl Pipeline {
    pub fn new(config: &ProxyConfig, registry: Arc<BackendRegistry>) -> Self {
        Self {
            selector: RoundRobin::new(registry.clone()),
            forwarder: Forwarder::new(&config.timeouts, &config.streaming),
            passive: PassiveHealth::new(registry, config.health_check.passive),
            scheme: config.listener.scheme.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        self.selector.registry()
    }

    /// Run one request through selection, header transform and forwarding.
    pub async fn handle(
        &self,
        request: Request<Body>,
        client_addr: SocketAddr,
    ) -> Result<ProxyResponse, ProxyError> {
        let backend = self.selector.next().map_err(|e| {
            tracing::warn!("No healthy backends available");
            ProxyError::from(e)
        })?;

        let ctx = ForwardContext::new(client_addr.ip(), &self.scheme);
        let mut request = ProxyRequest::from_request(request);
        request.headers = headers::request_headers(&request.headers, &ctx);

        tracing::info!(
            backend = %backend.id,
            method = %request.method,
            path = %request.path_and_query,
            "Proxying request"
        );

        match self.forwarder.forward(request, backend).await {
            Ok(mut response) => {
                response.headers = headers::response_headers(&response.headers);
                Ok(response)
            }
            Err(err) => {
                if self.passive.observe_failure(&err) {
                    tracing::debug!(error = %err, "Backend marked unhealthy after forwarding failure");
                }
                Err(err)
            }
        }
    }
}
