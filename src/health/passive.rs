//! Passive health checking (failure detection).
//!
//! A connection failure or timeout seen while forwarding marks that backend
//! unhealthy straight away, without waiting for the next probe. A client
//! that breaks off its own upload says nothing about the backend. Only the
//! prober marks a backend healthy again.

use std::sync::Arc;

use crate::error::ProxyError;
use crate::load_balancer::BackendRegistry;
use crate::observability::metrics;

#[derive(Debug, Clone)]
pub struct PassiveHealth {
    registry: Arc<BackendRegistry>,
    enabled: bool,
}

impl PassiveHealth {
    pub fn new(registry: Arc<BackendRegistry>, enabled: bool) -> Self {
        Self { registry, enabled }
    }

    /// Record a failed exchange. Returns true if a backend was marked down.
    pub fn observe_failure(&self, error: &ProxyError) -> bool {
        if !self.enabled || !error.is_backend_failure() {
            return false;
        }
        let Some(id) = error.backend() else {
            return false;
        };
        self.registry.mark_unhealthy(id);
        metrics::record_backend_health(id, false);
        true
    }
}
