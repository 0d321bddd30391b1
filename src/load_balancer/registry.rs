//! Backend registry.
//!
//! Holds the configured backends in configuration order. The set is fixed
//! for the life of the process; only the per-backend health flags change.

use std::sync::Arc;

use crate::config::BackendConfig;
use crate::load_balancer::backend::Backend;

#[derive(Debug)]
pub struct BackendRegistry {
    backends: Vec<Arc<Backend>>,
}

impl BackendRegistry {
    /// Build the registry from configuration, preserving order.
    pub fn new(configs: &[BackendConfig]) -> Self {
        let mut backends = Vec::with_capacity(configs.len());
        for config in configs {
            match Backend::parse(config.id(), &config.url) {
                Ok(backend) => backends.push(Arc::new(backend)),
                Err(e) => {
                    tracing::warn!(backend = %config.id(), url = %config.url, error = %e, "Invalid backend url, skipping");
                }
            }
        }
        Self { backends }
    }

    /// All backends, in round-robin order.
    pub fn all(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Backend>> {
        self.backends.iter().find(|b| b.id == id)
    }

    /// Mark a backend healthy. Unknown ids are ignored.
    pub fn mark_healthy(&self, id: &str) {
        self.set_health(id, true);
    }

    /// Mark a backend unhealthy. Unknown ids are ignored.
    pub fn mark_unhealthy(&self, id: &str) {
        self.set_health(id, false);
    }

    fn set_health(&self, id: &str, healthy: bool) {
        let Some(backend) = self.get(id) else {
            tracing::debug!(backend = %id, "Health update for unknown backend ignored");
            return;
        };
        let was_healthy = backend.set_healthy(healthy);
        if was_healthy != healthy {
            if healthy {
                tracing::info!(backend = %id, "Backend marked healthy");
            } else {
                tracing::warn!(backend = %id, "Backend marked unhealthy");
            }
        }
    }

    /// True if at least one backend is currently healthy.
    pub fn any_healthy(&self) -> bool {
        self.backends.iter().any(|b| b.is_healthy())
    }
}
