//! Round-robin backend selection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::load_balancer::backend::Backend;
use crate::load_balancer::registry::BackendRegistry;

/// Every backend was skipped as unhealthy (or none are configured).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no healthy backend available")]
pub struct NoBackendAvailable;

/// Round-robin selector over a shared registry.
///
/// The cursor advances once per scan step, including steps that land on an
/// unhealthy backend, so concurrent callers interleave over the same cycle.
#[derive(Debug)]
pub struct RoundRobin {
    registry: Arc<BackendRegistry>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Pick the next healthy backend in configuration order.
    pub fn next(&self) -> Result<Arc<Backend>, NoBackendAvailable> {
        let backends = self.registry.all();
        let len = backends.len();

        for _ in 0..len {
            let index = self.advance(len);
            let backend = &backends[index];
            if backend.is_healthy() {
                return Ok(backend.clone());
            }
        }
        Err(NoBackendAvailable)
    }

    /// Current cursor position, always in `[0, len)`.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Advance the cursor by one (mod `len`) and return the position it held.
    fn advance(&self, len: usize) -> usize {
        match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
        {
            Ok(prev) | Err(prev) => prev,
        }
    }
}
