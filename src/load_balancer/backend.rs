//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server
//! - Track active exchanges
//! - Track health state and when it was last checked

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::uri::{InvalidUri, PathAndQuery};
use axum::http::Uri;
use url::Url;

use crate::observability::metrics;

/// A single backend server.
///
/// Health and counters are single-word atomics: readers tolerate a value that
/// is one probe interval stale, so no wider critical section is needed.
#[derive(Debug)]
pub struct Backend {
    /// Unique identifier from configuration.
    pub id: String,
    /// Parsed base URL.
    pub url: Url,
    /// Base URL as a string without trailing slash, ready for path concatenation.
    base: String,
    healthy: AtomicBool,
    /// Milliseconds since the Unix epoch of the last health update (0 = never).
    last_checked_ms: AtomicU64,
    active_connections: AtomicUsize,
}

impl Backend {
    /// Create a new backend. Backends start healthy.
    pub fn new(id: impl Into<String>, url: Url) -> Self {
        let base = url.as_str().trim_end_matches('/').to_string();
        Self {
            id: id.into(),
            url,
            base,
            healthy: AtomicBool::new(true),
            last_checked_ms: AtomicU64::new(0),
            active_connections: AtomicUsize::new(0),
        }
    }

    /// Parse `url` and create a backend.
    pub fn parse(id: impl Into<String>, url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(id, Url::parse(url)?))
    }

    /// Build the outbound URI: `{base url}{path+query}`.
    pub fn target_uri(&self, path_and_query: &PathAndQuery) -> Result<Uri, InvalidUri> {
        format!("{}{}", self.base, path_and_query.as_str()).parse()
    }

    // --- Health Logic ---

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Set the health flag and stamp the check time. Returns the previous flag.
    pub fn set_healthy(&self, healthy: bool) -> bool {
        self.last_checked_ms.store(now_ms(), Ordering::Relaxed);
        self.healthy.swap(healthy, Ordering::AcqRel)
    }

    /// Milliseconds since the Unix epoch of the last health update, if any.
    pub fn last_checked_ms(&self) -> Option<u64> {
        match self.last_checked_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    // --- Connection Tracking ---

    /// Number of exchanges currently in flight against this backend.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Start tracking an exchange. The count drops when the guard does.
    pub fn connection_guard(self: &Arc<Self>) -> BackendConnectionGuard {
        let active = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_active_connections(&self.id, active);
        BackendConnectionGuard {
            backend: self.clone(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(1)
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct BackendConnectionGuard {
    backend: Arc<Backend>,
}

impl Deref for BackendConnectionGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendConnectionGuard {
    fn drop(&mut self) {
        let active = self.backend.active_connections.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::record_active_connections(&self.backend.id, active);
    }
}
