//! Proxy error taxonomy and its mapping onto client-visible status codes.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::load_balancer::NoBackendAvailable;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures of a single proxied exchange. None of them are process-fatal.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Every backend is unhealthy; no network call was attempted.
    #[error(transparent)]
    NoBackendAvailable(#[from] NoBackendAvailable),

    /// Connecting to or talking with the backend failed before a response head arrived.
    #[error("backend '{backend}' unreachable: {source}")]
    BackendUnreachable {
        backend: String,
        #[source]
        source: BoxError,
    },

    /// The backend did not produce a response head in time.
    #[error("backend '{backend}' did not respond within {timeout:?}")]
    BackendTimeout { backend: String, timeout: Duration },

    /// The client's request body broke off while it was being forwarded.
    #[error("client disconnected while uploading to backend '{backend}'")]
    ClientDisconnect { backend: String },
}

/// Non-standard "client closed request"; nobody is left to read it.
fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
}

impl ProxyError {
    pub fn unreachable(backend: &str, source: impl Into<BoxError>) -> Self {
        Self::BackendUnreachable {
            backend: backend.to_string(),
            source: source.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::NoBackendAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BackendUnreachable { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::ClientDisconnect { .. } => client_closed_request(),
        }
    }

    /// The backend involved, if one was selected.
    pub fn backend(&self) -> Option<&str> {
        match self {
            ProxyError::NoBackendAvailable(_) => None,
            ProxyError::BackendUnreachable { backend, .. }
            | ProxyError::BackendTimeout { backend, .. }
            | ProxyError::ClientDisconnect { backend } => Some(backend),
        }
    }

    /// Whether this failure says something about the backend's health.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            ProxyError::BackendUnreachable { .. } | ProxyError::BackendTimeout { .. }
        )
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = format!(
            "{} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Error")
        );
        (status, body).into_response()
    }
}
