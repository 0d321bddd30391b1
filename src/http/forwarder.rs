//! Streaming forwarder.
//!
//! # Responsibilities
//! - Send one request to one backend: `{url}{path+query}`, method and body preserved
//! - Stream the inbound body to the backend as it arrives
//! - Hand back the response as soon as its head arrives, body still streaming
//! - Bound connect + response head wait by the backend timeout
//!
//! # Design Decisions
//! - The timeout covers the outbound leg up to the response head only, and
//!   restarts with every request-body frame forwarded and at the end of the
//!   body; a slow upload is fine as long as data keeps flowing
//! - A request body that fails mid-upload is the client leaving, not the
//!   backend failing
//! - The backend connection guard moves into the response body, so the
//!   exchange stays accounted for until the body ends or is dropped
//! - The client read buffer and relayed frames are capped, which bounds relay
//!   memory per exchange
//! - Redirects are relayed, never followed

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time;

use crate::config::{StreamingConfig, TimeoutConfig};
use crate::error::ProxyError;
use crate::http::body::{RelayBody, UploadBody};
use crate::load_balancer::Backend;

/// An inbound request, owned by one pipeline invocation.
pub struct ProxyRequest {
    pub method: Method,
    pub path_and_query: PathAndQuery,
    pub headers: HeaderMap,
    /// Consumed lazily by the outbound connection.
    pub body: Body,
}

impl ProxyRequest {
    pub fn from_request(request: Request<Body>) -> Self {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        Self {
            method: parts.method,
            path_and_query,
            headers: parts.headers,
            body,
        }
    }
}

/// A backend response whose body is still streaming.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: RelayBody<Incoming>,
}

impl ProxyResponse {
    pub fn backend(&self) -> &str {
        self.body.backend()
    }
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, UploadBody<Body>>,
    timeout: Duration,
    max_frame: usize,
}

impl Forwarder {
    pub fn new(timeouts: &TimeoutConfig, streaming: &StreamingConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(timeouts.idle_secs))
            .http1_max_buf_size(streaming.max_buf_size)
            .build(connector);

        Self {
            client,
            timeout: Duration::from_secs(timeouts.backend_secs),
            max_frame: streaming.max_buf_size,
        }
    }

    /// Override the backend timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Forward `request` to `backend` and return the streaming response.
    pub async fn forward(
        &self,
        request: ProxyRequest,
        backend: Arc<Backend>,
    ) -> Result<ProxyResponse, ProxyError> {
        let guard = backend.connection_guard();

        let uri = backend
            .target_uri(&request.path_and_query)
            .map_err(|e| ProxyError::unreachable(&backend.id, e))?;

        let mut builder = Request::builder().method(request.method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = request.headers;
        }
        let (body, upload) = UploadBody::new(request.body);
        let outbound = builder
            .body(body)
            .map_err(|e| ProxyError::unreachable(&backend.id, e))?;

        let response = self.client.request(outbound);
        tokio::pin!(response);

        let result = loop {
            tokio::select! {
                result = &mut response => break result,
                _ = upload.advanced() => continue,
                _ = time::sleep(self.timeout) => {
                    return Err(ProxyError::BackendTimeout {
                        backend: backend.id.clone(),
                        timeout: self.timeout,
                    });
                }
            }
        };

        match result {
            Ok(response) => {
                let (parts, body) = response.into_parts();
                Ok(ProxyResponse {
                    status: parts.status,
                    headers: parts.headers,
                    body: RelayBody::new(body, guard, self.max_frame),
                })
            }
            Err(_) if upload.client_aborted() => Err(ProxyError::ClientDisconnect {
                backend: backend.id.clone(),
            }),
            Err(e) => Err(ProxyError::unreachable(&backend.id, e)),
        }
    }
}
