//! Header transforms for both directions of a proxied exchange.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers (static set plus anything named by `Connection`)
//! - Add `X-Forwarded-For`, `X-Forwarded-Proto`, `X-Forwarded-Host`, `X-Real-IP`
//!
//! Both transforms are pure: same input map, same output map.
//!
//! # Design Decisions
//! - `X-Forwarded-For` is appended to, never replaced, so chained proxies keep the full path
//! - An existing `X-Forwarded-Proto` / `X-Forwarded-Host` came from the first hop and wins
//! - The inbound `Host` is dropped; the outbound client derives it from the backend URL

use std::net::IpAddr;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Headers scoped to a single transport connection.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// What the backend needs to reconstruct the client's view of the request.
#[derive(Debug, Clone)]
pub struct ForwardContext {
    /// Address of the immediate peer.
    pub client_ip: IpAddr,
    /// Scheme the client used to reach this proxy.
    pub scheme: HeaderValue,
}

impl ForwardContext {
    pub fn new(client_ip: IpAddr, scheme: &str) -> Self {
        Self {
            client_ip,
            scheme: HeaderValue::from_str(scheme).unwrap_or(HeaderValue::from_static("http")),
        }
    }
}

/// Remove hop-by-hop headers, including those listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Derive the backend-bound header set from the client's.
pub fn request_headers(inbound: &HeaderMap, ctx: &ForwardContext) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);

    let original_host = headers.remove(header::HOST);

    let client_ip = ctx.client_ip.to_string();
    let chain = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .chain(std::iter::once(client_ip.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR.clone(), value);
    }

    if !headers.contains_key(&X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO.clone(), ctx.scheme.clone());
    }
    if !headers.contains_key(&X_FORWARDED_HOST) {
        if let Some(host) = original_host {
            headers.insert(X_FORWARDED_HOST.clone(), host);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&client_ip) {
        headers.insert(X_REAL_IP.clone(), value);
    }

    headers
}

/// Derive the client-bound header set from the backend's.
pub fn response_headers(outbound: &HeaderMap) -> HeaderMap {
    let mut headers = outbound.clone();
    strip_hop_by_hop(&mut headers);
    headers
}
