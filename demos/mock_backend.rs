//! Local backend for trying the proxy by hand.
//!
//! `cargo run --example mock_backend -- 3001` serves `/health` and echoes any
//! other request back as JSON.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{HeaderMap, Method, Uri},
    routing::get,
    Json, Router,
};

async fn echo(
    State(port): State<u16>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    println!("backend-{port} received: {method} {}", uri.path());
    let content_length = headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("0")
        .to_string();
    let headers: BTreeMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();

    Json(serde_json::json!({
        "backend": format!("backend-{port}"),
        "port": port,
        "method": method.as_str(),
        "path": uri.path(),
        "content_length": content_length,
        "headers": headers,
    }))
}

#[tokio::main]
async fn main() {
    let port = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(3001u16);

    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .fallback(echo)
        .with_state(port);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("Mock backend listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
