//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use streaming_proxy::config::{BackendConfig, ProxyConfig};
use streaming_proxy::lifecycle::Shutdown;
use streaming_proxy::load_balancer::BackendRegistry;
use streaming_proxy::HttpServer;

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn serve(listener: TcpListener, app: Router) {
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
}

/// Config pointing at `backends` (ids b1, b2, ...) with active checks off.
pub fn proxy_config(backends: &[SocketAddr]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.health_check.enabled = false;
    for (i, addr) in backends.iter().enumerate() {
        config
            .backends
            .push(BackendConfig::new(format!("b{}", i + 1), format!("http://{addr}")));
    }
    config
}

pub struct RunningProxy {
    pub addr: SocketAddr,
    pub registry: Arc<BackendRegistry>,
    pub shutdown: Shutdown,
}

impl RunningProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for RunningProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_proxy(config: ProxyConfig) -> RunningProxy {
    let (listener, addr) = bind().await;
    let server = HttpServer::new(config);
    let registry = server.registry().clone();
    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, receiver).await;
    });
    RunningProxy {
        addr,
        registry,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Backend answering every request with its own name as the body.
pub async fn start_named_backend(name: &'static str) -> SocketAddr {
    let (listener, addr) = bind().await;
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .fallback(move || async move { name });
    serve(listener, app);
    addr
}

/// Backend echoing the request it received as JSON.
pub async fn start_echo_backend(name: &'static str) -> SocketAddr {
    async fn echo(
        State(name): State<&'static str>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Json<serde_json::Value> {
        let headers: BTreeMap<String, String> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        Json(serde_json::json!({
            "backend": name,
            "method": method.as_str(),
            "path": uri.path_and_query().map(|p| p.as_str()).unwrap_or("/"),
            "content_length": body.len(),
            "headers": headers,
        }))
    }

    let (listener, addr) = bind().await;
    let app = Router::new().fallback(echo).with_state(name);
    serve(listener, app);
    addr
}

/// Raw TCP backend writing `response` verbatim after reading the request head.
pub async fn start_raw_backend(response: &'static str) -> SocketAddr {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Backend that accepts connections and never answers.
pub async fn start_silent_backend() -> SocketAddr {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// Listener that only counts accepted connections.
pub async fn start_counting_listener() -> (SocketAddr, Arc<AtomicUsize>) {
    let (listener, addr) = bind().await;
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while listener.accept().await.is_ok() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    (addr, accepted)
}

/// Backend streaming `total` bytes on GET /download and counting the bytes
/// of any POST /upload body, replying with the count.
pub async fn start_streaming_backend(total: usize, chunk: usize) -> SocketAddr {
    async fn upload(body: Body) -> String {
        let mut stream = body.into_data_stream();
        let mut received = 0usize;
        while let Some(Ok(data)) = stream.next().await {
            received += data.len();
        }
        received.to_string()
    }

    let (listener, addr) = bind().await;
    let app = Router::new()
        .route(
            "/download",
            get(move || async move {
                let block = Bytes::from(vec![b'z'; chunk]);
                let frames = stream::iter((0..total / chunk).map(move |_| Ok::<_, Infallible>(block.clone())));
                Body::from_stream(frames)
            }),
        )
        .route("/upload", post(upload));
    serve(listener, app);
    addr
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Backend streaming forever. The flag flips once the backend's response
/// stream has been dropped, i.e. its connection went away.
pub async fn start_endless_backend() -> (SocketAddr, Arc<AtomicBool>) {
    let (listener, addr) = bind().await;
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = dropped.clone();
    let app = Router::new().fallback(move || {
        let flag = flag.clone();
        async move {
            let guard = DropFlag(flag);
            let frames = stream::unfold(guard, |guard| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Some((Ok::<_, Infallible>(Bytes::from(vec![b'e'; 8 * 1024])), guard))
            });
            Body::from_stream(frames)
        }
    });
    serve(listener, app);
    (addr, dropped)
}

/// Backend whose `/health` status can be flipped from the test.
pub async fn start_toggle_backend(name: &'static str) -> (SocketAddr, Arc<AtomicBool>) {
    let (listener, addr) = bind().await;
    let healthy = Arc::new(AtomicBool::new(true));
    let app = Router::new()
        .route(
            "/health",
            get(|State(healthy): State<Arc<AtomicBool>>| async move {
                if healthy.load(Ordering::SeqCst) {
                    StatusCode::OK.into_response()
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }),
        )
        .fallback(move || async move { name })
        .with_state(healthy.clone());
    serve(listener, app);
    (addr, healthy)
}

/// Poll `condition` every 50 ms until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}
