//! Streaming HTTP reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ http::server ──▶ http::pipeline ──▶ load_balancer (round robin)
//!                                      │
//!                                      ▼
//!     Client ◀── http::body ◀──── http::forwarder ◀──────────────── Backend
//!
//!     health::active probes every backend on a timer;
//!     health::passive takes a backend out after a forwarding failure.
//! ```
//!
//! Request and response bodies are streamed frame by frame in both
//! directions; memory per exchange is bounded by the relay buffer size,
//! not by the body size.

pub mod config;
pub mod error;
pub mod http;

pub mod health;
pub mod load_balancer;

pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
