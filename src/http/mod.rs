//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → pipeline.rs (select backend, transform headers)
//!     → forwarder.rs (stream request out, response head back)
//!     → body.rs (relay response frames, release backend on end or drop)
//!     → Send to client
//! ```

pub mod body;
pub mod forwarder;
pub mod headers;
pub mod pipeline;
pub mod request;
pub mod server;

pub use body::{RelayBody, RelayOutcome};
pub use forwarder::{Forwarder, ProxyRequest, ProxyResponse};
pub use pipeline::Pipeline;
pub use request::X_REQUEST_ID;
pub use server::HttpServer;
