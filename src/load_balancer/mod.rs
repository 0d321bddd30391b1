//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! config.backends
//!     → registry.rs (ordered, immutable set + health flags)
//!     → round_robin.rs (rotate through healthy backends)
//!     → backend.rs (connection guard held for the exchange)
//! ```
//!
//! # Design Decisions
//! - Registry and selector are explicit values, passed in; tests build isolated instances
//! - Unhealthy backends are skipped, not removed
//! - Shared state is atomic; no locks on the request path

pub mod backend;
pub mod registry;
pub mod round_robin;

pub use backend::{Backend, BackendConnectionGuard};
pub use registry::BackendRegistry;
pub use round_robin::{NoBackendAvailable, RoundRobin};
