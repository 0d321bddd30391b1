//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     One timer per backend
//!     → Probe GET {url}{path}
//!     → mark_healthy / mark_unhealthy in the registry
//!
//! Passive health checks (passive.rs):
//!     Forwarding failure observed (unreachable, timeout)
//!     → mark_unhealthy in the registry
//! ```
//!
//! # Design Decisions
//! - The prober is the authority; passive marking only takes backends out early
//! - Probe failures are logged, never surfaced to clients
//! - Health state is per-backend and local to this process

pub mod active;
pub mod passive;

pub use active::HealthProber;
pub use passive::PassiveHealth;
