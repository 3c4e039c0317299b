//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic liveness monitor (monitor.rs):
//!     Timer tick
//!     → probe.rs (TCP connect with timeout) for each backend
//!     → BackendPool::set_dead
//!
//! Pre-flight check (http::dispatch):
//!     Backend selected for a request
//!     → probe.rs with a short timeout
//!     → BackendPool::set_dead, retry elsewhere on failure
//! ```
//!
//! # Design Decisions
//! - Reachability is a TCP connect, not an HTTP request
//! - A timed-out probe means "unreachable"; probe errors never reach clients
//! - The pre-flight result decides the current dispatch; the monitor only records state

pub mod monitor;
pub mod probe;

pub use monitor::LivenessMonitor;
pub use probe::{ProbeError, Prober, TcpProber};
