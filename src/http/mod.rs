//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, in-flight cap)
//!     → dispatch.rs (select, pre-flight, bounded retry)
//!     → transport.rs (URI rewrite, forward to backend)
//!     → Send response to client
//! ```

pub mod dispatch;
pub mod server;
pub mod transport;

pub use dispatch::{DispatchError, Dispatcher};
pub use server::HttpServer;
pub use transport::{HyperTransport, Transport, TransportError};
