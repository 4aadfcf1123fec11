//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (request id, tracing, auth middleware)
//!     → start-hook wrappers (e.g. local auth endpoints)
//!     → base chain: /healthz, /dashboard, proxy.rs (/api, /apis, /version)
//!     → backing cluster
//! ```

pub mod proxy;
pub mod server;

pub use server::{Listeners, Server, ServerError};
