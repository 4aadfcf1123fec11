//! Server descriptor resolution.
//!
//! # Data Flow
//! ```text
//! SharedConfig snapshot
//!     → cluster::resolve_client_config   (ClientConfig, unthrottled)
//!     → auth::select                     (AuthMiddleware + fallback)
//!     → lifecycle::startup::assemble     (start hooks)
//!     → descriptor.rs                    (ServerDescriptor)
//! ```
//!
//! # Design Decisions
//! - One pass, strictly forward; any error aborts with no partial descriptor
//! - The pass only returns errors; aborting the process is the caller's call

pub mod descriptor;
pub mod resolve;

pub use descriptor::{DashboardUrl, ServerDescriptor};
pub use resolve::Resolver;
