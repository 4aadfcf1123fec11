//! Cluster gateway library.
//!
//! Resolves a runtime configuration into a [`ServerDescriptor`]: cluster
//! connection parameters, the authentication strategy, and the start hooks
//! that tie that strategy to the server lifecycle.

pub mod auth;
pub mod cluster;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;

pub use config::schema::Config;
pub use error::ResolveError;
pub use http::Server;
pub use server::{Resolver, ServerDescriptor};
