//! Backing cluster connection subsystem.
//!
//! # Data Flow
//! ```text
//! credential source ("" or path)
//!     → kubeconfig.rs (explicit file or ambient discovery)
//!     → resolve_client_config (force unthrottled)
//!     → ClientConfig
//!     → client.rs (authenticated reqwest client)
//! ```

pub mod client;
pub mod kubeconfig;
pub mod types;

pub use client::{ClusterClient, ClusterError};
pub use kubeconfig::KubeconfigResolver;
pub use types::{ClientConfig, ConfigResolutionError, Credentials, RateLimit, TlsMaterial};

/// Turns a credential-source reference into connection parameters.
///
/// An empty `source` asks for ambient discovery; anything else names an
/// explicit location.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, source: &str) -> Result<ClientConfig, ConfigResolutionError>;
}

/// Resolve the client config used by the server.
///
/// Throttling is always disabled here whatever the resolver returned:
/// requests from the server to the cluster arrive in bursts and must not be
/// limited client-side.
pub fn resolve_client_config(
    resolver: &dyn CredentialResolver,
    source: &str,
) -> Result<ClientConfig, ConfigResolutionError> {
    let mut config = resolver.resolve(source)?;
    config.rate_limit = RateLimit::Unthrottled;

    tracing::info!(
        host = %config.host,
        source = if source.is_empty() { "ambient" } else { source },
        "Cluster client config resolved"
    );
    Ok(config)
}
