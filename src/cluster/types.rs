//! Cluster connection types and error definitions.

use std::path::PathBuf;

use thiserror::Error;
use url::Url;

/// Default request rate applied by credential resolution before policy overrides it.
pub const DEFAULT_QPS: f32 = 5.0;

/// Default burst size applied by credential resolution before policy overrides it.
pub const DEFAULT_BURST: u32 = 10;

/// Client-side throttling policy for requests to the cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLimit {
    /// Requests are sent as fast as the caller issues them.
    Unthrottled,
    /// Token bucket refilled at `qps`, holding at most `burst` tokens.
    TokenBucket { qps: f32, burst: u32 },
}

impl Default for RateLimit {
    fn default() -> Self {
        RateLimit::TokenBucket {
            qps: DEFAULT_QPS,
            burst: DEFAULT_BURST,
        }
    }
}

/// Credentials presented to the cluster API server.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    #[default]
    None,
    BearerToken(String),
    Basic {
        username: String,
        password: String,
    },
    /// PEM encoded client certificate chain and private key.
    ClientCertificate { cert_pem: Vec<u8>, key_pem: Vec<u8> },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::None => write!(f, "None"),
            Credentials::BearerToken(_) => write!(f, "BearerToken(<redacted>)"),
            Credentials::Basic { username, .. } => {
                write!(f, "Basic {{ username: {:?}, password: <redacted> }}", username)
            }
            Credentials::ClientCertificate { .. } => write!(f, "ClientCertificate(<redacted>)"),
        }
    }
}

/// TLS material used to verify the API server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsMaterial {
    /// PEM encoded CA bundle; system roots are used when absent.
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_skip_verify: bool,
}

/// Fully resolved connection parameters for the backing cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub host: Url,
    pub credentials: Credentials,
    pub tls: TlsMaterial,
    pub rate_limit: RateLimit,
}

impl ClientConfig {
    /// Create a config for `host` with no credentials and default throttling.
    pub fn new(host: Url) -> Self {
        Self {
            host,
            credentials: Credentials::None,
            tls: TlsMaterial::default(),
            rate_limit: RateLimit::default(),
        }
    }
}

/// Errors raised while turning a credential source into a [`ClientConfig`].
#[derive(Debug, Error)]
pub enum ConfigResolutionError {
    /// A referenced file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The kubeconfig document is not valid YAML for the expected schema.
    #[error("failed to parse kubeconfig {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("context {0:?} not found in kubeconfig")]
    MissingContext(String),

    #[error("cluster {0:?} not found in kubeconfig")]
    MissingCluster(String),

    #[error("user {0:?} not found in kubeconfig")]
    MissingUser(String),

    #[error("invalid API server address {server:?}: {reason}")]
    InvalidServer { server: String, reason: String },

    #[error("invalid base64 in {field}")]
    InvalidEncoding { field: &'static str },

    /// Ambient discovery exhausted every location.
    #[error("no cluster credentials found: set --kubeconfig, KUBECONFIG, ~/.kube/config or run in-cluster")]
    NoAmbientCredentials,
}
