//! Kubeconfig loading and ambient credential discovery.
//!
//! # Responsibilities
//! - Parse kubeconfig documents (clusters, contexts, users)
//! - Resolve the current context into a [`ClientConfig`]
//! - Discover credentials when no explicit source is given
//!
//! # Discovery Order
//! ```text
//! explicit path (non-empty source) → that file only
//! empty source:
//!     → each entry of KUBECONFIG (first existing file)
//!     → $HOME/.kube/config
//!     → in-cluster service account
//! ```

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use url::Url;

use crate::cluster::types::{ClientConfig, ConfigResolutionError, Credentials, TlsMaterial};
use crate::cluster::CredentialResolver;

/// Directory holding the service-account token and CA inside a pod.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Kubeconfig {
    #[serde(rename = "current-context")]
    pub current_context: String,
    pub clusters: Vec<NamedCluster>,
    pub contexts: Vec<NamedContext>,
    pub users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClusterEntry {
    pub server: String,
    pub certificate_authority: Option<PathBuf>,
    pub certificate_authority_data: Option<String>,
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ContextEntry {
    pub cluster: String,
    pub user: String,
}

#[derive(Debug, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: UserEntry,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct UserEntry {
    pub token: Option<String>,
    #[serde(rename = "tokenFile")]
    pub token_file: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_certificate: Option<PathBuf>,
    pub client_certificate_data: Option<String>,
    pub client_key: Option<PathBuf>,
    pub client_key_data: Option<String>,
}

impl Kubeconfig {
    /// Read and parse a kubeconfig file.
    pub fn read(path: &Path) -> Result<Self, ConfigResolutionError> {
        let content = read_file(path)?;
        serde_yaml::from_slice(&content).map_err(|source| ConfigResolutionError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve the current context. Relative file references are taken
    /// relative to `base_dir`.
    pub fn to_client_config(&self, base_dir: &Path) -> Result<ClientConfig, ConfigResolutionError> {
        let context = self
            .contexts
            .iter()
            .find(|c| c.name == self.current_context)
            .ok_or_else(|| ConfigResolutionError::MissingContext(self.current_context.clone()))?;

        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.context.cluster)
            .ok_or_else(|| ConfigResolutionError::MissingCluster(context.context.cluster.clone()))?;

        // A context without a user is valid and means anonymous access.
        let user = if context.context.user.is_empty() {
            None
        } else {
            Some(
                self.users
                    .iter()
                    .find(|u| u.name == context.context.user)
                    .ok_or_else(|| ConfigResolutionError::MissingUser(context.context.user.clone()))?,
            )
        };

        let mut config = ClientConfig::new(parse_server(&cluster.cluster.server)?);
        config.tls = cluster_tls(&cluster.cluster, base_dir)?;
        if let Some(user) = user {
            config.credentials = user_credentials(&user.user, base_dir)?;
        }
        Ok(config)
    }
}

fn parse_server(server: &str) -> Result<Url, ConfigResolutionError> {
    let url = Url::parse(server).map_err(|e| ConfigResolutionError::InvalidServer {
        server: server.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigResolutionError::InvalidServer {
            server: server.to_string(),
            reason: format!("unsupported scheme {:?}", other),
        }),
    }
}

fn cluster_tls(entry: &ClusterEntry, base_dir: &Path) -> Result<TlsMaterial, ConfigResolutionError> {
    let ca_pem = match (&entry.certificate_authority_data, &entry.certificate_authority) {
        (Some(data), _) => Some(decode(data, "certificate-authority-data")?),
        (None, Some(path)) => Some(read_file(&base_dir.join(path))?),
        (None, None) => None,
    };
    Ok(TlsMaterial {
        ca_pem,
        insecure_skip_verify: entry.insecure_skip_tls_verify,
    })
}

fn user_credentials(entry: &UserEntry, base_dir: &Path) -> Result<Credentials, ConfigResolutionError> {
    if let Some(token) = entry.token.as_deref().filter(|t| !t.is_empty()) {
        return Ok(Credentials::BearerToken(token.to_string()));
    }
    if let Some(path) = &entry.token_file {
        let raw = read_file(&base_dir.join(path))?;
        return Ok(Credentials::BearerToken(String::from_utf8_lossy(&raw).trim().to_string()));
    }

    let cert = match (&entry.client_certificate_data, &entry.client_certificate) {
        (Some(data), _) => Some(decode(data, "client-certificate-data")?),
        (None, Some(path)) => Some(read_file(&base_dir.join(path))?),
        (None, None) => None,
    };
    let key = match (&entry.client_key_data, &entry.client_key) {
        (Some(data), _) => Some(decode(data, "client-key-data")?),
        (None, Some(path)) => Some(read_file(&base_dir.join(path))?),
        (None, None) => None,
    };
    if let (Some(cert_pem), Some(key_pem)) = (cert, key) {
        return Ok(Credentials::ClientCertificate { cert_pem, key_pem });
    }

    if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
        return Ok(Credentials::Basic {
            username: username.clone(),
            password: password.clone(),
        });
    }

    Ok(Credentials::None)
}

fn decode(data: &str, field: &'static str) -> Result<Vec<u8>, ConfigResolutionError> {
    STANDARD
        .decode(data.trim())
        .map_err(|_| ConfigResolutionError::InvalidEncoding { field })
}

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigResolutionError> {
    fs::read(path).map_err(|source| ConfigResolutionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Environment of a process running inside a cluster pod.
#[derive(Debug, Clone)]
pub struct InClusterEnv {
    pub service_host: String,
    pub service_port: String,
    pub service_account_dir: PathBuf,
}

impl InClusterEnv {
    fn to_client_config(&self) -> Result<ClientConfig, ConfigResolutionError> {
        let host = if self.service_host.contains(':') {
            format!("https://[{}]:{}", self.service_host, self.service_port)
        } else {
            format!("https://{}:{}", self.service_host, self.service_port)
        };
        let token = read_file(&self.service_account_dir.join("token"))?;
        let ca_pem = read_file(&self.service_account_dir.join("ca.crt"))?;

        let mut config = ClientConfig::new(parse_server(&host)?);
        config.credentials = Credentials::BearerToken(String::from_utf8_lossy(&token).trim().to_string());
        config.tls = TlsMaterial {
            ca_pem: Some(ca_pem),
            insecure_skip_verify: false,
        };
        Ok(config)
    }
}

/// Resolves credential sources from kubeconfig files and the process environment.
#[derive(Debug, Clone, Default)]
pub struct KubeconfigResolver {
    /// Raw `KUBECONFIG` value, a platform path list.
    pub kubeconfig_env: Option<OsString>,
    pub home_dir: Option<PathBuf>,
    pub in_cluster: Option<InClusterEnv>,
}

impl KubeconfigResolver {
    /// Capture discovery inputs from the current process environment.
    pub fn from_env() -> Self {
        let in_cluster = match (
            std::env::var("KUBERNETES_SERVICE_HOST"),
            std::env::var("KUBERNETES_SERVICE_PORT"),
        ) {
            (Ok(service_host), Ok(service_port)) if !service_host.is_empty() && !service_port.is_empty() => {
                Some(InClusterEnv {
                    service_host,
                    service_port,
                    service_account_dir: PathBuf::from(SERVICE_ACCOUNT_DIR),
                })
            }
            _ => None,
        };

        Self {
            kubeconfig_env: std::env::var_os("KUBECONFIG").filter(|v| !v.is_empty()),
            home_dir: dirs::home_dir(),
            in_cluster,
        }
    }

    fn load_file(path: &Path) -> Result<ClientConfig, ConfigResolutionError> {
        let kubeconfig = Kubeconfig::read(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        kubeconfig.to_client_config(base_dir)
    }

    fn discover(&self) -> Result<ClientConfig, ConfigResolutionError> {
        if let Some(list) = &self.kubeconfig_env {
            if let Some(path) = std::env::split_paths(list).find(|p| p.is_file()) {
                tracing::debug!(path = %path.display(), "Using kubeconfig from KUBECONFIG");
                return Self::load_file(&path);
            }
        }

        if let Some(home) = &self.home_dir {
            let path = home.join(".kube").join("config");
            if path.is_file() {
                tracing::debug!(path = %path.display(), "Using kubeconfig from home directory");
                return Self::load_file(&path);
            }
        }

        if let Some(env) = &self.in_cluster {
            tracing::debug!(host = %env.service_host, "Using in-cluster service account");
            return env.to_client_config();
        }

        Err(ConfigResolutionError::NoAmbientCredentials)
    }
}

impl CredentialResolver for KubeconfigResolver {
    fn resolve(&self, source: &str) -> Result<ClientConfig, ConfigResolutionError> {
        if source.is_empty() {
            self.discover()
        } else {
            Self::load_file(Path::new(source))
        }
    }
}
