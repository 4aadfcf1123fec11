//! HTTP client for the backing cluster API server.
//!
//! # Responsibilities
//! - Build a `reqwest` client from a resolved [`ClientConfig`]
//! - Attach credentials to every request
//! - Apply the config's throttling policy before sending

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::cluster::types::{ClientConfig, Credentials, RateLimit};
use crate::observability::metrics;

/// Errors talking to the cluster API server.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("failed to build cluster client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("request to {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} returned HTTP {status}")]
    Status { path: String, status: u16 },
}

/// Version information reported by `GET /version`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerVersion {
    #[serde(default)]
    pub major: String,
    #[serde(default)]
    pub minor: String,
    #[serde(default)]
    pub git_version: String,
}

/// Token bucket gating outbound requests.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    /// Take a token, or report how long until one is available.
    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> Option<Duration> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - self.tokens) / refill_rate))
        }
    }
}

struct Throttle {
    bucket: Mutex<TokenBucket>,
    qps: f64,
    burst: f64,
}

impl Throttle {
    fn new(qps: f32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            bucket: Mutex::new(TokenBucket::new(burst)),
            qps: f64::from(qps).max(f64::MIN_POSITIVE),
            burst,
        }
    }

    async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
                bucket.try_acquire(self.burst, self.qps)
            };
            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

/// Authenticated client for one cluster.
#[derive(Clone)]
pub struct ClusterClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    throttle: Option<Arc<Throttle>>,
}

impl ClusterClient {
    /// Build a client from resolved connection parameters.
    pub fn new(config: &ClientConfig) -> Result<Self, ClusterError> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(Duration::from_secs(10));

        if let Some(ca) = &config.tls.ca_pem {
            let cert = reqwest::Certificate::from_pem(ca).map_err(ClusterError::Build)?;
            builder = builder.add_root_certificate(cert);
        }
        if config.tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Credentials::ClientCertificate { cert_pem, key_pem } = &config.credentials {
            let mut pem = cert_pem.clone();
            pem.push(b'\n');
            pem.extend_from_slice(key_pem);
            let identity = reqwest::Identity::from_pem(&pem).map_err(ClusterError::Build)?;
            builder = builder.identity(identity);
        }

        let throttle = match config.rate_limit {
            RateLimit::Unthrottled => None,
            RateLimit::TokenBucket { qps, burst } => Some(Arc::new(Throttle::new(qps, burst))),
        };

        Ok(Self {
            http: builder.build().map_err(ClusterError::Build)?,
            config: Arc::new(config.clone()),
            throttle,
        })
    }

    /// Absolute URL for an API path, keeping any path prefix on the host.
    pub fn url(&self, path_and_query: &str) -> String {
        if path_and_query.is_empty() {
            return self.config.host.to_string();
        }
        format!(
            "{}/{}",
            self.config.host.as_str().trim_end_matches('/'),
            path_and_query.trim_start_matches('/')
        )
    }

    /// Start a request with the client's credentials attached.
    pub fn request(&self, method: Method, path_and_query: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path_and_query));
        match &self.config.credentials {
            Credentials::BearerToken(token) => builder.bearer_auth(token),
            Credentials::Basic { username, password } => builder.basic_auth(username, Some(password)),
            Credentials::None | Credentials::ClientCertificate { .. } => builder,
        }
    }

    /// Send a request, waiting on the throttle first when one is configured.
    pub async fn send(&self, path: &str, request: RequestBuilder) -> Result<Response, ClusterError> {
        if let Some(throttle) = &self.throttle {
            throttle.acquire().await;
        }

        match request.send().await {
            Ok(response) => {
                metrics::record_cluster_request(response.status().as_u16());
                Ok(response)
            }
            Err(source) => {
                metrics::record_cluster_request(0);
                Err(ClusterError::Request {
                    path: path.to_string(),
                    source,
                })
            }
        }
    }

    /// GET a path and decode a JSON body, failing on non-2xx status.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClusterError> {
        let response = self.send(path, self.request(Method::GET, path)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClusterError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        response.json().await.map_err(|source| ClusterError::Request {
            path: path.to_string(),
            source,
        })
    }

    /// Probe the API server.
    pub async fn version(&self) -> Result<ServerVersion, ClusterError> {
        self.get_json("/version").await
    }
}
