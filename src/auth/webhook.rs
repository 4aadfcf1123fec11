//! External token-review webhook authentication.
//!
//! # Responsibilities
//! - Decide whether a webhook strategy is configured
//! - Build a client for the webhook endpoint (URL or kubeconfig)
//! - Send `TokenReview` requests and map the answer to an [`Identity`]
//! - Cache decisions per token for the configured TTL

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::request::Parts;
use dashmap::DashMap;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::auth::{bearer_token, AuthError, Authenticator, Identity};
use crate::cluster::kubeconfig::Kubeconfig;
use crate::cluster::{ClientConfig, ClusterClient, ClusterError, ConfigResolutionError, RateLimit};
use crate::config::WebhookConfig;

const TOKEN_REVIEW_API_VERSION: &str = "authentication.k8s.io/v1";

/// Upper bound on cached review decisions; new decisions are not cached past it.
const MAX_CACHE_ENTRIES: usize = 10_000;

/// Webhook authentication is enabled but cannot be built.
#[derive(Debug, Error)]
pub enum VerificationConfigError {
    #[error("webhook authentication enabled but neither --webhook-kubeconfig nor --webhook-url is set")]
    MissingEndpoint,

    #[error("invalid webhook URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to load webhook kubeconfig: {0}")]
    Kubeconfig(#[source] ConfigResolutionError),

    #[error("failed to build webhook client: {0}")]
    Client(#[source] ClusterError),
}

impl WebhookConfig {
    /// Build the webhook authenticator.
    ///
    /// `Ok(None)` means webhook authentication is not configured, which is
    /// not an error.
    pub fn authenticator(&self) -> Result<Option<Arc<dyn Authenticator>>, VerificationConfigError> {
        if !self.webhook_authentication {
            return Ok(None);
        }

        let endpoint = if !self.webhook_kubeconfig.is_empty() {
            let path = Path::new(&self.webhook_kubeconfig);
            let kubeconfig = Kubeconfig::read(path).map_err(VerificationConfigError::Kubeconfig)?;
            let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
            kubeconfig
                .to_client_config(base_dir)
                .map_err(VerificationConfigError::Kubeconfig)?
        } else if !self.webhook_url.is_empty() {
            ClientConfig::new(parse_webhook_url(&self.webhook_url)?)
        } else {
            return Err(VerificationConfigError::MissingEndpoint);
        };

        let authenticator = WebhookAuthenticator::new(endpoint, Duration::from_secs(self.webhook_cache_ttl))?;
        Ok(Some(Arc::new(authenticator)))
    }
}

fn parse_webhook_url(raw: &str) -> Result<Url, VerificationConfigError> {
    let url = Url::parse(raw).map_err(|e| VerificationConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(VerificationConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {:?}", url.scheme()),
        });
    }
    Ok(url)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenReviewRequest<'a> {
    api_version: &'static str,
    kind: &'static str,
    spec: TokenReviewSpec<'a>,
}

#[derive(Debug, Serialize)]
struct TokenReviewSpec<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenReviewResponse {
    #[serde(default)]
    status: TokenReviewStatus,
}

#[derive(Debug, Default, Deserialize)]
struct TokenReviewStatus {
    #[serde(default)]
    authenticated: bool,
    #[serde(default)]
    user: Option<ReviewUser>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewUser {
    #[serde(default)]
    username: String,
    #[serde(default)]
    uid: String,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    extra: BTreeMap<String, Vec<String>>,
}

struct CachedReview {
    identity: Option<Identity>,
    expires_at: Instant,
}

/// Authenticates bearer tokens through a remote token-review endpoint.
pub struct WebhookAuthenticator {
    client: ClusterClient,
    cache_ttl: Duration,
    cache: DashMap<String, CachedReview>,
    /// Earliest time the next expired-entry sweep may run.
    next_sweep: Mutex<Instant>,
}

impl WebhookAuthenticator {
    pub fn new(mut endpoint: ClientConfig, cache_ttl: Duration) -> Result<Self, VerificationConfigError> {
        endpoint.rate_limit = RateLimit::Unthrottled;
        let client = ClusterClient::new(&endpoint).map_err(VerificationConfigError::Client)?;
        tracing::info!(
            endpoint = %endpoint.host,
            cache_ttl_secs = cache_ttl.as_secs(),
            "Webhook authenticator configured"
        );
        Ok(Self {
            client,
            cache_ttl,
            cache: DashMap::new(),
            next_sweep: Mutex::new(Instant::now() + cache_ttl),
        })
    }

    fn cached(&self, token: &str) -> Option<Option<Identity>> {
        if self.cache_ttl.is_zero() {
            return None;
        }
        let entry = self.cache.get(token)?;
        if entry.expires_at > Instant::now() {
            return Some(entry.identity.clone());
        }
        drop(entry);
        self.cache.remove(token);
        None
    }

    fn remember(&self, token: &str, identity: Option<Identity>) {
        if self.cache_ttl.is_zero() {
            return;
        }
        self.sweep_expired();
        if self.cache.len() >= MAX_CACHE_ENTRIES {
            tracing::debug!(entries = self.cache.len(), "Webhook review cache full, not caching");
            return;
        }
        self.cache.insert(
            token.to_string(),
            CachedReview {
                identity,
                expires_at: Instant::now() + self.cache_ttl,
            },
        );
    }

    /// Drop expired decisions, at most once per TTL period.
    fn sweep_expired(&self) {
        let now = Instant::now();
        {
            let mut next = self.next_sweep.lock().unwrap_or_else(|e| e.into_inner());
            if now < *next {
                return;
            }
            *next = now + self.cache_ttl;
        }
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.cache.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.cache.len(), "Expired webhook reviews evicted");
        }
    }

    async fn review(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        let body = TokenReviewRequest {
            api_version: TOKEN_REVIEW_API_VERSION,
            kind: "TokenReview",
            spec: TokenReviewSpec { token },
        };
        let request = self.client.request(Method::POST, "").json(&body);
        let response = self
            .client
            .send("tokenreview", request)
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Unavailable(format!(
                "webhook returned HTTP {}",
                response.status()
            )));
        }

        let review: TokenReviewResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = review.status;
        if let Some(error) = status.error.as_deref().filter(|e| !e.is_empty()) {
            tracing::debug!(error = %error, "Webhook reported review error");
        }
        Ok(match (status.authenticated, status.user) {
            (true, Some(user)) => Some(Identity {
                name: user.username,
                uid: user.uid,
                groups: user.groups,
                extra: user.extra,
            }),
            _ => None,
        })
    }
}

#[async_trait]
impl Authenticator for WebhookAuthenticator {
    async fn authenticate(&self, request: &Parts) -> Result<Identity, AuthError> {
        let token = bearer_token(request).ok_or(AuthError::MissingCredentials)?;

        let decision = match self.cached(token) {
            Some(decision) => decision,
            None => {
                let decision = self.review(token).await?;
                self.remember(token, decision.clone());
                decision
            }
        };

        decision.ok_or(AuthError::InvalidToken)
    }
}
