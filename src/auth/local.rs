//! Local token authentication server.
//!
//! The fallback used when authentication is wanted but no webhook is
//! configured. Tokens are stored in the backing cluster as
//! `management.cattle.io/v3` resources and mirrored into memory.
//!
//! # Lifecycle
//! ```text
//! LocalAuthFactory::create   probe GET /version (fails fast when unreachable)
//! wrap(next)                 /v3/whoami, /v3/tokens/logout, else → next
//! start(cancel)              initial token sync, then background refresh
//!                            until the lifetime or start token is cancelled
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{header, request::Parts, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use rand::Rng;
use reqwest::Method;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;

use crate::auth::subsystem::{AuthSubsystem, AuthSubsystemFactory, AuthSubsystemInitError};
use crate::auth::{bearer_token, session_token, AuthError, Authenticator, Identity, SESSION_COOKIE};
use crate::cluster::{ClientConfig, ClusterClient, ClusterError};
use crate::observability::metrics;

/// Collection path of token resources on the cluster.
pub const TOKENS_PATH: &str = "/apis/management.cattle.io/v3/tokens";

/// Group every authenticated caller belongs to.
pub const AUTHENTICATED_GROUP: &str = "system:authenticated";

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// How long a revoked token name is refused by syncs that may predate its deletion.
const REVOCATION_HOLD: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct TokenList {
    #[serde(default)]
    items: Vec<TokenResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResource {
    metadata: ObjectMeta,
    #[serde(default)]
    token: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    expired: bool,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    group_principals: Vec<Principal>,
}

#[derive(Debug, Deserialize)]
struct Principal {
    metadata: ObjectMeta,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
}

#[derive(Debug, Clone)]
struct StoredToken {
    secret: String,
    identity: Identity,
}

/// In-memory mirror of the cluster's token resources, keyed by token name.
#[derive(Clone, Default)]
pub struct TokenStore {
    inner: Arc<DashMap<String, StoredToken>>,
    /// Names revoked locally, with the time of revocation.
    revoked: Arc<DashMap<String, Instant>>,
}

impl TokenStore {
    /// Replace the whole store with usable tokens from `list`.
    ///
    /// Recently revoked names stay out even if `list` was fetched before
    /// the cluster processed their deletion.
    fn replace(&self, list: TokenList) -> usize {
        self.revoked.retain(|_, at| at.elapsed() < REVOCATION_HOLD);

        let live: Vec<(String, StoredToken)> = list
            .items
            .into_iter()
            .filter(|t| !t.expired && t.enabled.unwrap_or(true) && !t.token.is_empty())
            .filter(|t| !self.revoked.contains_key(&t.metadata.name))
            .map(|t| {
                let mut groups: Vec<String> = t.group_principals.into_iter().map(|p| p.metadata.name).collect();
                groups.push(AUTHENTICATED_GROUP.to_string());
                let identity = Identity {
                    name: t.user_id.clone(),
                    uid: t.user_id,
                    groups,
                    ..Default::default()
                };
                (t.metadata.name, StoredToken { secret: t.token, identity })
            })
            .collect();

        let names: HashSet<&str> = live.iter().map(|(name, _)| name.as_str()).collect();
        self.inner.retain(|name, _| names.contains(name.as_str()));
        for (name, token) in live {
            self.inner.insert(name, token);
        }
        metrics::record_token_count(self.inner.len());
        self.inner.len()
    }

    /// Look up a `name:secret` token value.
    pub fn lookup(&self, value: &str) -> Option<Identity> {
        let (name, secret) = value.split_once(':')?;
        let entry = self.inner.get(name)?;
        let matches: bool = entry.secret.as_bytes().ct_eq(secret.as_bytes()).into();
        matches.then(|| entry.identity.clone())
    }

    pub fn revoke(&self, name: &str) -> bool {
        self.revoked.insert(name.to_string(), Instant::now());
        let removed = self.inner.remove(name).is_some();
        metrics::record_token_count(self.inner.len());
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

fn request_token(parts: &Parts) -> Option<&str> {
    bearer_token(parts).or_else(|| session_token(parts))
}

/// Authenticates `name:secret` tokens against the [`TokenStore`].
pub struct TokenAuthenticator {
    tokens: TokenStore,
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, request: &Parts) -> Result<Identity, AuthError> {
        let token = request_token(request).ok_or(AuthError::MissingCredentials)?;
        self.tokens.lookup(token).ok_or(AuthError::InvalidToken)
    }
}

struct Inner {
    client: ClusterClient,
    tokens: TokenStore,
    lifetime: CancellationToken,
    refresh_interval: Duration,
    started: AtomicBool,
}

/// The local auth server.
#[derive(Clone)]
pub struct LocalAuthServer {
    inner: Arc<Inner>,
}

impl LocalAuthServer {
    pub fn new(client: ClusterClient, lifetime: CancellationToken, refresh_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                tokens: TokenStore::default(),
                lifetime,
                refresh_interval,
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Pull the token list from the cluster into the store.
    pub async fn sync(&self) -> Result<usize, ClusterError> {
        let list: TokenList = self.inner.client.get_json(TOKENS_PATH).await?;
        Ok(self.inner.tokens.replace(list))
    }

    async fn refresh_loop(self, cancel: CancellationToken) {
        let mut failures = 0u32;
        loop {
            let delay = if failures == 0 {
                self.inner.refresh_interval
            } else {
                backoff(failures, self.inner.refresh_interval)
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break,
                _ = self.inner.lifetime.cancelled() => break,
            }

            match self.sync().await {
                Ok(count) => {
                    if failures > 0 {
                        tracing::info!(tokens = count, "Token sync recovered");
                    }
                    failures = 0;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::warn!(error = %e, attempt = failures, "Token sync failed");
                }
            }
        }
        tracing::info!("Local auth server stopped");
    }
}

/// Exponential backoff with up to 10% jitter, capped at [`MAX_BACKOFF`].
fn backoff(failures: u32, base: Duration) -> Duration {
    let factor = 2u32.saturating_pow(failures.saturating_sub(1).min(16));
    let capped = base.saturating_mul(factor).min(MAX_BACKOFF);
    let jitter_range = capped.as_millis() as u64 / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };
    capped + Duration::from_millis(jitter)
}

#[async_trait]
impl AuthSubsystem for LocalAuthServer {
    fn authenticator(&self) -> Arc<dyn Authenticator> {
        Arc::new(TokenAuthenticator {
            tokens: self.inner.tokens.clone(),
        })
    }

    fn wrap(&self, next: Router) -> Router {
        Router::new()
            .route("/v3/whoami", get(whoami))
            .route("/v3/tokens/logout", post(logout))
            .with_state(self.clone())
            .fallback_service(next)
    }

    async fn start(&self, cancel: CancellationToken) -> Result<(), AuthSubsystemInitError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Local auth server already started");
            return Ok(());
        }

        let count = match self.sync().await {
            Ok(count) => count,
            Err(e) => {
                self.inner.started.store(false, Ordering::SeqCst);
                return Err(AuthSubsystemInitError::Sync(e));
            }
        };
        tracing::info!(
            tokens = count,
            refresh_secs = self.inner.refresh_interval.as_secs(),
            "Local auth server started"
        );

        tokio::spawn(self.clone().refresh_loop(cancel));
        Ok(())
    }
}

async fn whoami(request: Request<Body>) -> Response {
    match request.extensions().get::<Identity>() {
        Some(identity) => Json(identity.clone()).into_response(),
        None => AuthError::MissingCredentials.into_response(),
    }
}

async fn logout(State(server): State<LocalAuthServer>, request: Request<Body>) -> Response {
    let (parts, _) = request.into_parts();
    let Some(name) = request_token(&parts).and_then(|t| t.split_once(':')).map(|(name, _)| name.to_string())
    else {
        return AuthError::MissingCredentials.into_response();
    };

    let path = format!("{}/{}", TOKENS_PATH, name);
    let delete = server.inner.client.request(Method::DELETE, &path);
    match server.inner.client.send(&path, delete).await {
        Ok(response) if response.status().is_success() || response.status() == StatusCode::NOT_FOUND => {}
        Ok(response) => {
            tracing::warn!(token = %name, status = %response.status(), "Cluster refused token deletion");
            return (StatusCode::BAD_GATEWAY, "failed to revoke token").into_response();
        }
        Err(e) => {
            tracing::warn!(token = %name, error = %e, "Token deletion failed");
            return (StatusCode::BAD_GATEWAY, "failed to revoke token").into_response();
        }
    }

    server.inner.tokens.revoke(&name);
    tracing::info!(token = %name, "Token revoked");
    (
        StatusCode::OK,
        [(header::SET_COOKIE, format!("{}=; Path=/; Max-Age=0; HttpOnly", SESSION_COOKIE))],
    )
        .into_response()
}

/// Creates [`LocalAuthServer`]s after checking the cluster is reachable.
#[derive(Debug, Clone)]
pub struct LocalAuthFactory {
    pub refresh_interval: Duration,
}

impl Default for LocalAuthFactory {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

#[async_trait]
impl AuthSubsystemFactory for LocalAuthFactory {
    async fn create(
        &self,
        lifetime: CancellationToken,
        client_config: &ClientConfig,
    ) -> Result<Arc<dyn AuthSubsystem>, AuthSubsystemInitError> {
        let client = ClusterClient::new(client_config).map_err(AuthSubsystemInitError::Client)?;
        let version = client.version().await.map_err(AuthSubsystemInitError::Unreachable)?;
        tracing::info!(
            host = %client_config.host,
            version = %version.git_version,
            "Local auth server bound to cluster"
        );
        Ok(Arc::new(LocalAuthServer::new(client, lifetime, self.refresh_interval)))
    }
}
