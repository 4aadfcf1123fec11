//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! Config.authentication + WebhookConfig + ClientConfig
//!     → selector.rs (priority order, first match wins)
//!         1. disabled          → AuthMiddleware::Disabled
//!         2. webhook.rs        → AuthMiddleware::External
//!         3. local.rs fallback → AuthMiddleware::Internal + subsystem
//!
//! Inbound request:
//!     → auth_middleware (Authenticator::authenticate)
//!     → Identity attached to request extensions
//!     → next handler
//! ```
//!
//! # Design Decisions
//! - "No authentication" is a variant of [`AuthMiddleware`], not an `Option`
//! - Disabled authentication attaches no identity; handlers see anonymous requests

pub mod local;
pub mod selector;
pub mod subsystem;
pub mod webhook;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{header, request::Parts, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::metrics;

pub use selector::{select, Selection};
pub use subsystem::{AuthSubsystem, AuthSubsystemFactory, AuthSubsystemInitError};
pub use webhook::VerificationConfigError;

/// Session cookie carrying a token for browser clients.
pub const SESSION_COOKIE: &str = "R_SESS";

/// Authenticated caller attached to request extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Vec<String>>,
}

/// Reasons a request is rejected.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credentials presented")]
    MissingCredentials,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("authentication backend unavailable: {0}")]
    Unavailable(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::MissingCredentials | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.to_string()).into_response()
    }
}

/// Produces an identity for an inbound request or rejects it.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &Parts) -> Result<Identity, AuthError>;
}

/// The authentication strategy installed in front of the server.
#[derive(Clone)]
pub enum AuthMiddleware {
    /// Authentication is off; requests pass through anonymously.
    Disabled,
    /// Delegates to an external token-review webhook.
    External(Arc<dyn Authenticator>),
    /// Delegates to the locally constructed auth server.
    Internal(Arc<dyn Authenticator>),
}

impl AuthMiddleware {
    /// Label used in logs and metrics.
    pub fn strategy(&self) -> &'static str {
        match self {
            AuthMiddleware::Disabled => "disabled",
            AuthMiddleware::External(_) => "webhook",
            AuthMiddleware::Internal(_) => "local",
        }
    }

    pub fn authenticator(&self) -> Option<&Arc<dyn Authenticator>> {
        match self {
            AuthMiddleware::Disabled => None,
            AuthMiddleware::External(a) | AuthMiddleware::Internal(a) => Some(a),
        }
    }

    /// Put authentication in front of `router`. A disabled strategy leaves it untouched.
    pub fn layer(self, router: Router) -> Router {
        match self {
            AuthMiddleware::Disabled => router,
            strategy => router.layer(middleware::from_fn_with_state(strategy, auth_middleware)),
        }
    }
}

impl std::fmt::Debug for AuthMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthMiddleware::{}", self.strategy())
    }
}

/// Authenticate the request and attach the resulting [`Identity`].
pub async fn auth_middleware(
    State(strategy): State<AuthMiddleware>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(authenticator) = strategy.authenticator() else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    match authenticator.authenticate(&parts).await {
        Ok(identity) => {
            metrics::record_auth(strategy.strategy(), "accepted");
            tracing::debug!(user = %identity.name, strategy = strategy.strategy(), "Request authenticated");
            let mut request = Request::from_parts(parts, body);
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => {
            metrics::record_auth(strategy.strategy(), "rejected");
            tracing::debug!(
                path = %parts.uri.path(),
                strategy = strategy.strategy(),
                error = %e,
                "Request rejected"
            );
            e.into_response()
        }
    }
}

/// Bearer token from the `Authorization` header.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Token from the session cookie.
pub fn session_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
        .filter(|t| !t.is_empty())
}
