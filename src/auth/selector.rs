//! Authentication strategy selection.
//!
//! Priority order, first match wins:
//! 1. authentication disabled → [`AuthMiddleware::Disabled`]
//! 2. webhook configured      → [`AuthMiddleware::External`]
//! 3. otherwise               → [`AuthMiddleware::Internal`] backed by a fallback subsystem

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::subsystem::{AuthSubsystem, AuthSubsystemFactory};
use crate::auth::AuthMiddleware;
use crate::cluster::ClientConfig;
use crate::config::WebhookConfig;
use crate::error::ResolveResult;
use crate::lifecycle::run_blocking;

/// Outcome of strategy selection.
pub struct Selection {
    pub middleware: AuthMiddleware,
    /// Present only when the internal fallback was constructed.
    pub fallback: Option<Arc<dyn AuthSubsystem>>,
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("middleware", &self.middleware)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Choose the authentication strategy.
///
/// The fallback subsystem is bound to `lifetime`; cancelling it stops any
/// background work the subsystem later starts.
pub async fn select(
    enabled: bool,
    webhook: &WebhookConfig,
    client_config: &ClientConfig,
    lifetime: &CancellationToken,
    factory: &dyn AuthSubsystemFactory,
) -> ResolveResult<Selection> {
    if !enabled {
        tracing::warn!("Authentication disabled, all requests are anonymous");
        return Ok(Selection {
            middleware: AuthMiddleware::Disabled,
            fallback: None,
        });
    }

    let webhook = webhook.clone();
    if let Some(authenticator) = run_blocking(move || webhook.authenticator()).await? {
        tracing::info!("Using webhook authentication");
        return Ok(Selection {
            middleware: AuthMiddleware::External(authenticator),
            fallback: None,
        });
    }

    let subsystem = factory.create(lifetime.clone(), client_config).await?;
    tracing::info!("No webhook configured, using local authentication");
    Ok(Selection {
        middleware: AuthMiddleware::Internal(subsystem.authenticator()),
        fallback: Some(subsystem),
    })
}
