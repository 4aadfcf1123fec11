//! The resolution pass.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::local::LocalAuthFactory;
use crate::auth::{select, AuthSubsystemFactory};
use crate::cluster::{resolve_client_config, CredentialResolver, KubeconfigResolver};
use crate::config::SharedConfig;
use crate::error::ResolveResult;
use crate::lifecycle::run_blocking;
use crate::lifecycle::startup::assemble;
use crate::server::descriptor::{DashboardUrl, ServerDescriptor};

/// Resolves a configuration into a [`ServerDescriptor`].
pub struct Resolver {
    config: SharedConfig,
    credentials: Arc<dyn CredentialResolver>,
    auth_factory: Arc<dyn AuthSubsystemFactory>,
}

impl Resolver {
    /// Resolver using kubeconfig discovery and the local auth server fallback.
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            credentials: Arc::new(KubeconfigResolver::from_env()),
            auth_factory: Arc::new(LocalAuthFactory::default()),
        }
    }

    pub fn with_credential_resolver(mut self, resolver: impl CredentialResolver + 'static) -> Self {
        self.credentials = Arc::new(resolver);
        self
    }

    pub fn with_auth_factory(mut self, factory: impl AuthSubsystemFactory + 'static) -> Self {
        self.auth_factory = Arc::new(factory);
        self
    }

    /// Run one resolution pass.
    ///
    /// Long-lived work created along the way (the local auth server) is
    /// bound to `lifetime`.
    pub async fn to_server(&self, lifetime: &CancellationToken) -> ResolveResult<ServerDescriptor> {
        let config = self.config.load_full();

        let credentials = self.credentials.clone();
        let source = config.kubeconfig.clone();
        let client_config = run_blocking(move || resolve_client_config(credentials.as_ref(), &source)).await?;
        let selection = select(
            config.authentication,
            &config.webhook,
            &client_config,
            lifetime,
            self.auth_factory.as_ref(),
        )
        .await?;
        let start_hooks = assemble(selection.fallback);

        tracing::info!(
            auth = selection.middleware.strategy(),
            start_hooks = start_hooks.len(),
            "Server descriptor resolved"
        );

        Ok(ServerDescriptor::build(
            client_config,
            selection.middleware,
            DashboardUrl::from_shared(self.config.clone()),
            start_hooks,
        ))
    }

    /// Like [`Resolver::to_server`], but panics on failure.
    ///
    /// For process entry points that cannot continue without a server.
    pub async fn must_server(&self, lifetime: &CancellationToken) -> ServerDescriptor {
        match self.to_server(lifetime).await {
            Ok(descriptor) => descriptor,
            Err(e) => panic!("failed to resolve server: {}", e),
        }
    }
}
