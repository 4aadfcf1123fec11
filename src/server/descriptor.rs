//! Server descriptor assembly.

use std::sync::Arc;

use crate::auth::AuthMiddleware;
use crate::cluster::ClientConfig;
use crate::config::SharedConfig;
use crate::lifecycle::startup::StartHook;

/// Late-bound accessor for the dashboard URL.
///
/// Each call reads the current value; nothing is captured at build time.
#[derive(Clone)]
pub struct DashboardUrl(Arc<dyn Fn() -> String + Send + Sync>);

impl DashboardUrl {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Read the URL from whatever snapshot `config` holds at call time.
    pub fn from_shared(config: SharedConfig) -> Self {
        Self::new(move || config.load().dashboard_url.clone())
    }

    pub fn get(&self) -> String {
        (self.0)()
    }
}

impl std::fmt::Debug for DashboardUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DashboardUrl(..)")
    }
}

/// Everything the server runtime needs to start.
pub struct ServerDescriptor {
    pub client_config: ClientConfig,
    pub auth: AuthMiddleware,
    pub dashboard_url: DashboardUrl,
    /// Run in order, once, before listeners accept traffic.
    pub start_hooks: Vec<Box<dyn StartHook>>,
}

impl ServerDescriptor {
    pub fn build(
        client_config: ClientConfig,
        auth: AuthMiddleware,
        dashboard_url: DashboardUrl,
        start_hooks: Vec<Box<dyn StartHook>>,
    ) -> Self {
        Self {
            client_config,
            auth,
            dashboard_url,
            start_hooks,
        }
    }
}

impl std::fmt::Debug for ServerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDescriptor")
            .field("client_config", &self.client_config)
            .field("auth", &self.auth)
            .field("start_hooks", &self.start_hooks.len())
            .finish_non_exhaustive()
    }
}
