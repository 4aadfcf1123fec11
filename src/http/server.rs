//! HTTP server runtime.
//!
//! # Responsibilities
//! - Build the base request-handling chain from a [`ServerDescriptor`]
//! - Run start hooks before any listener binds
//! - Put the selected auth middleware in front of the final chain
//! - Serve plain HTTP and, when configured, TLS until cancelled

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::State,
    response::{IntoResponse, Redirect},
    routing::{any, get},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::auth::AuthMiddleware;
use crate::cluster::{ClusterClient, ClusterError};
use crate::http::proxy::proxy_handler;
use crate::lifecycle::startup::{run_start_hooks, StartHook, StartupError};
use crate::server::{DashboardUrl, ServerDescriptor};

/// Time allowed for in-flight TLS connections to finish on shutdown.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to build cluster client: {0}")]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

/// Addresses the server listens on.
pub struct Listeners {
    pub http: SocketAddr,
    pub https: Option<(SocketAddr, RustlsConfig)>,
}

/// Server runtime driven by a resolved descriptor.
pub struct Server {
    /// Current request-handling chain. Start hooks may replace it.
    pub next: Router,
    auth: AuthMiddleware,
    dashboard_url: DashboardUrl,
    start_hooks: Vec<Box<dyn StartHook>>,
}

impl Server {
    pub fn new(descriptor: ServerDescriptor) -> Result<Self, ServerError> {
        let client = ClusterClient::new(&descriptor.client_config)?;
        let next = base_router(client, descriptor.dashboard_url.clone());

        Ok(Self {
            next,
            auth: descriptor.auth,
            dashboard_url: descriptor.dashboard_url,
            start_hooks: descriptor.start_hooks,
        })
    }

    pub fn dashboard_url(&self) -> String {
        self.dashboard_url.get()
    }

    /// Run the pending start hooks. Each hook runs at most once.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<(), StartupError> {
        let hooks = std::mem::take(&mut self.start_hooks);
        run_start_hooks(hooks, cancel, self).await
    }

    /// The complete service: auth in front of the current chain.
    pub fn app(&self) -> Router {
        self.auth
            .clone()
            .layer(self.next.clone())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Start, bind and serve until `cancel` fires.
    pub async fn run(mut self, listeners: Listeners, cancel: CancellationToken) -> Result<(), ServerError> {
        self.start(&cancel).await?;
        let app = self.app();

        let listener = TcpListener::bind(listeners.http).await?;
        tracing::info!(
            address = %listener.local_addr()?,
            auth = self.auth.strategy(),
            "HTTP listener started"
        );

        let http_cancel = cancel.clone();
        let http = axum::serve(listener, app.clone()).with_graceful_shutdown(async move {
            http_cancel.cancelled().await;
        });

        match listeners.https {
            Some((addr, tls)) => {
                let handle = axum_server::Handle::new();
                let shutdown = handle.clone();
                let tls_cancel = cancel.clone();
                tokio::spawn(async move {
                    tls_cancel.cancelled().await;
                    shutdown.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
                });

                tracing::info!(address = %addr, "HTTPS listener started");
                let https = axum_server::bind_rustls(addr, tls)
                    .handle(handle)
                    .serve(app.into_make_service());
                tokio::try_join!(async { http.await }, https)?;
            }
            None => {
                tracing::info!("No TLS certificate configured, HTTPS listener disabled");
                http.await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Base chain every server starts with.
fn base_router(client: ClusterClient, dashboard_url: DashboardUrl) -> Router {
    let cluster = Router::new()
        .route("/api", any(proxy_handler))
        .route("/api/{*path}", any(proxy_handler))
        .route("/apis", any(proxy_handler))
        .route("/apis/{*path}", any(proxy_handler))
        .route("/version", get(proxy_handler))
        .with_state(client);

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/dashboard", get(dashboard))
        .route("/dashboard/", get(dashboard))
        .with_state(dashboard_url)
        .merge(cluster)
}

async fn dashboard(State(url): State<DashboardUrl>) -> impl IntoResponse {
    Redirect::temporary(&url.get())
}
