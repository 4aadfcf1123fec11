//! Startup hook assembly and execution.
//!
//! # Responsibilities
//! - Turn the selected fallback auth subsystem into ordered start hooks
//! - Run hooks once, in order, before any listener accepts traffic
//!
//! # Design Decisions
//! - Fail fast: the first failing hook aborts startup, later hooks never run
//! - Hooks are consumed by the runner so none can execute twice

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthSubsystem;
use crate::http::server::Server;
use crate::observability::metrics;

/// Error type returned by individual hooks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Startup was aborted.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("start hook {index} ({name}) failed: {source}")]
    Hook {
        index: usize,
        name: &'static str,
        #[source]
        source: HookError,
    },
}

/// Deferred startup work bound to the server and a lifetime token.
#[async_trait]
pub trait StartHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, cancel: CancellationToken, server: &mut Server) -> Result<(), HookError>;
}

/// Couples the fallback auth subsystem to the server lifecycle.
pub struct AuthSubsystemHook {
    subsystem: Arc<dyn AuthSubsystem>,
}

impl AuthSubsystemHook {
    pub fn new(subsystem: Arc<dyn AuthSubsystem>) -> Self {
        Self { subsystem }
    }
}

#[async_trait]
impl StartHook for AuthSubsystemHook {
    fn name(&self) -> &'static str {
        "local-auth"
    }

    async fn run(&self, cancel: CancellationToken, server: &mut Server) -> Result<(), HookError> {
        // The chain must be wrapped before start so no request can bypass it.
        let next = std::mem::replace(&mut server.next, Router::new());
        server.next = self.subsystem.wrap(next);

        self.subsystem.start(cancel).await?;
        Ok(())
    }
}

/// Build the start hooks for a selection result.
pub fn assemble(fallback: Option<Arc<dyn AuthSubsystem>>) -> Vec<Box<dyn StartHook>> {
    match fallback {
        Some(subsystem) => vec![Box::new(AuthSubsystemHook::new(subsystem))],
        None => Vec::new(),
    }
}

/// Run `hooks` sequentially against `server`, stopping at the first failure.
pub async fn run_start_hooks(
    hooks: Vec<Box<dyn StartHook>>,
    cancel: &CancellationToken,
    server: &mut Server,
) -> Result<(), StartupError> {
    let total = hooks.len();
    for (index, hook) in hooks.into_iter().enumerate() {
        let name = hook.name();
        tracing::info!(hook = name, index, total, "Running start hook");

        if let Err(source) = hook.run(cancel.clone(), server).await {
            metrics::record_start_hook("failed");
            tracing::error!(hook = name, index, error = %source, "Start hook failed, aborting startup");
            return Err(StartupError::Hook { index, name, source });
        }
        metrics::record_start_hook("ok");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::subsystem::fake::FakeSubsystem;
    use crate::auth::{AuthMiddleware, AuthSubsystemInitError};
    use crate::cluster::ClientConfig;
    use crate::server::{DashboardUrl, ServerDescriptor};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use tower::ServiceExt;
    use url::Url;

    fn server() -> Server {
        let descriptor = ServerDescriptor::build(
            ClientConfig::new(Url::parse("http://127.0.0.1:1").unwrap()),
            AuthMiddleware::Disabled,
            DashboardUrl::new(|| "https://dash".to_string()),
            Vec::new(),
        );
        Server::new(descriptor).unwrap()
    }

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl StartHook for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, _cancel: CancellationToken, _server: &mut Server) -> Result<(), HookError> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                return Err("boom".into());
            }
            Ok(())
        }
    }

    #[test]
    fn test_assemble() {
        assert!(assemble(None).is_empty());
        let hooks = assemble(Some(Arc::new(FakeSubsystem::default())));
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].name(), "local-auth");
    }

    #[tokio::test]
    async fn test_hook_wraps_then_starts() {
        let subsystem = Arc::new(FakeSubsystem::default());
        let mut server = server();

        run_start_hooks(assemble(Some(subsystem.clone())), &CancellationToken::new(), &mut server)
            .await
            .unwrap();

        assert_eq!(subsystem.calls(), vec!["wrap", "start"]);
        assert!(subsystem.wrapped_at_start.load(Ordering::SeqCst));
        assert_eq!(subsystem.starts.load(Ordering::SeqCst), 1);

        let response = server
            .app()
            .oneshot(Request::builder().uri("/fake/wrapped").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Original chain is still reachable behind the wrapper.
        let response = server
            .app()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_start_failure_is_hook_error() {
        let subsystem = Arc::new(FakeSubsystem {
            fail_start: true,
            ..Default::default()
        });
        let mut server = server();

        let err = run_start_hooks(assemble(Some(subsystem)), &CancellationToken::new(), &mut server)
            .await
            .unwrap_err();
        let StartupError::Hook { index, name, source } = err;
        assert_eq!(index, 0);
        assert_eq!(name, "local-auth");
        assert!(source.downcast_ref::<AuthSubsystemInitError>().is_some());
    }

    #[tokio::test]
    async fn test_chain_replaced_even_when_start_fails() {
        let subsystem = Arc::new(FakeSubsystem {
            fail_start: true,
            ..Default::default()
        });
        let mut server = server();

        run_start_hooks(assemble(Some(subsystem.clone())), &CancellationToken::new(), &mut server)
            .await
            .unwrap_err();

        assert_eq!(subsystem.calls(), vec!["wrap", "start"]);
        let response = server
            .app()
            .oneshot(Request::builder().uri("/fake/wrapped").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_and_stop_on_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks: Vec<Box<dyn StartHook>> = vec![
            Box::new(Recording { name: "first", log: log.clone(), fail: false }),
            Box::new(Recording { name: "second", log: log.clone(), fail: true }),
            Box::new(Recording { name: "third", log: log.clone(), fail: false }),
        ];
        let mut server = server();

        let err = run_start_hooks(hooks, &CancellationToken::new(), &mut server).await.unwrap_err();
        assert!(matches!(err, StartupError::Hook { index: 1, .. }));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_empty_hooks_leave_chain_untouched() {
        let mut server = server();
        run_start_hooks(Vec::new(), &CancellationToken::new(), &mut server).await.unwrap();

        let response = server
            .app()
            .oneshot(Request::builder().uri("/fake/wrapped").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
