//! Seams for the internal fallback authentication subsystem.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::cluster::{ClientConfig, ClusterError};

/// Errors constructing or starting the fallback subsystem.
#[derive(Debug, Error)]
pub enum AuthSubsystemInitError {
    #[error("failed to build cluster client: {0}")]
    Client(#[source] ClusterError),

    #[error("backing cluster unreachable: {0}")]
    Unreachable(#[source] ClusterError),

    #[error("failed to sync auth tokens: {0}")]
    Sync(#[source] ClusterError),
}

/// A locally constructed authentication subsystem.
#[async_trait]
pub trait AuthSubsystem: Send + Sync {
    /// Authenticator installed as the server's auth middleware.
    fn authenticator(&self) -> Arc<dyn Authenticator>;

    /// Wrap the request-handling chain with the subsystem's own endpoints.
    fn wrap(&self, next: Router) -> Router;

    /// Bring the subsystem up. Background work spawned here runs until `cancel` fires.
    async fn start(&self, cancel: CancellationToken) -> Result<(), AuthSubsystemInitError>;
}

/// Builds the fallback subsystem bound to a cluster and a lifetime token.
#[async_trait]
pub trait AuthSubsystemFactory: Send + Sync {
    async fn create(
        &self,
        lifetime: CancellationToken,
        client_config: &ClientConfig,
    ) -> Result<Arc<dyn AuthSubsystem>, AuthSubsystemInitError>;
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    use axum::http::request::Parts;
    use axum::routing::get;

    use super::*;
    use crate::auth::{AuthError, Identity};
    use crate::cluster::ClusterError;

    pub struct FakeAuthenticator;

    #[async_trait]
    impl Authenticator for FakeAuthenticator {
        async fn authenticate(&self, _request: &Parts) -> Result<Identity, AuthError> {
            Ok(Identity {
                name: "fake-user".into(),
                ..Default::default()
            })
        }
    }

    /// Subsystem recording its calls in order; `/fake/wrapped` answers once wrapped.
    #[derive(Default)]
    pub struct FakeSubsystem {
        pub fail_start: bool,
        pub starts: AtomicU32,
        pub wrapped: AtomicBool,
        /// Whether `wrap` had already run when `start` was called.
        pub wrapped_at_start: AtomicBool,
        pub calls: Mutex<Vec<&'static str>>,
    }

    impl FakeSubsystem {
        pub fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AuthSubsystem for FakeSubsystem {
        fn authenticator(&self) -> Arc<dyn Authenticator> {
            Arc::new(FakeAuthenticator)
        }

        fn wrap(&self, next: Router) -> Router {
            self.calls.lock().unwrap().push("wrap");
            self.wrapped.store(true, Ordering::SeqCst);
            Router::new()
                .route("/fake/wrapped", get(|| async { "wrapped" }))
                .fallback_service(next)
        }

        async fn start(&self, _cancel: CancellationToken) -> Result<(), AuthSubsystemInitError> {
            self.calls.lock().unwrap().push("start");
            self.wrapped_at_start
                .store(self.wrapped.load(Ordering::SeqCst), Ordering::SeqCst);
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(AuthSubsystemInitError::Sync(ClusterError::Status {
                    path: "/apis/management.cattle.io/v3/tokens".into(),
                    status: 503,
                }));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeFactory {
        pub fail: bool,
        pub fail_start: bool,
        pub created: AtomicU32,
    }

    #[async_trait]
    impl AuthSubsystemFactory for FakeFactory {
        async fn create(
            &self,
            _lifetime: CancellationToken,
            _client_config: &ClientConfig,
        ) -> Result<Arc<dyn AuthSubsystem>, AuthSubsystemInitError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AuthSubsystemInitError::Unreachable(ClusterError::Status {
                    path: "/version".into(),
                    status: 503,
                }));
            }
            Ok(Arc::new(FakeSubsystem {
                fail_start: self.fail_start,
                ..Default::default()
            }))
        }
    }
}
