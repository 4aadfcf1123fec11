//! End-to-end resolution and startup against a mock cluster.

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use cluster_gateway::auth::local::LocalAuthFactory;
use cluster_gateway::auth::{AuthMiddleware, AuthSubsystemInitError};
use cluster_gateway::cluster::{ConfigResolutionError, KubeconfigResolver, RateLimit};
use cluster_gateway::config::{self, Config, WebhookConfig};
use cluster_gateway::http::Listeners;
use cluster_gateway::lifecycle::StartupError;
use cluster_gateway::{ResolveError, Resolver, Server};

use common::{start_mock_cluster, write_kubeconfig, MockCluster, USER_TOKEN};

fn no_ambient_credentials() -> KubeconfigResolver {
    KubeconfigResolver {
        kubeconfig_env: None,
        home_dir: None,
        in_cluster: None,
    }
}

fn resolver(config: Config) -> Resolver {
    Resolver::new(config::shared(config))
        .with_credential_resolver(no_ambient_credentials())
        .with_auth_factory(LocalAuthFactory::default())
}

fn config_for(kubeconfig: &std::path::Path) -> Config {
    Config {
        kubeconfig: kubeconfig.display().to_string(),
        ..Default::default()
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_local_auth_end_to_end() {
    let addr = start_mock_cluster(MockCluster::default()).await;
    let (_dir, path) = write_kubeconfig(&format!("http://{}", addr));
    let lifetime = CancellationToken::new();

    let descriptor = resolver(config_for(&path)).to_server(&lifetime).await.unwrap();
    assert!(matches!(descriptor.auth, AuthMiddleware::Internal(_)));
    assert_eq!(descriptor.start_hooks.len(), 1);
    assert_eq!(descriptor.client_config.rate_limit, RateLimit::Unthrottled);

    let mut server = Server::new(descriptor).unwrap();
    server.start(&lifetime).await.unwrap();
    let app = server.app();

    let anonymous = app
        .clone()
        .oneshot(Request::builder().uri("/api/v1/namespaces").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let forwarded = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/namespaces")
                .header(header::AUTHORIZATION, format!("Bearer {}", USER_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(forwarded.status(), StatusCode::OK);
    let echoed = body_json(forwarded).await;
    assert_eq!(echoed["authorized"], true);
    assert_eq!(echoed["user"][0], "u-1");
    assert_eq!(echoed["groups"][0], "local://devs");
    assert_eq!(echoed["groups"][1], "system:authenticated");

    // Routes added by the start hook's wrap are reachable.
    let whoami = app
        .oneshot(
            Request::builder()
                .uri("/v3/whoami")
                .header(header::COOKIE, format!("R_SESS={}", USER_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(whoami.status(), StatusCode::OK);
    assert_eq!(body_json(whoami).await["name"], "u-1");

    lifetime.cancel();
}

#[tokio::test]
async fn test_logout_revokes_token() {
    let mock = MockCluster::default();
    let deleted = mock.deleted.clone();
    let addr = start_mock_cluster(mock).await;
    let (_dir, path) = write_kubeconfig(&format!("http://{}", addr));
    let lifetime = CancellationToken::new();

    let descriptor = resolver(config_for(&path)).to_server(&lifetime).await.unwrap();
    let mut server = Server::new(descriptor).unwrap();
    server.start(&lifetime).await.unwrap();
    let app = server.app();

    let authed = |uri: &str, method: &str| {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", USER_TOKEN))
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(authed("/v3/tokens/logout", "POST")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(header::SET_COOKIE));
    assert_eq!(deleted.lock().unwrap().as_slice(), ["token-abc"]);

    let response = app.oneshot(authed("/v3/whoami", "GET")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    lifetime.cancel();
}

#[tokio::test]
async fn test_start_hook_failure_surfaces() {
    let addr = start_mock_cluster(MockCluster {
        fail_token_list: true,
        ..Default::default()
    })
    .await;
    let (_dir, path) = write_kubeconfig(&format!("http://{}", addr));
    let lifetime = CancellationToken::new();

    // Resolution succeeds: the cluster answers /version.
    let descriptor = resolver(config_for(&path)).to_server(&lifetime).await.unwrap();
    let mut server = Server::new(descriptor).unwrap();

    let err = server.start(&lifetime).await.unwrap_err();
    let StartupError::Hook { index, name, source } = err;
    assert_eq!(index, 0);
    assert_eq!(name, "local-auth");
    assert!(matches!(
        source.downcast_ref::<AuthSubsystemInitError>(),
        Some(AuthSubsystemInitError::Sync(_))
    ));
}

#[tokio::test]
async fn test_unreachable_cluster_fails_resolution() {
    let (_dir, path) = write_kubeconfig("http://127.0.0.1:1");
    let err = resolver(config_for(&path))
        .to_server(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::AuthSubsystemInit(AuthSubsystemInitError::Unreachable(_))
    ));
}

#[tokio::test]
async fn test_missing_credentials_fail_resolution() {
    let err = resolver(Config::default())
        .to_server(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::ConfigResolution(ConfigResolutionError::NoAmbientCredentials)
    ));
}

#[tokio::test]
async fn test_disabled_forwards_anonymously() {
    let addr = start_mock_cluster(MockCluster::default()).await;
    let (_dir, path) = write_kubeconfig(&format!("http://{}", addr));
    let config = Config {
        authentication: false,
        ..config_for(&path)
    };

    let descriptor = resolver(config).to_server(&CancellationToken::new()).await.unwrap();
    assert!(descriptor.start_hooks.is_empty());
    let server = Server::new(descriptor).unwrap();

    let response = server
        .app()
        .oneshot(Request::builder().uri("/api/v1/pods").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let echoed = body_json(response).await;
    assert_eq!(echoed["authorized"], true);
    assert!(echoed["user"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_webhook_needs_no_start_hooks() {
    let (_dir, path) = write_kubeconfig("http://127.0.0.1:1");
    let config = Config {
        webhook: WebhookConfig {
            webhook_authentication: true,
            webhook_url: "https://auth.example.com/review".into(),
            ..Default::default()
        },
        ..config_for(&path)
    };

    // The cluster is never contacted on this path.
    let descriptor = resolver(config).to_server(&CancellationToken::new()).await.unwrap();
    assert!(matches!(descriptor.auth, AuthMiddleware::External(_)));
    assert!(descriptor.start_hooks.is_empty());
}

#[tokio::test]
async fn test_dashboard_url_follows_config_reload() {
    let (_dir, path) = write_kubeconfig("http://127.0.0.1:1");
    let shared = config::shared(Config {
        authentication: false,
        ..config_for(&path)
    });
    let descriptor = Resolver::new(shared.clone())
        .with_credential_resolver(no_ambient_credentials())
        .to_server(&CancellationToken::new())
        .await
        .unwrap();
    let server = Server::new(descriptor).unwrap();
    assert_eq!(server.dashboard_url(), config::schema::DEFAULT_DASHBOARD_URL);

    shared.store(std::sync::Arc::new(Config {
        dashboard_url: "https://ui.internal/index.html".into(),
        ..(**shared.load()).clone()
    }));
    assert_eq!(server.dashboard_url(), "https://ui.internal/index.html");
}

#[tokio::test]
async fn test_run_stops_on_cancel() {
    let addr = start_mock_cluster(MockCluster::default()).await;
    let (_dir, path) = write_kubeconfig(&format!("http://{}", addr));
    let lifetime = CancellationToken::new();

    let descriptor = resolver(config_for(&path)).to_server(&lifetime).await.unwrap();
    let server = Server::new(descriptor).unwrap();

    let cancel = lifetime.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let listeners = Listeners {
        http: "127.0.0.1:0".parse().unwrap(),
        https: None,
    };
    tokio::time::timeout(Duration::from_secs(5), server.run(listeners, lifetime))
        .await
        .expect("server did not stop")
        .unwrap();
}
