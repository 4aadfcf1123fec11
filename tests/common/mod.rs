//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{any, delete, get},
    Json, Router,
};
use serde_json::json;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Token the gateway itself presents to the mock cluster.
pub const GATEWAY_TOKEN: &str = "gateway-token";

/// Token value a user presents to the gateway.
pub const USER_TOKEN: &str = "token-abc:s3cret";

/// Behaviour switches and call records for the mock cluster.
#[derive(Clone, Default)]
pub struct MockCluster {
    /// Fail the token list with HTTP 500.
    pub fail_token_list: bool,
    pub deleted: Arc<Mutex<Vec<String>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", GATEWAY_TOKEN))
        .unwrap_or(false)
}

async fn version(headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({"major": "1", "minor": "30", "gitVersion": "v1.30.2"})).into_response()
}

async fn tokens(State(mock): State<MockCluster>, headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if mock.fail_token_list {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!({
        "items": [{
            "metadata": {"name": "token-abc"},
            "token": "s3cret",
            "userId": "u-1",
            "groupPrincipals": [{"metadata": {"name": "local://devs"}}]
        }]
    }))
    .into_response()
}

async fn delete_token(State(mock): State<MockCluster>, Path(name): Path<String>) -> StatusCode {
    mock.deleted.lock().unwrap().push(name);
    StatusCode::OK
}

/// Echo how the gateway called the cluster.
async fn echo(headers: HeaderMap) -> Json<serde_json::Value> {
    let get = |name: &str| {
        headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect::<Vec<_>>()
    };
    Json(json!({
        "authorized": authorized(&headers),
        "user": get("impersonate-user"),
        "groups": get("impersonate-group"),
    }))
}

/// Start the mock cluster on an ephemeral port.
pub async fn start_mock_cluster(mock: MockCluster) -> SocketAddr {
    let app = Router::new()
        .route("/version", get(version))
        .route("/apis/management.cattle.io/v3/tokens", get(tokens))
        .route("/apis/management.cattle.io/v3/tokens/{name}", delete(delete_token))
        .route("/api/{*path}", any(echo))
        .with_state(mock);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Write a kubeconfig pointing at `server`; keep the returned dir alive.
pub fn write_kubeconfig(server: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kubeconfig");
    std::fs::write(
        &path,
        format!(
            r#"
apiVersion: v1
kind: Config
current-context: test
clusters:
- name: mock
  cluster:
    server: {server}
contexts:
- name: test
  context:
    cluster: mock
    user: gateway
users:
- name: gateway
  user:
    token: {token}
"#,
            server = server,
            token = GATEWAY_TOKEN
        ),
    )
    .unwrap();
    (dir, path)
}
