//! Cluster API forwarding.
//!
//! # Responsibilities
//! - Forward `/api` and `/apis` requests to the backing cluster
//! - Present the gateway's own credentials upstream
//! - Impersonate the authenticated caller, when there is one

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
};

use crate::auth::Identity;
use crate::cluster::ClusterClient;

/// Largest request body forwarded upstream.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

const IMPERSONATE_USER: &str = "impersonate-user";
const IMPERSONATE_GROUP: &str = "impersonate-group";
const IMPERSONATE_UID: &str = "impersonate-uid";

/// Headers copied from the caller to the cluster request.
const FORWARDED_HEADERS: [header::HeaderName; 3] = [header::ACCEPT, header::CONTENT_TYPE, header::USER_AGENT];

/// Headers copied from the cluster response back to the caller.
const RETURNED_HEADERS: [header::HeaderName; 2] = [header::CONTENT_TYPE, header::CACHE_CONTROL];

pub async fn proxy_handler(State(client): State<ClusterClient>, request: Request<Body>) -> Response {
    let identity = request.extensions().get::<Identity>().cloned();
    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let incoming = request.headers().clone();

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response(),
    };

    tracing::debug!(
        method = %method,
        path = %path,
        user = identity.as_ref().map(|i| i.name.as_str()).unwrap_or("anonymous"),
        "Forwarding request to cluster"
    );

    let mut upstream = client.request(method, &path).body(body);
    for name in FORWARDED_HEADERS.iter() {
        if let Some(value) = incoming.get(name) {
            upstream = upstream.header(name, value);
        }
    }
    if let Some(identity) = &identity {
        upstream = upstream.headers(impersonation_headers(identity));
    }

    let response = match client.send(&path, upstream).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(path = %path, error = %e, "Cluster request failed");
            return (StatusCode::BAD_GATEWAY, "Cluster request failed").into_response();
        }
    };

    let status = response.status();
    let mut headers = HeaderMap::new();
    for name in RETURNED_HEADERS.iter() {
        if let Some(value) = response.headers().get(name) {
            headers.insert(name.clone(), value.clone());
        }
    }

    match response.bytes().await {
        Ok(bytes) => (status, headers, bytes).into_response(),
        Err(e) => {
            tracing::error!(path = %path, error = %e, "Failed to read cluster response");
            (StatusCode::BAD_GATEWAY, "Cluster response truncated").into_response()
        }
    }
}

fn impersonation_headers(identity: &Identity) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = identity.name.parse() {
        headers.insert(IMPERSONATE_USER, value);
    }
    if !identity.uid.is_empty() {
        if let Ok(value) = identity.uid.parse() {
            headers.insert(IMPERSONATE_UID, value);
        }
    }
    for group in &identity.groups {
        if let Ok(value) = group.parse() {
            headers.append(IMPERSONATE_GROUP, value);
        }
    }
    for (key, values) in &identity.extra {
        let Ok(name) = header::HeaderName::try_from(format!("Impersonate-Extra-{}", key)) else {
            continue;
        };
        for value in values {
            if let Ok(value) = value.parse() {
                headers.append(name.clone(), value);
            }
        }
    }
    headers
}
