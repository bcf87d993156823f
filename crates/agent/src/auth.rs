//! Shared-secret middleware for the AI proxy.
//!
//! Requests must carry the secret in the `x-proxy-secret` header or as a
//! `proxySecret` field in the JSON body. With no secret configured every
//! request is rejected. `/health` stays open.

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use negotiagent_connectors::proxy::SECRET_HEADER;
use serde_json::{json, Value};

pub const BODY_LIMIT: usize = 128 * 1024;

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "unauthorized" })),
    )
        .into_response()
}

/// Axum middleware that checks the proxy secret.
pub async fn proxy_secret_middleware(
    State(expected): State<Option<String>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let Some(expected) = expected else {
        return unauthorized();
    };

    let header_ok = req
        .headers()
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|token| token == expected);
    if header_ok {
        return next.run(req).await;
    }

    // Fall back to the body field; the body is buffered and handed on.
    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };
    let body_ok = serde_json::from_slice::<Value>(&bytes)
        .ok()
        .and_then(|v| v.get("proxySecret").and_then(Value::as_str).map(str::to_owned))
        .is_some_and(|token| token == expected);
    if !body_ok {
        return unauthorized();
    }
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
