//! `negotiagent proxy`: shared-secret relay in front of the model endpoint.
//!
//! Keeps the model credential server-side. Clients post either a flat
//! `prompt` or ready-made `instances`; the relay wraps, forwards with a
//! bearer credential, and returns the upstream status and JSON unchanged.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{proxy_secret_middleware, BODY_LIMIT};

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub secret: Option<String>,
    pub upstream_key: Option<String>,
    pub endpoint: Option<String>,
    pub port: u16,
}

fn env_non_blank(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ProxyConfig {
    /// `PROXY_SECRET`, `GEMINI_KEY`, `GEMINI_ENDPOINT` (or `PROXY_TARGET`), `PORT`.
    pub fn from_env() -> Self {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(component = "proxy", value = %raw, "Invalid PORT, using default");
                DEFAULT_PORT
            }),
            Err(_) => DEFAULT_PORT,
        };
        Self {
            secret: env_non_blank("PROXY_SECRET"),
            upstream_key: env_non_blank("GEMINI_KEY"),
            endpoint: env_non_blank("GEMINI_ENDPOINT").or_else(|| env_non_blank("PROXY_TARGET")),
            port,
        }
    }
}

#[derive(Clone)]
struct ProxyState {
    client: reqwest::Client,
    config: Arc<ProxyConfig>,
}

#[derive(Debug, Deserialize)]
struct ProxyRequest {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    instances: Option<Value>,
    #[serde(default)]
    parameters: Option<Value>,
}

impl ProxyRequest {
    fn upstream_body(self) -> Value {
        let mut body = Map::new();
        match self.prompt.filter(|p| !p.is_empty()) {
            Some(prompt) => {
                body.insert("instances".into(), json!([{ "content": prompt }]));
            }
            None => {
                if let Some(instances) = self.instances.filter(|v| !v.is_null()) {
                    body.insert("instances".into(), instances);
                }
            }
        }
        if let Some(parameters) = self.parameters.filter(|v| !v.is_null()) {
            body.insert("parameters".into(), parameters);
        }
        Value::Object(body)
    }
}

pub fn router(config: ProxyConfig) -> anyhow::Result<Router> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?;
    let secret = config.secret.clone();
    let state = ProxyState {
        client,
        config: Arc::new(config),
    };

    Ok(Router::new()
        .route("/health", get(health_handler))
        .route("/api/ai", post(ai_handler))
        .layer(middleware::from_fn_with_state(secret, proxy_secret_middleware))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state))
}

pub async fn serve(config: ProxyConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    if config.secret.is_none() {
        warn!(
            component = "proxy",
            "PROXY_SECRET not set; every /api/ai request will be rejected"
        );
    }
    if config.endpoint.is_none() {
        warn!(
            component = "proxy",
            "GEMINI_ENDPOINT not set; configure the upstream model endpoint"
        );
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router(config)?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        component = "proxy",
        event = "proxy.listening",
        addr = %addr,
        "Proxy listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn ai_handler(State(state): State<ProxyState>, Json(req): Json<ProxyRequest>) -> Response {
    let Some(endpoint) = state.config.endpoint.as_deref() else {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "upstream endpoint not configured".into(),
        );
    };
    let key = state.config.upstream_key.as_deref().unwrap_or_default();

    let result = state
        .client
        .post(endpoint)
        .bearer_auth(key)
        .json(&req.upstream_body())
        .send()
        .await;

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            error!(
                component = "proxy",
                event = "proxy.upstream_failed",
                error = %err,
                "Upstream request failed"
            );
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        }
    };

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    match response.json::<Value>().await {
        Ok(body) => {
            info!(
                component = "proxy",
                event = "proxy.relayed",
                status = status.as_u16(),
                "Relayed upstream response"
            );
            (status, Json(body)).into_response()
        }
        Err(err) => {
            error!(
                component = "proxy",
                event = "proxy.upstream_not_json",
                status = status.as_u16(),
                error = %err,
                "Upstream returned non-JSON body"
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}
