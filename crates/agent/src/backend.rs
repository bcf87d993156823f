//! Choose the reply backend from environment and stored options.

use std::sync::Arc;

use negotiagent_connectors::{GeminiBackend, ProxyBackend, ReplyBackend};
use tracing::info;

use crate::settings::load_llm_config;
use crate::store::KvStore;

pub const ENV_PROXY_URL: &str = "NEGOTIAGENT_PROXY_URL";
pub const ENV_PROXY_SECRET: &str = "NEGOTIAGENT_PROXY_SECRET";

fn env_non_blank(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Proxy when `NEGOTIAGENT_PROXY_URL` is set, direct Gemini otherwise.
pub fn build_backend(store: &dyn KvStore) -> anyhow::Result<Arc<dyn ReplyBackend>> {
    let llm = load_llm_config(store)?;

    if let Some(url) = env_non_blank(ENV_PROXY_URL) {
        let secret = env_non_blank(ENV_PROXY_SECRET).unwrap_or_default();
        info!(
            component = "backend",
            event = "backend.selected",
            backend = "proxy",
            url = %url,
            "Using AI proxy backend"
        );
        return Ok(Arc::new(ProxyBackend::new(url, secret, llm.system_prompt)?));
    }

    info!(
        component = "backend",
        event = "backend.selected",
        backend = "gemini",
        model = %llm.model,
        has_key = !llm.api_key.is_empty(),
        "Using Gemini backend"
    );
    Ok(Arc::new(GeminiBackend::new(llm)?))
}
