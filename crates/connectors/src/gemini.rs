//! Direct Gemini `generateContent` backend.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::prompt::{build_prompt, Prompt};
use crate::suggestions::reply_from_response;
use crate::{BackendError, ReplyBackend, ReplyRequest, ReplyText};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(300);

/// Options-page configuration for the Gemini backend
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub endpoint: Option<String>,
    pub model: String,
    pub system_prompt: Option<String>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: None,
            model: DEFAULT_MODEL.to_string(),
            system_prompt: None,
        }
    }
}

/// Resolve the request URL.
///
/// A custom endpoint may carry an `{API_KEY}` placeholder; otherwise the key
/// is appended as a `key=` query parameter unless one is already present.
pub fn build_url(config: &GeminiConfig) -> String {
    let key = urlencoding::encode(&config.api_key);
    let url = match config.endpoint.as_deref().map(str::trim) {
        Some(endpoint) if !endpoint.is_empty() => endpoint.to_string(),
        _ => format!(
            "{}/models/{}:generateContent",
            BASE_URL,
            urlencoding::encode(&config.model)
        ),
    };

    if url.contains("{API_KEY}") {
        return url.replace("{API_KEY}", &key);
    }
    if url.contains("key=") {
        return url;
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", url, sep, key)
}

pub struct GeminiBackend {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { client, config })
    }

    fn payload(prompt: &Prompt) -> Value {
        json!({
            "system_instruction": { "parts": [ { "text": prompt.system } ] },
            "contents": [
                { "role": "user", "parts": [ { "text": prompt.user } ] }
            ],
            "generationConfig": {
                "temperature": 0.6,
                "maxOutputTokens": 512,
                "responseMimeType": "application/json"
            }
        })
    }

    async fn call(&self, url: &str, body: &Value) -> Result<Value, BackendError> {
        let resp = self.client.post(url).json(body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), text));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| BackendError::Parse(format!("response body is not JSON: {}", e)))
    }
}

#[async_trait]
impl ReplyBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, request: &ReplyRequest) -> Result<ReplyText, BackendError> {
        if self.config.api_key.trim().is_empty() {
            return Err(BackendError::Authentication(
                "No LLM API key configured in options".to_string(),
            ));
        }

        let prompt = build_prompt(request, self.config.system_prompt.as_deref()).redacted();
        let body = Self::payload(&prompt);
        let url = build_url(&self.config);

        debug!(
            component = "gemini",
            model = %self.config.model,
            history_len = request.conversation_history.len(),
            "Calling Gemini generateContent"
        );

        let mut attempt = 0;
        loop {
            match self.call(&url, &body).await {
                Ok(response) => return reply_from_response(&response),
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(
                        component = "gemini",
                        attempt,
                        error = %err,
                        "Gemini call failed, retrying"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
