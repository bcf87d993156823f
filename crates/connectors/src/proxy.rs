//! Backend that goes through the shared-secret AI proxy.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::prompt::build_prompt;
use crate::suggestions::reply_from_response;
use crate::{BackendError, ReplyBackend, ReplyRequest, ReplyText};

pub const SECRET_HEADER: &str = "x-proxy-secret";

pub struct ProxyBackend {
    client: reqwest::Client,
    url: String,
    secret: String,
    system_prompt: Option<String>,
}

impl ProxyBackend {
    pub fn new(
        url: impl Into<String>,
        secret: impl Into<String>,
        system_prompt: Option<String>,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            secret: secret.into(),
            system_prompt,
        })
    }
}

#[async_trait]
impl ReplyBackend for ProxyBackend {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn generate(&self, request: &ReplyRequest) -> Result<ReplyText, BackendError> {
        let prompt = build_prompt(request, self.system_prompt.as_deref()).redacted();

        debug!(component = "proxy_backend", url = %self.url, "Calling AI proxy");

        let resp = self
            .client
            .post(&self.url)
            .header(SECRET_HEADER, &self.secret)
            .json(&json!({ "prompt": prompt.flatten() }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), text));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| BackendError::Parse(format!("proxy body is not JSON: {}", e)))?;
        reply_from_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sends_secret_and_reads_predictions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/ai"))
            .and(header(SECRET_HEADER, "s3cret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"predictions":[{"content":"Happy to meet halfway."}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend =
            ProxyBackend::new(format!("{}/api/ai", server.uri()), "s3cret", None).unwrap();
        let reply = backend
            .generate(&ReplyRequest::default())
            .await
            .expect("reply");
        assert_eq!(reply.text, "Happy to meet halfway.");
    }

    #[tokio::test]
    async fn rejected_secret_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error":"unauthorized"})))
            .mount(&server)
            .await;

        let backend = ProxyBackend::new(server.uri(), "wrong", None).unwrap();
        let err = backend
            .generate(&ReplyRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }
}
