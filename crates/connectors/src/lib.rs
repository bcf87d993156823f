//! Negotiagent Connectors
//!
//! Backends that turn a conversation into a negotiation reply.
//! Each backend talks to its provider over HTTP and reduces the response
//! to a single [`ReplyText`].

pub mod gemini;
pub mod prompt;
pub mod proxy;
pub mod suggestions;

use async_trait::async_trait;
use negotiagent_protocol::{ChatTurn, ConversationMetadata, Listing, NegotiationSettings};
use serde::Serialize;
use thiserror::Error;

pub use gemini::{GeminiBackend, GeminiConfig};
pub use proxy::ProxyBackend;

/// Coarse classification of a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Authentication,
    Parse,
}

/// Errors that can occur while generating a reply
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("LLM error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Could not parse model response: {0}")]
    Parse(String),
}

impl BackendError {
    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => BackendError::Authentication(format!("status {}: {}", status, body)),
            _ => BackendError::Http { status, body },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Transport(_) | BackendError::Http { .. } => ErrorKind::Transport,
            BackendError::Authentication(_) => ErrorKind::Authentication,
            BackendError::Parse(_) => ErrorKind::Parse,
        }
    }

    /// Rate limits, server errors and connection failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Transport(_) => true,
            BackendError::Http { status, .. } => *status == 429 || *status >= 500,
            BackendError::Authentication(_) | BackendError::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

/// Everything a backend needs to draft the next reply
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    pub conversation_history: Vec<ChatTurn>,
    pub metadata: ConversationMetadata,
    pub settings: NegotiationSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing: Option<Listing>,
}

/// A generated reply ready for drafting or sending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyText {
    pub text: String,
    pub label: Option<String>,
}

/// A reply-generation provider
#[async_trait]
pub trait ReplyBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &ReplyRequest) -> Result<ReplyText, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_map_to_authentication() {
        assert_eq!(
            BackendError::from_status(401, "nope".into()).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            BackendError::from_status(403, "nope".into()).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            BackendError::from_status(500, "boom".into()).kind(),
            ErrorKind::Transport
        );
    }

    #[test]
    fn only_transient_failures_retry() {
        assert!(BackendError::from_status(429, String::new()).is_retryable());
        assert!(BackendError::from_status(503, String::new()).is_retryable());
        assert!(!BackendError::from_status(400, String::new()).is_retryable());
        assert!(!BackendError::from_status(401, String::new()).is_retryable());
        assert!(!BackendError::Parse("bad".into()).is_retryable());
    }
}
