//! `negotiagent draft <history.json>`: one-shot reply generation for a FULL_HISTORY record.

use std::path::Path;

use anyhow::{bail, Context};
use negotiagent_connectors::{ReplyBackend, ReplyRequest};
use negotiagent_protocol::{ChannelMessage, ConversationMetadata};

use crate::settings::{load_active_listing, load_settings};
use crate::store::KvStore;

pub fn load_request(
    store: &dyn KvStore,
    history: &Path,
    metadata: ConversationMetadata,
) -> anyhow::Result<ReplyRequest> {
    let raw = std::fs::read_to_string(history)
        .with_context(|| format!("reading {}", history.display()))?;
    let message: ChannelMessage = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {} as a channel record", history.display()))?;
    let kind = message.kind();
    let ChannelMessage::FullHistory { messages } = message else {
        bail!("expected a FULL_HISTORY record, got {}", kind);
    };
    if messages.is_empty() {
        bail!("history is empty");
    }

    Ok(ReplyRequest {
        conversation_history: messages.turns().to_vec(),
        metadata,
        settings: load_settings(store)?,
        listing: load_active_listing(store)?,
    })
}

pub async fn run(
    store: &dyn KvStore,
    backend: &dyn ReplyBackend,
    history: &Path,
    metadata: ConversationMetadata,
) -> anyhow::Result<()> {
    let request = load_request(store, history, metadata)?;
    let reply = backend.generate(&request).await?;
    if let Some(label) = &reply.label {
        eprintln!("[{}]", label);
    }
    println!("{}", reply.text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::KEY_TONE;
    use crate::store::{KvStoreExt, MemoryStore};
    use negotiagent_protocol::Tone;

    fn write(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("history.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn builds_request_with_stored_settings() {
        let store = MemoryStore::new();
        store.set(KEY_TONE, &Tone::Firm).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{"type":"FULL_HISTORY","messages":[{"text":"50?","sender":"them"}]}"#,
        );
        let request = load_request(&store, &path, ConversationMetadata::default()).unwrap();
        assert_eq!(request.conversation_history.len(), 1);
        assert_eq!(request.settings.tone, Tone::Firm);
        assert!(request.listing.is_none());
    }

    #[test]
    fn rejects_other_record_types() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"{"type":"GET_HISTORY"}"#);
        let err = load_request(&store, &path, ConversationMetadata::default()).unwrap_err();
        assert!(err.to_string().contains("GET_HISTORY"));
    }
}
