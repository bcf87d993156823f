//! Delivery channel records (page ↔ panel)

use serde::{Deserialize, Serialize};

use crate::types::{ConversationMetadata, ConversationSnapshot};

/// Messages carried by the delivery channel.
///
/// `FullHistory` and `Metadata` flow from the page to the panel;
/// `InsertText` and `GetHistory` flow from the panel to the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelMessage {
    FullHistory {
        messages: ConversationSnapshot,
    },
    Metadata {
        metadata: ConversationMetadata,
    },
    InsertText {
        text: String,
    },
    GetHistory,
}

impl ChannelMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelMessage::FullHistory { .. } => "FULL_HISTORY",
            ChannelMessage::Metadata { .. } => "METADATA",
            ChannelMessage::InsertText { .. } => "INSERT_TEXT",
            ChannelMessage::GetHistory => "GET_HISTORY",
        }
    }
}

/// Optional response a listener may return for a delivered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelReply {
    Ack,
    Injected { clicked_send: bool },
    ComposerNotFound,
    Failed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Party;

    #[test]
    fn deserializes_full_history() {
        let json = r#"{
          "type":"FULL_HISTORY",
          "messages":[
            {"text":"Is this available?","sender":"them"},
            {"text":"Yes","sender":"me"}
          ]
        }"#;

        let parsed: ChannelMessage = serde_json::from_str(json).expect("parse full history");
        match parsed {
            ChannelMessage::FullHistory { messages } => {
                assert_eq!(messages.len(), 2);
                assert_eq!(messages.turns()[0].sender(), Party::Them);
                assert_eq!(messages.turns()[1].text(), "Yes");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn get_history_has_no_payload() {
        let json = serde_json::to_string(&ChannelMessage::GetHistory).expect("serialize");
        assert_eq!(json, r#"{"type":"GET_HISTORY"}"#);
    }

    #[test]
    fn metadata_message_keeps_page_keys() {
        let msg = ChannelMessage::Metadata {
            metadata: ConversationMetadata {
                counterparty_name: Some("Dana".into()),
                item_description: Some("Oak desk".into()),
            },
        };
        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value["type"], "METADATA");
        assert_eq!(value["metadata"]["personName"], "Dana");
        assert_eq!(value["metadata"]["itemInfo"], "Oak desk");
        assert_eq!(msg.kind(), "METADATA");
    }

    #[test]
    fn reply_is_status_tagged() {
        let reply: ChannelReply =
            serde_json::from_str(r#"{"status":"injected","clicked_send":true}"#).expect("parse");
        assert_eq!(reply, ChannelReply::Injected { clicked_send: true });
    }
}
