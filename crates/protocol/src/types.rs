//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Who authored a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Me,
    Them,
}

impl Party {
    pub fn label(self) -> &'static str {
        match self {
            Party::Me => "ME",
            Party::Them => "THEM",
        }
    }
}

/// One chat message as rendered by the source page.
///
/// Text is never empty; construction goes through [`ChatTurn::new`] or a
/// validating deserializer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTurn")]
pub struct ChatTurn {
    text: String,
    sender: Party,
}

#[derive(Deserialize)]
struct RawTurn {
    text: String,
    sender: Party,
}

impl TryFrom<RawTurn> for ChatTurn {
    type Error = String;

    fn try_from(raw: RawTurn) -> Result<Self, Self::Error> {
        ChatTurn::new(raw.text, raw.sender).ok_or_else(|| "chat turn text is empty".to_string())
    }
}

impl ChatTurn {
    /// Build a turn, trimming surrounding whitespace. Returns `None` for blank text.
    pub fn new(text: impl Into<String>, sender: Party) -> Option<Self> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self {
            text: trimmed.to_string(),
            sender,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sender(&self) -> Party {
        self.sender
    }
}

/// Cheap fingerprint of a snapshot: turn count plus the last turn.
///
/// Edits to earlier turns do not change the signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub count: usize,
    pub last_text: Option<String>,
    pub last_sender: Option<Party>,
}

/// Ordered list of turns visible on the page at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationSnapshot {
    turns: Vec<ChatTurn>,
}

impl ConversationSnapshot {
    pub fn new(turns: Vec<ChatTurn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    pub fn signature(&self) -> Signature {
        let last = self.turns.last();
        Signature {
            count: self.turns.len(),
            last_text: last.map(|t| t.text().to_string()),
            last_sender: last.map(ChatTurn::sender),
        }
    }

    /// True when the counterparty spoke last.
    pub fn awaits_reply(&self) -> bool {
        matches!(self.last().map(ChatTurn::sender), Some(Party::Them))
    }
}

impl FromIterator<ChatTurn> for ConversationSnapshot {
    fn from_iter<I: IntoIterator<Item = ChatTurn>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Best-effort page metadata, delivered independently of turns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    #[serde(rename = "personName", default)]
    pub counterparty_name: Option<String>,
    #[serde(rename = "itemInfo", default)]
    pub item_description: Option<String>,
}

impl ConversationMetadata {
    pub fn is_empty(&self) -> bool {
        self.counterparty_name.is_none() && self.item_description.is_none()
    }
}

/// Reply tone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Friendly,
    Professional,
    Firm,
}

/// Which side of the deal the user is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Buyer,
    Seller,
}

/// User-controlled negotiation preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationSettings {
    pub auto_send: bool,
    pub max_price_deviation: f64,
    pub tone: Tone,
    pub role: Role,
    pub pickup_address: String,
    pub address_disclosure_authorized: bool,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            auto_send: true,
            max_price_deviation: 10.0,
            tone: Tone::Friendly,
            role: Role::Buyer,
            pickup_address: String::new(),
            address_disclosure_authorized: false,
        }
    }
}

impl NegotiationSettings {
    /// The address the agent may reveal, if the user allowed it.
    pub fn disclosable_address(&self) -> Option<&str> {
        let address = self.pickup_address.trim();
        (self.address_disclosure_authorized && !address.is_empty()).then_some(address)
    }
}

/// A captured marketplace listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

/// A recorded negotiation with one counterparty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_name: Option<String>,
    #[serde(default)]
    pub turns: Vec<ChatTurn>,
}
