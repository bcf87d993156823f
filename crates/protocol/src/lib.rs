//! Negotiagent Protocol
//!
//! Shared types for communication between the page-side observer and the
//! negotiation panel. These types are serialized as JSON over the
//! delivery channel and into the key-value store.

use uuid::Uuid;

// Re-exports
pub mod channel;
pub mod types;

pub use channel::{ChannelMessage, ChannelReply};
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
