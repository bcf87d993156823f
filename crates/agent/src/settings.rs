//! Negotiation settings and LLM options, stored one key per field.
//!
//! Saves are key by key with no transaction; a crash mid-save can leave
//! a mix of old and new fields.

use negotiagent_connectors::gemini::DEFAULT_MODEL;
use negotiagent_connectors::GeminiConfig;
use negotiagent_protocol::{Listing, NegotiationSettings, Role, Tone};

use crate::store::{KvStore, KvStoreExt, StoreError};

pub const KEY_AUTO_SEND: &str = "autoNegotiate";
pub const KEY_PRICE_DEVIATION: &str = "priceDeviation";
pub const KEY_TONE: &str = "tone";
pub const KEY_ROLE: &str = "role";
pub const KEY_ADDRESS: &str = "address";
pub const KEY_AUTHORIZE_ADDRESS: &str = "authorizeAddress";

pub const KEY_LLM_API_KEY: &str = "llm_api_key";
pub const KEY_LLM_ENDPOINT: &str = "llm_endpoint";
pub const KEY_LLM_MODEL: &str = "llm_model";
pub const KEY_LLM_SYSTEM_PROMPT: &str = "llm_system_prompt";

pub const KEY_ACTIVE_LISTING: &str = "active_listing";

pub fn load_settings(store: &dyn KvStore) -> Result<NegotiationSettings, StoreError> {
    let defaults = NegotiationSettings::default();
    Ok(NegotiationSettings {
        auto_send: store.get_or(KEY_AUTO_SEND, defaults.auto_send)?,
        max_price_deviation: store.get_or(KEY_PRICE_DEVIATION, defaults.max_price_deviation)?,
        tone: store.get_or::<Tone>(KEY_TONE, defaults.tone)?,
        role: store.get_or::<Role>(KEY_ROLE, defaults.role)?,
        pickup_address: store.get_or(KEY_ADDRESS, defaults.pickup_address)?,
        address_disclosure_authorized: store
            .get_or(KEY_AUTHORIZE_ADDRESS, defaults.address_disclosure_authorized)?,
    })
}

pub fn save_settings(store: &dyn KvStore, settings: &NegotiationSettings) -> Result<(), StoreError> {
    store.set(KEY_AUTO_SEND, &settings.auto_send)?;
    store.set(KEY_PRICE_DEVIATION, &settings.max_price_deviation)?;
    store.set(KEY_TONE, &settings.tone)?;
    store.set(KEY_ROLE, &settings.role)?;
    store.set(KEY_ADDRESS, &settings.pickup_address)?;
    store.set(KEY_AUTHORIZE_ADDRESS, &settings.address_disclosure_authorized)?;
    Ok(())
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Options-page LLM configuration, with `GEMINI_API_KEY` as a credential fallback.
pub fn load_llm_config(store: &dyn KvStore) -> Result<GeminiConfig, StoreError> {
    let api_key = non_blank(store.get_or(KEY_LLM_API_KEY, String::new())?)
        .or_else(|| std::env::var("GEMINI_API_KEY").ok().and_then(non_blank))
        .unwrap_or_default();
    Ok(GeminiConfig {
        api_key,
        endpoint: non_blank(store.get_or(KEY_LLM_ENDPOINT, String::new())?),
        model: non_blank(store.get_or(KEY_LLM_MODEL, String::new())?)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        system_prompt: non_blank(store.get_or(KEY_LLM_SYSTEM_PROMPT, String::new())?),
    })
}

pub fn load_active_listing(store: &dyn KvStore) -> Result<Option<Listing>, StoreError> {
    store.get_or(KEY_ACTIVE_LISTING, None)
}
