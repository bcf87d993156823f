//! `negotiagent settings show|set`: inspect or change stored settings.

use anyhow::{anyhow, bail};
use negotiagent_protocol::{NegotiationSettings, Role, Tone};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::listings::get_listings;
use crate::settings::{
    load_active_listing, load_llm_config, load_settings, save_settings, KEY_ACTIVE_LISTING,
    KEY_LLM_API_KEY, KEY_LLM_ENDPOINT, KEY_LLM_MODEL, KEY_LLM_SYSTEM_PROMPT,
};
use crate::store::{KvStore, KvStoreExt};

/// Requested changes; `None` leaves a field untouched.
#[derive(Debug, Default, Clone)]
pub struct SettingsUpdate {
    pub auto_send: Option<bool>,
    pub price_deviation: Option<f64>,
    pub tone: Option<Tone>,
    pub role: Option<Role>,
    pub address: Option<String>,
    pub authorize_address: Option<bool>,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub active_listing: Option<String>,
}

fn parse_wire<T: DeserializeOwned>(raw: &str, what: &str) -> anyhow::Result<T> {
    serde_json::from_value(Value::String(raw.trim().to_ascii_lowercase()))
        .map_err(|_| anyhow!("unknown {}: {}", what, raw))
}

pub fn parse_tone(raw: &str) -> anyhow::Result<Tone> {
    parse_wire(raw, "tone")
}

pub fn parse_role(raw: &str) -> anyhow::Result<Role> {
    parse_wire(raw, "role")
}

pub fn show(store: &dyn KvStore) -> anyhow::Result<()> {
    let settings = load_settings(store)?;
    let llm = load_llm_config(store)?;
    let report = json!({
        "settings": settings,
        "llm": {
            "model": llm.model,
            "endpoint": llm.endpoint,
            "apiKeySet": !llm.api_key.is_empty(),
            "customSystemPrompt": llm.system_prompt.is_some(),
        },
        "activeListing": load_active_listing(store)?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn apply(store: &dyn KvStore, update: SettingsUpdate) -> anyhow::Result<NegotiationSettings> {
    if update.price_deviation.is_some_and(|d| !d.is_finite() || d < 0.0) {
        bail!("price deviation must be a non-negative number");
    }

    let mut settings = load_settings(store)?;
    if let Some(v) = update.auto_send {
        settings.auto_send = v;
    }
    if let Some(v) = update.price_deviation {
        settings.max_price_deviation = v;
    }
    if let Some(v) = update.tone {
        settings.tone = v;
    }
    if let Some(v) = update.role {
        settings.role = v;
    }
    if let Some(v) = update.address {
        settings.pickup_address = v;
    }
    if let Some(v) = update.authorize_address {
        settings.address_disclosure_authorized = v;
    }
    save_settings(store, &settings)?;

    for (key, value) in [
        (KEY_LLM_API_KEY, update.api_key),
        (KEY_LLM_ENDPOINT, update.endpoint),
        (KEY_LLM_MODEL, update.model),
        (KEY_LLM_SYSTEM_PROMPT, update.system_prompt),
    ] {
        if let Some(value) = value {
            store.set(key, &value)?;
        }
    }

    if let Some(id) = update.active_listing {
        if id.is_empty() {
            store.set_raw(KEY_ACTIVE_LISTING, Value::Null)?;
        } else {
            let listing = get_listings(store)?
                .into_iter()
                .find(|l| l.id.as_deref() == Some(id.as_str()))
                .ok_or_else(|| anyhow!("no listing with id {}", id))?;
            store.set(KEY_ACTIVE_LISTING, &listing)?;
        }
    }

    Ok(settings)
}

pub fn set(store: &dyn KvStore, update: SettingsUpdate) -> anyhow::Result<()> {
    let settings = apply(store, update)?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
