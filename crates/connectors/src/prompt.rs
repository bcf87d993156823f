//! Prompt construction and redaction.

use std::sync::LazyLock;

use negotiagent_protocol::{Role, Tone};
use regex::Regex;

use crate::ReplyRequest;

/// How many trailing turns are quoted back to the model.
pub const HISTORY_WINDOW: usize = 20;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a negotiation assistant for a marketplace user. Be concise, polite, and persuasive.";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").expect("valid email regex")
});

/// International numbers with a `+` prefix, or ten-digit numbers in
/// 3-3-4 groups. Bare digit runs such as street and unit numbers stay.
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\+\d{1,3}[ .-]?(?:\(\d{1,4}\)[ .-]?)?\d[\d .-]{5,}\d|(?:\(\d{3}\)|\b\d{3})[ .-]?\d{3}[ .-]?\d{4}\b",
    )
    .expect("valid phone regex")
});

/// System and user halves of a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Single-string form for backends without a separate system slot.
    pub fn flatten(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }

    pub fn redacted(&self) -> Prompt {
        Prompt {
            system: redact(&self.system),
            user: redact(&self.user),
        }
    }
}

/// Replace email- and phone-like tokens.
pub fn redact(text: &str) -> String {
    let text = EMAIL_RE.replace_all(text, "[REDACTED_EMAIL]");
    PHONE_RE.replace_all(&text, "[REDACTED_PHONE]").into_owned()
}

fn tone_label(tone: Tone) -> &'static str {
    match tone {
        Tone::Friendly => "friendly",
        Tone::Professional => "professional",
        Tone::Firm => "firm",
    }
}

fn role_label(role: Role) -> (&'static str, &'static str) {
    match role {
        Role::Buyer => ("buyer", "seller"),
        Role::Seller => ("seller", "buyer"),
    }
}

pub fn build_prompt(request: &ReplyRequest, custom_system: Option<&str>) -> Prompt {
    let system = custom_system
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SYSTEM_PROMPT)
        .to_string();

    let settings = &request.settings;
    let (me, them) = role_label(settings.role);
    let item = request
        .metadata
        .item_description
        .as_deref()
        .unwrap_or("Unknown item");
    let counterparty = request
        .metadata
        .counterparty_name
        .as_deref()
        .unwrap_or(them);

    let skip = request
        .conversation_history
        .len()
        .saturating_sub(HISTORY_WINDOW);
    let history = request
        .conversation_history
        .iter()
        .skip(skip)
        .map(|turn| format!("{}: {}", turn.sender().label(), turn.text()))
        .collect::<Vec<_>>()
        .join("\n");

    let mut context = vec![
        format!("- Item: {}", item),
        format!("- Counterparty ({}): {}", them, counterparty),
        format!("- You are the {}", me),
        format!("- Tone: {}", tone_label(settings.tone)),
        format!(
            "- Maximum price deviation: +/- ${}",
            settings.max_price_deviation
        ),
    ];
    match settings.disclosable_address() {
        Some(address) => context.push(format!(
            "- Pickup address (may be shared when pickup is agreed): {}",
            address
        )),
        None => context.push("- Never reveal a pickup address".to_string()),
    }
    if let Some(listing) = &request.listing {
        if let Some(title) = &listing.title {
            context.push(format!("- Listing: {}", title));
        }
        if let Some(price) = &listing.target_price {
            context.push(format!("- Target price: {}", price));
        }
        if let Some(reason) = &listing.price_reason {
            context.push(format!("- Price reasoning: {}", reason));
        }
        if let Some(strategy) = &listing.strategy {
            context.push(format!("- Strategy: {}", strategy));
        }
    }

    let user = format!(
        "Context:\n{}\n\nChat history:\n{}\n\nTask: write the single best reply for ME to send next. \
Stay within the allowed price deviation. Output ONLY a JSON array with one element: \
[{{\"label\": \"Reply\", \"text\": \"...\"}}]",
        context.join("\n"),
        if history.is_empty() { "(none)" } else { history.as_str() },
    );

    Prompt { system, user }
}
