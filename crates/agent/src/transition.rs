//! Pure panel state transition function
//!
//! All panel business logic lives here as a pure, synchronous function:
//! `transition(state, input) -> (state, effects)`.
//! No IO, no async, no locking. The actor executes the returned effects.

use negotiagent_protocol::{
    ConversationMetadata, ConversationSnapshot, NegotiationSettings, Signature,
};
use serde::Serialize;

pub const COMPOSER_NOT_FOUND_NOTICE: &str =
    "Chat input not found. Copy the draft and paste it into the chat manually.";

// ---------------------------------------------------------------------------
// PanelPhase: reply workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PanelPhase {
    Idle,
    Generating,
    Drafted { text: String },
}

impl PanelPhase {
    pub fn label(&self) -> &'static str {
        match self {
            PanelPhase::Idle => "idle",
            PanelPhase::Generating => "generating",
            PanelPhase::Drafted { .. } => "drafted",
        }
    }
}

// ---------------------------------------------------------------------------
// PanelState: pure data snapshot of the panel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelState {
    pub messages: ConversationSnapshot,
    pub metadata: ConversationMetadata,
    pub settings: NegotiationSettings,
    pub phase: PanelPhase,
    /// Signature of the snapshot that last started a generation.
    pub last_triggered: Option<Signature>,
    pub last_error: Option<String>,
    pub notice: Option<String>,
    /// True once any page message has been received.
    pub connected: bool,
}

impl PanelState {
    pub fn new(settings: NegotiationSettings) -> Self {
        Self {
            messages: ConversationSnapshot::default(),
            metadata: ConversationMetadata::default(),
            settings,
            phase: PanelPhase::Idle,
            last_triggered: None,
            last_error: None,
            notice: None,
            connected: false,
        }
    }

    pub fn draft(&self) -> Option<&str> {
        match &self.phase {
            PanelPhase::Drafted { text } => Some(text),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Input / Effect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    HistoryReceived(ConversationSnapshot),
    MetadataReceived(ConversationMetadata),
    /// `auto_send` echoes the mode the generation was started in.
    GenerationSucceeded {
        text: String,
        auto_send: bool,
    },
    GenerationFailed {
        error: String,
    },
    ConfirmDraft,
    RewriteRequested,
    ManualSend {
        text: String,
    },
    InjectionSucceeded {
        clicked_send: bool,
    },
    InjectionFailed {
        text: String,
        notice: String,
    },
    SettingsChanged(NegotiationSettings),
    Refresh,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectOrigin {
    Auto,
    Confirmed,
    Manual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub history: ConversationSnapshot,
    pub metadata: ConversationMetadata,
    pub settings: NegotiationSettings,
    /// Delay like a human and send directly instead of drafting.
    pub auto_send: bool,
}

/// Notifications for UI subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelEvent {
    MessagesUpdated { count: usize },
    MetadataUpdated { metadata: ConversationMetadata },
    PhaseChanged { phase: PanelPhase },
    Error { message: String },
    Notice { message: String },
    Sent { text: String, origin: InjectOrigin },
    SettingsUpdated { settings: NegotiationSettings },
    ConnectionChanged { connected: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartGeneration(GenerationRequest),
    Inject { text: String, origin: InjectOrigin },
    PersistSettings(NegotiationSettings),
    RequestHistory,
    Emit(PanelEvent),
}

// ---------------------------------------------------------------------------
// transition
// ---------------------------------------------------------------------------

pub fn transition(mut state: PanelState, input: Input) -> (PanelState, Vec<Effect>) {
    let mut effects = Vec::new();
    let before = state.phase.clone();

    match input {
        Input::HistoryReceived(snapshot) => {
            mark_connected(&mut state, &mut effects);
            if snapshot.is_empty() {
                return (state, effects);
            }
            state.messages = snapshot;
            effects.push(Effect::Emit(PanelEvent::MessagesUpdated {
                count: state.messages.len(),
            }));
            trigger_if_awaiting(&mut state, &mut effects);
        }

        Input::MetadataReceived(metadata) => {
            mark_connected(&mut state, &mut effects);
            if state.metadata != metadata {
                state.metadata = metadata.clone();
                effects.push(Effect::Emit(PanelEvent::MetadataUpdated { metadata }));
            }
        }

        Input::GenerationSucceeded { text, auto_send } => {
            if state.phase != PanelPhase::Generating {
                return (state, effects);
            }
            let text = text.trim().to_string();
            if text.is_empty() {
                fail_generation(&mut state, &mut effects, "AI returned no suggestions".into());
            } else if auto_send {
                state.phase = PanelPhase::Idle;
                effects.push(Effect::Inject {
                    text: text.clone(),
                    origin: InjectOrigin::Auto,
                });
                effects.push(Effect::Emit(PanelEvent::Sent {
                    text,
                    origin: InjectOrigin::Auto,
                }));
                trigger_if_awaiting(&mut state, &mut effects);
            } else {
                state.phase = PanelPhase::Drafted { text };
            }
        }

        Input::GenerationFailed { error } => {
            if state.phase == PanelPhase::Generating {
                fail_generation(&mut state, &mut effects, error);
                trigger_if_awaiting(&mut state, &mut effects);
            }
        }

        Input::ConfirmDraft => {
            if let PanelPhase::Drafted { text } = &state.phase {
                let text = text.clone();
                state.phase = PanelPhase::Idle;
                state.notice = None;
                effects.push(Effect::Inject {
                    text: text.clone(),
                    origin: InjectOrigin::Confirmed,
                });
                effects.push(Effect::Emit(PanelEvent::Sent {
                    text,
                    origin: InjectOrigin::Confirmed,
                }));
                trigger_if_awaiting(&mut state, &mut effects);
            }
        }

        Input::RewriteRequested => {
            if matches!(state.phase, PanelPhase::Drafted { .. }) {
                state.notice = None;
                effects.push(start_generation(&mut state, false));
            }
        }

        Input::ManualSend { text } => {
            let text = text.trim().to_string();
            if !text.is_empty() {
                effects.push(Effect::Inject {
                    text: text.clone(),
                    origin: InjectOrigin::Manual,
                });
                effects.push(Effect::Emit(PanelEvent::Sent {
                    text,
                    origin: InjectOrigin::Manual,
                }));
            }
        }

        Input::InjectionSucceeded { .. } => {
            state.notice = None;
        }

        Input::InjectionFailed { text, notice } => {
            // A newer generation or draft owns the phase; only report.
            if state.phase == PanelPhase::Idle {
                state.phase = PanelPhase::Drafted { text };
            }
            state.notice = Some(notice.clone());
            effects.push(Effect::Emit(PanelEvent::Notice { message: notice }));
        }

        Input::SettingsChanged(settings) => {
            state.settings = settings.clone();
            effects.push(Effect::PersistSettings(settings.clone()));
            effects.push(Effect::Emit(PanelEvent::SettingsUpdated { settings }));
        }

        Input::Refresh => {
            effects.push(Effect::RequestHistory);
        }

        Input::Disconnected => {
            if state.connected {
                state.connected = false;
                effects.push(Effect::Emit(PanelEvent::ConnectionChanged { connected: false }));
            }
        }
    }

    if state.phase != before {
        effects.push(Effect::Emit(PanelEvent::PhaseChanged {
            phase: state.phase.clone(),
        }));
    }
    (state, effects)
}

fn mark_connected(state: &mut PanelState, effects: &mut Vec<Effect>) {
    if !state.connected {
        state.connected = true;
        effects.push(Effect::Emit(PanelEvent::ConnectionChanged { connected: true }));
    }
}

/// Start a generation when Idle and the latest snapshot ends with an
/// unanswered counterparty turn that has not triggered one yet.
///
/// Runs on every arrival and on every return to Idle, so turns that landed
/// while a generation or draft was pending are still answered.
fn trigger_if_awaiting(state: &mut PanelState, effects: &mut Vec<Effect>) {
    if state.phase != PanelPhase::Idle || !state.messages.awaits_reply() {
        return;
    }
    let signature = state.messages.signature();
    if state.last_triggered.as_ref() == Some(&signature) {
        return;
    }
    state.last_triggered = Some(signature);
    let auto_send = state.settings.auto_send;
    effects.push(start_generation(state, auto_send));
}

fn start_generation(state: &mut PanelState, auto_send: bool) -> Effect {
    state.phase = PanelPhase::Generating;
    state.last_error = None;
    Effect::StartGeneration(GenerationRequest {
        history: state.messages.clone(),
        metadata: state.metadata.clone(),
        settings: state.settings.clone(),
        auto_send,
    })
}

fn fail_generation(state: &mut PanelState, effects: &mut Vec<Effect>, error: String) {
    state.phase = PanelPhase::Idle;
    state.last_error = Some(error.clone());
    effects.push(Effect::Emit(PanelEvent::Error { message: error }));
}
