//! Commands sent to the panel actor from UI callers and spawned tasks.

use negotiagent_protocol::NegotiationSettings;
use tokio::sync::oneshot;

use crate::transition::{Input, PanelState};

pub enum PanelCommand {
    // -- Queries --
    GetState {
        reply: oneshot::Sender<PanelState>,
    },

    // -- User actions --
    ConfirmDraft,
    RewriteDraft,
    ManualSend {
        text: String,
    },
    Refresh,
    UpdateSettings {
        settings: NegotiationSettings,
    },

    // -- Results from spawned effect tasks --
    Completed(Input),
}

impl PanelCommand {
    /// The transition input this command feeds, if any.
    pub fn into_input(self) -> Result<Input, Self> {
        match self {
            PanelCommand::ConfirmDraft => Ok(Input::ConfirmDraft),
            PanelCommand::RewriteDraft => Ok(Input::RewriteRequested),
            PanelCommand::ManualSend { text } => Ok(Input::ManualSend { text }),
            PanelCommand::Refresh => Ok(Input::Refresh),
            PanelCommand::UpdateSettings { settings } => Ok(Input::SettingsChanged(settings)),
            PanelCommand::Completed(input) => Ok(input),
            other @ PanelCommand::GetState { .. } => Err(other),
        }
    }
}
