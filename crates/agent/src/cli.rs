//! CLI definitions for negotiagent.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use negotiagent::cmd_settings::{parse_role, parse_tone};
use negotiagent_protocol::{Role, Tone};

#[derive(Parser)]
#[command(name = "negotiagent")]
#[command(about = "Marketplace chat sync and negotiation reply assistant")]
#[command(version)]
pub(crate) struct Cli {
    /// Data directory (default: ~/.negotiagent)
    #[arg(long, global = true, env = "NEGOTIAGENT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the AI relay proxy
    Proxy {
        /// Listen port (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Scan a page file once and print the conversation it holds
    Scan {
        /// Page tree as JSON
        page: PathBuf,
    },

    /// Draft one reply for a FULL_HISTORY record
    Draft {
        /// FULL_HISTORY record as JSON
        history: PathBuf,

        /// Counterparty display name
        #[arg(long)]
        person: Option<String>,

        /// Item description
        #[arg(long)]
        item: Option<String>,
    },

    /// Watch a page file and run the assistant panel against it
    Watch {
        /// Page tree as JSON; rewritten by whatever mirrors the chat
        page: PathBuf,
    },

    /// Inspect or change negotiation settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Manage stored listings
    Listings {
        #[command(subcommand)]
        action: ListingsAction,
    },

    /// Manage recorded negotiation sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
}

impl Commands {
    /// Subcommand name as typed, for log tagging.
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Proxy { .. } => "proxy",
            Commands::Scan { .. } => "scan",
            Commands::Draft { .. } => "draft",
            Commands::Watch { .. } => "watch",
            Commands::Settings { .. } => "settings",
            Commands::Listings { .. } => "listings",
            Commands::Sessions { .. } => "sessions",
        }
    }
}

#[derive(Subcommand)]
pub(crate) enum SettingsAction {
    /// Print current settings
    Show,

    /// Change one or more settings
    Set {
        #[arg(long)]
        auto_send: Option<bool>,

        /// Maximum price deviation (percent)
        #[arg(long)]
        price_deviation: Option<f64>,

        /// friendly, professional or firm
        #[arg(long, value_parser = tone_arg)]
        tone: Option<Tone>,

        /// buyer or seller
        #[arg(long, value_parser = role_arg)]
        role: Option<Role>,

        /// Pickup address
        #[arg(long)]
        address: Option<String>,

        /// Allow the address to be shared
        #[arg(long)]
        authorize_address: Option<bool>,

        /// Gemini API key
        #[arg(long)]
        api_key: Option<String>,

        /// Gemini endpoint base URL
        #[arg(long)]
        endpoint: Option<String>,

        #[arg(long)]
        model: Option<String>,

        /// Replace the built-in system prompt
        #[arg(long)]
        system_prompt: Option<String>,

        /// Listing id to negotiate for; empty clears it
        #[arg(long)]
        active_listing: Option<String>,
    },
}

#[derive(Subcommand)]
pub(crate) enum ListingsAction {
    /// List stored listings
    List,

    /// Add a listing
    Add {
        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        target_price: Option<String>,

        /// Why the target price is fair
        #[arg(long)]
        price_reason: Option<String>,

        #[arg(long)]
        strategy: Option<String>,
    },

    /// Remove a listing
    Remove {
        /// Listing id
        id: String,
    },
}

#[derive(Subcommand)]
pub(crate) enum SessionsAction {
    /// Print recorded sessions
    List,

    /// Remove a session
    Remove {
        /// Session id
        id: String,
    },
}

fn tone_arg(raw: &str) -> Result<Tone, String> {
    parse_tone(raw).map_err(|e| e.to_string())
}

fn role_arg(raw: &str) -> Result<Role, String> {
    parse_role(raw).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_settings_set() {
        let cli = Cli::parse_from([
            "negotiagent",
            "settings",
            "set",
            "--tone",
            "Firm",
            "--auto-send",
            "false",
        ]);
        match cli.command {
            Commands::Settings {
                action: SettingsAction::Set { tone, auto_send, .. },
            } => {
                assert_eq!(tone, Some(Tone::Firm));
                assert_eq!(auto_send, Some(false));
            }
            _ => panic!("expected settings set"),
        }
    }
}
