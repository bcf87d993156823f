//! negotiagent
//!
//! Entry point: resolves the data dir, starts logging, opens the store and
//! dispatches to the subcommand.

mod cli;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use negotiagent::backend::build_backend;
use negotiagent::cmd_settings::SettingsUpdate;
use negotiagent::config::RuntimeConfig;
use negotiagent::logging::init_logging;
use negotiagent::paths;
use negotiagent::proxy_server::{self, ProxyConfig};
use negotiagent::store::{KvStore, SqliteStore};
use negotiagent::{cmd_draft, cmd_listings, cmd_scan, cmd_settings, cmd_watch};
use negotiagent_protocol::{ConversationMetadata, Listing};

use crate::cli::{Cli, Commands, ListingsAction, SessionsAction, SettingsAction};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    paths::init_data_dir(cli.data_dir.as_deref());
    paths::ensure_dirs()?;
    let logging = init_logging(cli.command.name())?;
    info!(
        component = "main",
        event = "main.start",
        run_id = %logging.run_id,
        command = logging.command,
        version = negotiagent::VERSION,
        data_dir = %paths::data_dir().display(),
        "Starting negotiagent"
    );

    match cli.command {
        Commands::Proxy { port } => {
            let mut config = ProxyConfig::from_env();
            if let Some(port) = port {
                config.port = port;
            }
            let cancel = CancellationToken::new();
            let shutdown = cancel.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                shutdown.cancel();
            });
            proxy_server::serve(config, cancel).await
        }
        Commands::Scan { page } => cmd_scan::run(&page),
        Commands::Draft {
            history,
            person,
            item,
        } => {
            let store = open_store()?;
            let backend = build_backend(store.as_ref())?;
            let metadata = ConversationMetadata {
                counterparty_name: person,
                item_description: item,
            };
            cmd_draft::run(store.as_ref(), backend.as_ref(), &history, metadata).await
        }
        Commands::Watch { page } => {
            let store = open_store()?;
            let backend = build_backend(store.as_ref())?;
            cmd_watch::run(&page, store, backend, RuntimeConfig::from_env()).await
        }
        Commands::Settings { action } => {
            let store = open_store()?;
            match action {
                SettingsAction::Show => cmd_settings::show(store.as_ref()),
                SettingsAction::Set {
                    auto_send,
                    price_deviation,
                    tone,
                    role,
                    address,
                    authorize_address,
                    api_key,
                    endpoint,
                    model,
                    system_prompt,
                    active_listing,
                } => cmd_settings::set(
                    store.as_ref(),
                    SettingsUpdate {
                        auto_send,
                        price_deviation,
                        tone,
                        role,
                        address,
                        authorize_address,
                        api_key,
                        endpoint,
                        model,
                        system_prompt,
                        active_listing,
                    },
                ),
            }
        }
        Commands::Listings { action } => {
            let store = open_store()?;
            match action {
                ListingsAction::List => cmd_listings::list(store.as_ref()),
                ListingsAction::Add {
                    title,
                    url,
                    target_price,
                    price_reason,
                    strategy,
                } => cmd_listings::add(
                    store.as_ref(),
                    Listing {
                        id: None,
                        title,
                        page_url: url,
                        target_price,
                        price_reason,
                        strategy,
                    },
                ),
                ListingsAction::Remove { id } => cmd_listings::remove(store.as_ref(), &id),
            }
        }
        Commands::Sessions { action } => {
            let store = open_store()?;
            match action {
                SessionsAction::List => cmd_listings::list_sessions(store.as_ref()),
                SessionsAction::Remove { id } => cmd_listings::remove_session(store.as_ref(), &id),
            }
        }
    }
}

fn open_store() -> anyhow::Result<Arc<dyn KvStore>> {
    Ok(Arc::new(SqliteStore::open(&paths::db_path())?))
}
