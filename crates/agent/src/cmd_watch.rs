//! `negotiagent watch <page.json>`: run the page runtime and the panel
//! against a page file.
//!
//! File writes are the mutation feed. Panel events go to stdout as JSON
//! lines. Stdin accepts `confirm`, `rewrite`, `refresh` and `send <text>`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use negotiagent_connectors::ReplyBackend;
use negotiagent_protocol::NegotiationSession;

use crate::channel::{LocalHost, MessagingHost};
use crate::config::RuntimeConfig;
use crate::file_page::FilePage;
use crate::listings::save_session;
use crate::observer::ScrapeProfile;
use crate::page_runtime::PageRuntime;
use crate::panel_actor::{PanelDeps, PanelHandle};
use crate::settings::load_active_listing;
use crate::store::KvStore;
use crate::transition::{PanelEvent, PanelState};

/// A line typed by the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Confirm,
    Rewrite,
    Refresh,
    Send(String),
}

pub fn parse_operator_line(line: &str) -> Option<OperatorCommand> {
    let line = line.trim();
    let (head, rest) = line
        .split_once(char::is_whitespace)
        .map(|(h, r)| (h, r.trim()))
        .unwrap_or((line, ""));
    match head {
        "confirm" | "c" => Some(OperatorCommand::Confirm),
        "rewrite" | "r" => Some(OperatorCommand::Rewrite),
        "refresh" => Some(OperatorCommand::Refresh),
        "send" if !rest.is_empty() => Some(OperatorCommand::Send(rest.to_string())),
        _ => None,
    }
}

/// Upsert this run's negotiation record after a reply goes out.
fn record_session(
    store: &dyn KvStore,
    session_id: &mut Option<String>,
    state: &PanelState,
) -> anyhow::Result<()> {
    let listing_id = load_active_listing(store)?.and_then(|l| l.id);
    let saved = save_session(
        store,
        NegotiationSession {
            id: session_id.clone(),
            listing_id,
            counterparty_name: state.metadata.counterparty_name.clone(),
            turns: state.messages.turns().to_vec(),
        },
    )?;
    *session_id = saved.id;
    Ok(())
}

fn is_page_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    )
}

fn start_file_watcher(
    page: Arc<FilePage>,
    mutations: mpsc::Sender<()>,
) -> anyhow::Result<RecommendedWatcher> {
    let target: PathBuf = page.path().to_path_buf();
    let file_name = target.file_name().map(|n| n.to_os_string());
    let watch_dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if !is_page_event(&event.kind) {
                    return;
                }
                let touches_page = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if !touches_page {
                    return;
                }
                match page.reload() {
                    Ok(true) => {
                        let _ = mutations.try_send(());
                    }
                    Ok(false) => {}
                    // Half-written file; the next write event retries.
                    Err(err) => warn!(
                        component = "watch",
                        event = "watch.reload_failed",
                        error = %err,
                        "Page file unreadable"
                    ),
                }
            }
            Err(err) => warn!(
                component = "watch",
                event = "watch.fs_event_error",
                error = %err,
                "Page watcher event error"
            ),
        },
        notify::Config::default(),
    )?;
    watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

pub async fn run(
    page_path: &Path,
    store: Arc<dyn KvStore>,
    backend: Arc<dyn ReplyBackend>,
    config: RuntimeConfig,
) -> anyhow::Result<()> {
    let page = Arc::new(FilePage::open(page_path)?);
    let to_panel = LocalHost::new("to-panel", config.reply_wait);
    let to_page = LocalHost::new("to-page", config.reply_wait);
    let cancel = CancellationToken::new();

    let (panel, panel_task) = PanelHandle::spawn(
        PanelDeps {
            store: store.clone(),
            backend,
            to_page: Arc::new(to_page.clone()),
            config: config.clone(),
        },
        to_panel.subscribe()?,
        cancel.clone(),
    )?;

    let (mutation_tx, mutation_rx) = mpsc::channel(64);
    let _watcher = start_file_watcher(page.clone(), mutation_tx)?;

    let runtime = PageRuntime::new(
        page.clone(),
        Arc::new(to_panel.clone()),
        Arc::new(to_page.clone()),
        ScrapeProfile::default(),
        config,
    );
    let runtime_task = tokio::spawn(runtime.run(mutation_rx, cancel.clone()));

    info!(
        component = "watch",
        event = "watch.started",
        page = %page.path().display(),
        outbox = %page.outbox().display(),
        "Watching page file"
    );
    eprintln!(
        "Watching {} (replies go to {}). Commands: confirm, rewrite, refresh, send <text>",
        page.path().display(),
        page.outbox().display()
    );

    let mut events = panel.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut session_id = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    if matches!(event, PanelEvent::Sent { .. }) {
                        if let Err(err) = record_session(store.as_ref(), &mut session_id, &panel.snapshot()) {
                            warn!(component = "watch", error = %err, "Failed to record session");
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(component = "watch", skipped = n, "Event output lagged");
                }
                Err(_) => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => match parse_operator_line(&line) {
                    Some(OperatorCommand::Confirm) => panel.confirm_draft().await,
                    Some(OperatorCommand::Rewrite) => panel.rewrite_draft().await,
                    Some(OperatorCommand::Refresh) => panel.refresh().await,
                    Some(OperatorCommand::Send(text)) => panel.manual_send(text).await,
                    None if line.trim().is_empty() => {}
                    None => eprintln!("Unknown command: {}", line.trim()),
                },
                None => stdin_open = false,
            },
        }
    }

    cancel.cancel();
    let _ = runtime_task.await;
    let _ = panel_task.await;
    to_page.invalidate();
    info!(component = "watch", event = "watch.stopped", "Watch stopped");
    Ok(())
}
