//! Panel actor: owns the panel state and processes inputs sequentially.
//!
//! Page messages arrive through a channel [`Subscription`]; UI callers and
//! spawned effect tasks talk to the actor through `PanelHandle`, which sends
//! `PanelCommand` messages over an mpsc channel. Lock-free reads go through
//! `ArcSwap`.

use std::sync::Arc;

use arc_swap::ArcSwap;
use negotiagent_connectors::{ReplyBackend, ReplyRequest};
use negotiagent_protocol::{ChannelMessage, ChannelReply, NegotiationSettings};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, MessagingHost, Subscription};
use crate::config::RuntimeConfig;
use crate::panel_command::PanelCommand;
use crate::settings::{load_active_listing, load_settings, save_settings};
use crate::store::{KvStore, StoreError};
use crate::transition::{
    transition, Effect, GenerationRequest, InjectOrigin, Input, PanelEvent, PanelState,
    COMPOSER_NOT_FOUND_NOTICE,
};

/// Collaborators the actor needs to run effects
#[derive(Clone)]
pub struct PanelDeps {
    pub store: Arc<dyn KvStore>,
    pub backend: Arc<dyn ReplyBackend>,
    pub to_page: Arc<dyn MessagingHost>,
    pub config: RuntimeConfig,
}

/// Handle to a running panel actor (cheap to Clone).
#[derive(Clone)]
pub struct PanelHandle {
    command_tx: mpsc::Sender<PanelCommand>,
    snapshot: Arc<ArcSwap<PanelState>>,
    events: broadcast::Sender<PanelEvent>,
}

impl PanelHandle {
    /// Load settings, spawn the actor, and request history from the page.
    pub fn spawn(
        deps: PanelDeps,
        from_page: Subscription,
        cancel: CancellationToken,
    ) -> Result<(PanelHandle, JoinHandle<()>), StoreError> {
        let settings = load_settings(deps.store.as_ref())?;
        let state = PanelState::new(settings);

        let (command_tx, command_rx) = mpsc::channel(256);
        let (events, _) = broadcast::channel(256);
        let snapshot = Arc::new(ArcSwap::from_pointee(state.clone()));

        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(SettingsWriter::new(persist_rx, deps.store.clone()).run());

        let actor = PanelActor {
            state,
            deps,
            persist_tx,
            command_tx: command_tx.clone(),
            snapshot: snapshot.clone(),
            events: events.clone(),
        };
        let task = tokio::spawn(actor.run(command_rx, from_page, cancel));

        Ok((
            PanelHandle {
                command_tx,
                snapshot,
                events,
            },
            task,
        ))
    }

    /// Send a command to the actor (fire-and-forget).
    pub async fn send(&self, cmd: PanelCommand) {
        if self.command_tx.send(cmd).await.is_err() {
            warn!(
                component = "panel_actor",
                "Actor channel closed, command dropped"
            );
        }
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<PanelState> {
        self.snapshot.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.events.subscribe()
    }

    /// State as seen after every command queued before this call.
    pub async fn state(&self) -> Option<PanelState> {
        let (reply, rx) = oneshot::channel();
        self.send(PanelCommand::GetState { reply }).await;
        rx.await.ok()
    }

    pub async fn confirm_draft(&self) {
        self.send(PanelCommand::ConfirmDraft).await;
    }

    pub async fn rewrite_draft(&self) {
        self.send(PanelCommand::RewriteDraft).await;
    }

    pub async fn manual_send(&self, text: impl Into<String>) {
        self.send(PanelCommand::ManualSend { text: text.into() })
            .await;
    }

    pub async fn refresh(&self) {
        self.send(PanelCommand::Refresh).await;
    }

    pub async fn update_settings(&self, settings: NegotiationSettings) {
        self.send(PanelCommand::UpdateSettings { settings }).await;
    }
}

/// Applies settings writes one at a time, in the order they were queued.
///
/// Ends once the actor drops its sender and the queue is drained.
struct SettingsWriter {
    rx: mpsc::UnboundedReceiver<NegotiationSettings>,
    store: Arc<dyn KvStore>,
}

impl SettingsWriter {
    fn new(rx: mpsc::UnboundedReceiver<NegotiationSettings>, store: Arc<dyn KvStore>) -> Self {
        Self { rx, store }
    }

    async fn run(mut self) {
        while let Some(mut settings) = self.rx.recv().await {
            // Only the newest queued value needs to reach the store.
            while let Ok(newer) = self.rx.try_recv() {
                settings = newer;
            }
            let store = self.store.clone();
            let result =
                tokio::task::spawn_blocking(move || save_settings(store.as_ref(), &settings))
                    .await;
            match result {
                Ok(Ok(())) => debug!(component = "panel_actor", "Settings persisted"),
                Ok(Err(err)) => warn!(
                    component = "panel_actor",
                    event = "panel.settings_persist_failed",
                    error = %err,
                    "Failed to persist settings"
                ),
                Err(err) => warn!(
                    component = "panel_actor",
                    event = "panel.settings_persist_failed",
                    error = %err,
                    "Settings write task failed"
                ),
            }
        }
    }
}

struct PanelActor {
    state: PanelState,
    deps: PanelDeps,
    persist_tx: mpsc::UnboundedSender<NegotiationSettings>,
    command_tx: mpsc::Sender<PanelCommand>,
    snapshot: Arc<ArcSwap<PanelState>>,
    events: broadcast::Sender<PanelEvent>,
}

impl PanelActor {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<PanelCommand>,
        mut inbox: Subscription,
        cancel: CancellationToken,
    ) {
        info!(
            component = "panel_actor",
            event = "panel.started",
            auto_send = self.state.settings.auto_send,
            "Panel started"
        );
        self.apply(Input::Refresh);

        let mut inbox_open = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = command_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                envelope = inbox.recv(), if inbox_open => match envelope {
                    Some(mut envelope) => {
                        envelope.respond(ChannelReply::Ack);
                        match envelope.message {
                            ChannelMessage::FullHistory { messages } => {
                                self.apply(Input::HistoryReceived(messages));
                            }
                            ChannelMessage::Metadata { metadata } => {
                                self.apply(Input::MetadataReceived(metadata));
                            }
                            other => debug!(
                                component = "panel_actor",
                                kind = other.kind(),
                                "Ignoring panel-bound message"
                            ),
                        }
                    }
                    None => {
                        inbox_open = false;
                        self.apply(Input::Disconnected);
                    }
                },
            }
        }

        info!(component = "panel_actor", event = "panel.stopped", "Panel stopped");
    }

    fn handle_command(&mut self, cmd: PanelCommand) {
        match cmd.into_input() {
            Ok(input) => self.apply(input),
            Err(PanelCommand::GetState { reply }) => {
                let _ = reply.send(self.state.clone());
            }
            Err(_) => {}
        }
    }

    fn apply(&mut self, input: Input) {
        let (next, effects) = transition(self.state.clone(), input);
        if next.phase != self.state.phase {
            info!(
                component = "panel_actor",
                event = "panel.phase_changed",
                from = self.state.phase.label(),
                to = next.phase.label(),
                "Panel phase changed"
            );
        }
        self.state = next;
        self.snapshot.store(Arc::new(self.state.clone()));

        for effect in effects {
            self.run_effect(effect);
        }
    }

    fn run_effect(&self, effect: Effect) {
        match effect {
            Effect::StartGeneration(request) => self.spawn_generation(request),
            Effect::Inject { text, origin } => self.spawn_injection(text, origin),
            Effect::PersistSettings(settings) => {
                if self.persist_tx.send(settings).is_err() {
                    warn!(
                        component = "panel_actor",
                        event = "panel.settings_persist_failed",
                        "Settings writer stopped"
                    );
                }
            }
            Effect::RequestHistory => {
                let to_page = self.deps.to_page.clone();
                tokio::spawn(async move {
                    match to_page.send(ChannelMessage::GetHistory).await {
                        Ok(_) => {}
                        Err(ChannelError::NoListener) => debug!(
                            component = "panel_actor",
                            "No page attached for history request"
                        ),
                        Err(err) => warn!(
                            component = "panel_actor",
                            error = %err,
                            "History request failed"
                        ),
                    }
                });
            }
            Effect::Emit(event) => {
                // No subscribers is fine.
                let _ = self.events.send(event);
            }
        }
    }

    fn spawn_generation(&self, request: GenerationRequest) {
        let backend = self.deps.backend.clone();
        let store = self.deps.store.clone();
        let tx = self.command_tx.clone();
        let pause = request
            .auto_send
            .then(|| self.deps.config.sample_human_delay());

        tokio::spawn(async move {
            let listing = match tokio::task::spawn_blocking(move || {
                load_active_listing(store.as_ref())
            })
            .await
            {
                Ok(Ok(listing)) => listing,
                Ok(Err(err)) => {
                    warn!(component = "panel_actor", error = %err, "Active listing unreadable");
                    None
                }
                Err(err) => {
                    warn!(component = "panel_actor", error = %err, "Listing load task failed");
                    None
                }
            };

            let reply_request = ReplyRequest {
                conversation_history: request.history.turns().to_vec(),
                metadata: request.metadata,
                settings: request.settings,
                listing,
            };

            let input = match backend.generate(&reply_request).await {
                Ok(reply) => {
                    info!(
                        component = "panel_actor",
                        event = "panel.generation_succeeded",
                        backend = backend.name(),
                        auto_send = request.auto_send,
                        "Reply generated"
                    );
                    if let Some(pause) = pause {
                        tokio::time::sleep(pause).await;
                    }
                    Input::GenerationSucceeded {
                        text: reply.text,
                        auto_send: request.auto_send,
                    }
                }
                Err(err) => {
                    warn!(
                        component = "panel_actor",
                        event = "panel.generation_failed",
                        backend = backend.name(),
                        kind = ?err.kind(),
                        error = %err,
                        "Reply generation failed"
                    );
                    Input::GenerationFailed {
                        error: err.to_string(),
                    }
                }
            };
            let _ = tx.send(PanelCommand::Completed(input)).await;
        });
    }

    fn spawn_injection(&self, text: String, origin: InjectOrigin) {
        let to_page = self.deps.to_page.clone();
        let tx = self.command_tx.clone();

        tokio::spawn(async move {
            let result = to_page
                .send(ChannelMessage::InsertText { text: text.clone() })
                .await;
            let input = match result {
                Ok(Some(ChannelReply::Injected { clicked_send })) => {
                    Input::InjectionSucceeded { clicked_send }
                }
                Ok(Some(ChannelReply::ComposerNotFound)) => Input::InjectionFailed {
                    text,
                    notice: COMPOSER_NOT_FOUND_NOTICE.to_string(),
                },
                Ok(Some(ChannelReply::Failed { reason })) => Input::InjectionFailed {
                    text,
                    notice: format!("Could not send the reply: {}", reason),
                },
                Ok(Some(ChannelReply::Ack)) | Ok(None) => {
                    Input::InjectionSucceeded { clicked_send: false }
                }
                Err(err) => Input::InjectionFailed {
                    text,
                    notice: format!("Chat page unavailable: {}", err),
                },
            };
            info!(
                component = "panel_actor",
                event = "panel.injection_result",
                origin = ?origin,
                ok = matches!(input, Input::InjectionSucceeded { .. }),
                "Injection finished"
            );
            let _ = tx.send(PanelCommand::Completed(input)).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LocalHost;
    use crate::observer::tests::chat;
    use crate::observer::ScrapeProfile;
    use crate::page::{Element, MemoryPage};
    use crate::page_runtime::PageRuntime;
    use crate::settings::KEY_AUTO_SEND;
    use crate::store::{KvStoreExt, MemoryStore};
    use crate::transition::PanelPhase;
    use async_trait::async_trait;
    use negotiagent_connectors::{BackendError, ReplyText};
    use negotiagent_protocol::{ChatTurn, ConversationSnapshot, Party};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Responder = dyn Fn(&ReplyRequest) -> Result<ReplyText, BackendError> + Send + Sync;

    struct ScriptedBackend {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        latency: Duration,
        respond: Box<Responder>,
    }

    impl ScriptedBackend {
        fn new(
            latency: Duration,
            respond: impl Fn(&ReplyRequest) -> Result<ReplyText, BackendError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                latency,
                respond: Box::new(respond),
            })
        }

        fn replying(text: &'static str) -> Arc<Self> {
            Self::new(Duration::from_millis(20), move |_| {
                Ok(ReplyText {
                    text: text.to_string(),
                    label: None,
                })
            })
        }
    }

    #[async_trait]
    impl ReplyBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn generate(&self, request: &ReplyRequest) -> Result<ReplyText, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            (self.respond)(request)
        }
    }

    struct Panel {
        handle: PanelHandle,
        to_panel: LocalHost,
        to_page: LocalHost,
        store: Arc<MemoryStore>,
        cancel: CancellationToken,
    }

    fn start_panel(backend: Arc<ScriptedBackend>, auto_send: bool) -> Panel {
        let store = Arc::new(MemoryStore::new());
        store.set(KEY_AUTO_SEND, &auto_send).unwrap();
        let config = RuntimeConfig::immediate();
        let to_panel = LocalHost::new("to-panel", config.reply_wait);
        let to_page = LocalHost::new("to-page", config.reply_wait);
        let cancel = CancellationToken::new();
        let (handle, _task) = PanelHandle::spawn(
            PanelDeps {
                store: store.clone(),
                backend,
                to_page: Arc::new(to_page.clone()),
                config,
            },
            to_panel.subscribe().unwrap(),
            cancel.clone(),
        )
        .unwrap();
        Panel {
            handle,
            to_panel,
            to_page,
            store,
            cancel,
        }
    }

    fn start_page(panel: &Panel, doc: Element) -> Arc<MemoryPage> {
        let page = Arc::new(MemoryPage::new(doc));
        let runtime = PageRuntime::new(
            page.clone(),
            Arc::new(panel.to_panel.clone()),
            Arc::new(panel.to_page.clone()),
            ScrapeProfile::default(),
            RuntimeConfig::immediate(),
        );
        let (_mutations, mutation_rx) = tokio::sync::mpsc::channel(1);
        tokio::spawn(runtime.run(mutation_rx, panel.cancel.clone()));
        page
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn composer() -> Element {
        Element::new("div")
            .with_id("composer")
            .with_attr("role", "textbox")
            .with_attr("contenteditable", "true")
    }

    fn history(turns: &[(&str, Party)]) -> ChannelMessage {
        ChannelMessage::FullHistory {
            messages: turns
                .iter()
                .filter_map(|(t, p)| ChatTurn::new(*t, *p))
                .collect::<ConversationSnapshot>(),
        }
    }

    #[tokio::test]
    async fn draft_then_confirm_reaches_the_page() {
        let backend = ScriptedBackend::replying("Yes, it is! Want to pick it up today?");
        let panel = start_panel(backend.clone(), false);
        let page = start_page(
            &panel,
            chat(&[("Is this available?", "them")]).with_child(composer()),
        );

        wait_for(|| panel.handle.snapshot().draft().is_some()).await;
        let snap = panel.handle.snapshot();
        assert_eq!(snap.messages.len(), 1);
        assert!(snap.connected);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(page.submitted().is_empty());

        panel.handle.confirm_draft().await;
        wait_for(|| !page.submitted().is_empty()).await;
        assert_eq!(
            page.submitted(),
            vec!["Yes, it is! Want to pick it up today?".to_string()]
        );
        assert_eq!(panel.handle.snapshot().phase, PanelPhase::Idle);
        panel.cancel.cancel();
    }

    #[tokio::test]
    async fn authentication_error_returns_to_idle() {
        let backend = ScriptedBackend::new(Duration::ZERO, |_| {
            Err(BackendError::Authentication("API key rejected".into()))
        });
        let panel = start_panel(backend, false);
        let mut events = panel.handle.subscribe();

        panel
            .to_panel
            .send(history(&[("hello?", Party::Them)]))
            .await
            .unwrap();

        wait_for(|| panel.handle.snapshot().last_error.is_some()).await;
        let snap = panel.handle.snapshot();
        assert_eq!(snap.phase, PanelPhase::Idle);
        assert!(snap.last_error.as_deref().unwrap().contains("API key rejected"));

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(
                event,
                PanelEvent::PhaseChanged {
                    phase: PanelPhase::Drafted { .. }
                }
            ));
            saw_error |= matches!(event, PanelEvent::Error { .. });
        }
        assert!(saw_error);
        panel.cancel.cancel();
    }

    #[tokio::test]
    async fn overlapping_snapshots_start_a_single_generation() {
        let backend = ScriptedBackend::new(Duration::from_millis(200), |_| {
            Ok(ReplyText {
                text: "Sure".into(),
                label: None,
            })
        });
        let panel = start_panel(backend.clone(), false);

        panel
            .to_panel
            .send(history(&[("a", Party::Them)]))
            .await
            .unwrap();
        panel
            .to_panel
            .send(history(&[("a", Party::Them), ("b", Party::Them)]))
            .await
            .unwrap();

        wait_for(|| panel.handle.snapshot().draft().is_some()).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(panel.handle.snapshot().messages.len(), 2);
        panel.cancel.cancel();
    }

    #[tokio::test]
    async fn turn_arriving_during_failed_generation_gets_a_reply() {
        let backend = ScriptedBackend::new(Duration::from_millis(200), |req| {
            if req.conversation_history.len() == 1 {
                Err(BackendError::Transport("timeout".into()))
            } else {
                Ok(ReplyText {
                    text: "Both work for me".into(),
                    label: None,
                })
            }
        });
        let panel = start_panel(backend.clone(), false);

        panel
            .to_panel
            .send(history(&[("a", Party::Them)]))
            .await
            .unwrap();
        panel
            .to_panel
            .send(history(&[("a", Party::Them), ("b", Party::Them)]))
            .await
            .unwrap();

        wait_for(|| panel.handle.snapshot().draft().is_some()).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(panel.handle.snapshot().draft(), Some("Both work for me"));
        panel.cancel.cancel();
    }

    #[tokio::test]
    async fn auto_send_without_composer_falls_back_to_draft() {
        let panel = start_panel(ScriptedBackend::replying("Would 70 work?"), true);
        let page = start_page(&panel, chat(&[("Lowest price?", "them")]));

        wait_for(|| panel.handle.snapshot().notice.is_some()).await;
        let snap = panel.handle.snapshot();
        assert_eq!(snap.draft(), Some("Would 70 work?"));
        assert_eq!(snap.notice.as_deref(), Some(COMPOSER_NOT_FOUND_NOTICE));
        assert!(page.submitted().is_empty());
        panel.cancel.cancel();
    }

    #[tokio::test]
    async fn settings_update_is_applied_and_persisted() {
        let panel = start_panel(ScriptedBackend::replying("x"), true);
        let settings = NegotiationSettings {
            auto_send: false,
            max_price_deviation: 15.0,
            ..Default::default()
        };
        panel.handle.update_settings(settings.clone()).await;
        let state = panel.handle.state().await.unwrap();
        assert_eq!(state.settings, settings);

        let store = panel.store.clone();
        wait_for(move || {
            load_settings(store.as_ref())
                .map(|s| s.max_price_deviation == 15.0)
                .unwrap_or(false)
        })
        .await;
        panel.cancel.cancel();
    }

    #[tokio::test]
    async fn back_to_back_settings_updates_persist_the_last_one() {
        let panel = start_panel(ScriptedBackend::replying("x"), true);
        for deviation in [5.0, 20.0] {
            panel
                .handle
                .update_settings(NegotiationSettings {
                    max_price_deviation: deviation,
                    ..Default::default()
                })
                .await;
        }

        let store = panel.store.clone();
        wait_for(move || {
            load_settings(store.as_ref())
                .map(|s| s.max_price_deviation == 20.0)
                .unwrap_or(false)
        })
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            load_settings(panel.store.as_ref()).unwrap().max_price_deviation,
            20.0
        );
        assert_eq!(
            panel.handle.state().await.unwrap().settings.max_price_deviation,
            20.0
        );
        panel.cancel.cancel();
    }

    #[tokio::test]
    async fn invalidated_page_channel_marks_disconnected() {
        let panel = start_panel(ScriptedBackend::replying("x"), false);
        panel
            .to_panel
            .send(history(&[("hi", Party::Me)]))
            .await
            .unwrap();
        wait_for(|| panel.handle.snapshot().connected).await;
        panel.to_panel.invalidate();
        wait_for(|| !panel.handle.snapshot().connected).await;
        panel.cancel.cancel();
    }
}
