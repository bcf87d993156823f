//! Page-side event loop.
//!
//! Drives the [`PageObserver`] from three independent triggers (warm-up,
//! debounced mutations, fallback interval) and serves panel requests for
//! history pulls and text insertion. Stops on cancellation or when the
//! channel to the panel is invalidated.

use std::sync::Arc;

use negotiagent_protocol::{ChannelMessage, ChannelReply};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, Envelope, MessagingHost};
use crate::config::RuntimeConfig;
use crate::injector::{InjectOutcome, ReplyInjector};
use crate::observer::{PageObserver, ScrapeProfile};
use crate::page::HostPage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeExit {
    Cancelled,
    ChannelInvalidated,
}

enum RuntimeMessage {
    DebounceElapsed,
}

pub struct PageRuntime {
    page: Arc<dyn HostPage>,
    to_panel: Arc<dyn MessagingHost>,
    from_panel: Arc<dyn MessagingHost>,
    observer: PageObserver,
    injector: ReplyInjector,
    config: RuntimeConfig,
    tx: mpsc::UnboundedSender<RuntimeMessage>,
    rx: mpsc::UnboundedReceiver<RuntimeMessage>,
    debounce_task: Option<JoinHandle<()>>,
}

impl PageRuntime {
    pub fn new(
        page: Arc<dyn HostPage>,
        to_panel: Arc<dyn MessagingHost>,
        from_panel: Arc<dyn MessagingHost>,
        profile: ScrapeProfile,
        config: RuntimeConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            page,
            to_panel,
            from_panel,
            observer: PageObserver::new(profile),
            injector: ReplyInjector::new(config.submit_delay),
            config,
            tx,
            rx,
            debounce_task: None,
        }
    }

    /// Run until cancelled or the panel channel goes away.
    ///
    /// Each `()` on `mutations` is one observed page mutation.
    pub async fn run(
        mut self,
        mut mutations: mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) -> RuntimeExit {
        let mut inbox = match self.from_panel.subscribe() {
            Ok(sub) => sub,
            Err(err) => {
                warn!(component = "page_runtime", error = %err, "Cannot subscribe to panel");
                return RuntimeExit::ChannelInvalidated;
            }
        };

        let warm_up = tokio::time::sleep(self.config.warm_up);
        tokio::pin!(warm_up);
        let mut warmed = false;
        let mut mutations_open = true;

        let period = self.config.fallback_period;
        let mut fallback = interval_at(Instant::now() + period, period);
        fallback.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            component = "page_runtime",
            event = "page_runtime.started",
            warm_up_ms = self.config.warm_up.as_millis() as u64,
            "Page runtime started"
        );

        let exit = loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => break RuntimeExit::Cancelled,
                _ = &mut warm_up, if !warmed => {
                    warmed = true;
                    self.sync(false).await
                }
                signal = mutations.recv(), if mutations_open => {
                    match signal {
                        Some(()) => self.schedule_scan(),
                        None => mutations_open = false,
                    }
                    Ok(())
                }
                Some(msg) = self.rx.recv() => match msg {
                    RuntimeMessage::DebounceElapsed => {
                        self.debounce_task = None;
                        self.sync(false).await
                    }
                },
                _ = fallback.tick() => self.sync(false).await,
                envelope = inbox.recv() => match envelope {
                    Some(envelope) => self.handle_request(envelope).await,
                    None => Err(ChannelError::Invalidated),
                },
            };
            if let Err(err) = step {
                warn!(
                    component = "page_runtime",
                    event = "page_runtime.channel_invalidated",
                    error = %err,
                    "Channel gone, stopping timers"
                );
                break RuntimeExit::ChannelInvalidated;
            }
        };

        if let Some(handle) = self.debounce_task.take() {
            handle.abort();
        }
        info!(
            component = "page_runtime",
            event = "page_runtime.stopped",
            exit = ?exit,
            "Page runtime stopped"
        );
        exit
    }

    /// Cancel any pending debounce and re-arm it.
    fn schedule_scan(&mut self) {
        if let Some(handle) = self.debounce_task.take() {
            handle.abort();
        }
        let tx = self.tx.clone();
        let delay = self.config.debounce;
        self.debounce_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(RuntimeMessage::DebounceElapsed);
        }));
    }

    async fn sync(&mut self, force: bool) -> Result<(), ChannelError> {
        let report = self
            .observer
            .sync(self.page.as_ref(), self.to_panel.as_ref(), force)
            .await?;
        debug!(
            component = "page_runtime",
            history = ?report.history,
            metadata = ?report.metadata,
            forced = force,
            "Scan complete"
        );
        Ok(())
    }

    async fn handle_request(&mut self, mut envelope: Envelope) -> Result<(), ChannelError> {
        match &envelope.message {
            ChannelMessage::GetHistory => {
                envelope.respond(ChannelReply::Ack);
                self.sync(true).await
            }
            ChannelMessage::InsertText { text } => {
                let reply = match self.injector.inject(self.page.as_ref(), text).await {
                    Ok(InjectOutcome::Submitted { clicked_send }) => {
                        ChannelReply::Injected { clicked_send }
                    }
                    Ok(InjectOutcome::ComposerNotFound) => ChannelReply::ComposerNotFound,
                    Err(err) => {
                        warn!(
                            component = "page_runtime",
                            event = "page_runtime.inject_failed",
                            error = %err,
                            "Reply injection failed"
                        );
                        ChannelReply::Failed {
                            reason: err.to_string(),
                        }
                    }
                };
                envelope.respond(reply);
                Ok(())
            }
            other => {
                debug!(
                    component = "page_runtime",
                    kind = other.kind(),
                    "Ignoring page-bound message"
                );
                Ok(())
            }
        }
    }
}
