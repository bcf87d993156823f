//! Delivery channel between the page runtime and the panel.
//!
//! At-most-once, single attempt, no ordering guarantee. A message sent while
//! nobody is subscribed is dropped. Replies are optional: a listener that
//! drops the envelope without responding yields `Ok(None)`, and so does a
//! listener that does not answer within the bounded wait.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use negotiagent_protocol::{ChannelMessage, ChannelReply};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("No listener attached")]
    NoListener,

    #[error("Channel invalidated")]
    Invalidated,
}

/// A delivered message plus its optional reply slot.
#[derive(Debug)]
pub struct Envelope {
    pub message: ChannelMessage,
    responder: Option<oneshot::Sender<ChannelReply>>,
}

impl Envelope {
    pub fn new(message: ChannelMessage) -> (Self, oneshot::Receiver<ChannelReply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                message,
                responder: Some(tx),
            },
            rx,
        )
    }

    /// Answer the sender. Later calls are ignored.
    pub fn respond(&mut self, reply: ChannelReply) {
        if let Some(tx) = self.responder.take() {
            let _ = tx.send(reply);
        }
    }
}

#[async_trait]
pub trait MessagingHost: Send + Sync {
    /// One delivery attempt with a bounded wait for an optional reply.
    async fn send(&self, message: ChannelMessage) -> Result<Option<ChannelReply>, ChannelError>;

    /// Attach as the listener. Dropping the subscription detaches it.
    fn subscribe(&self) -> Result<Subscription, ChannelError>;
}

struct Listener {
    token: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

struct Shared {
    name: &'static str,
    listener: Mutex<Option<Listener>>,
    invalidated: AtomicBool,
    next_token: AtomicU64,
}

impl Shared {
    fn detach(&self, token: u64) {
        if let Ok(mut slot) = self.listener.lock() {
            if slot.as_ref().is_some_and(|l| l.token == token) {
                *slot = None;
            }
        }
    }
}

/// Receiving end of a [`LocalHost`].
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Envelope>,
    shared: Arc<Shared>,
    token: u64,
}

impl Subscription {
    /// Next delivered envelope; `None` once the host is invalidated.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Already-delivered envelope, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.detach(self.token);
    }
}

/// In-process messaging host with a single listener slot.
///
/// Subscribing again replaces the previous listener.
#[derive(Clone)]
pub struct LocalHost {
    shared: Arc<Shared>,
    reply_wait: Duration,
}

impl LocalHost {
    pub fn new(name: &'static str, reply_wait: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                listener: Mutex::new(None),
                invalidated: AtomicBool::new(false),
                next_token: AtomicU64::new(1),
            }),
            reply_wait,
        }
    }

    /// Tear the host down. Pending and future sends fail with `Invalidated`.
    pub fn invalidate(&self) {
        self.shared.invalidated.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.shared.listener.lock() {
            *slot = None;
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.shared.invalidated.load(Ordering::SeqCst)
    }

    pub fn has_listener(&self) -> bool {
        self.shared
            .listener
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl MessagingHost for LocalHost {
    async fn send(&self, message: ChannelMessage) -> Result<Option<ChannelReply>, ChannelError> {
        if self.is_invalidated() {
            return Err(ChannelError::Invalidated);
        }
        let kind = message.kind();
        let (envelope, reply_rx) = Envelope::new(message);

        let delivered = {
            let slot = self
                .shared
                .listener
                .lock()
                .map_err(|_| ChannelError::Invalidated)?;
            match slot.as_ref() {
                Some(listener) => listener.tx.send(envelope).is_ok(),
                None => false,
            }
        };
        if !delivered {
            debug!(
                component = "channel",
                event = "channel.dropped",
                channel = self.shared.name,
                kind,
                "No listener, message dropped"
            );
            return Err(ChannelError::NoListener);
        }

        match tokio::time::timeout(self.reply_wait, reply_rx).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            // Listener dropped the envelope without answering.
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                debug!(
                    component = "channel",
                    event = "channel.reply_timeout",
                    channel = self.shared.name,
                    kind,
                    "No reply within bounded wait"
                );
                Ok(None)
            }
        }
    }

    fn subscribe(&self) -> Result<Subscription, ChannelError> {
        if self.is_invalidated() {
            return Err(ChannelError::Invalidated);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.shared.next_token.fetch_add(1, Ordering::SeqCst);
        let mut slot = self
            .shared
            .listener
            .lock()
            .map_err(|_| ChannelError::Invalidated)?;
        *slot = Some(Listener { token, tx });
        Ok(Subscription {
            rx,
            shared: self.shared.clone(),
            token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> LocalHost {
        LocalHost::new("test", Duration::from_millis(200))
    }

    #[tokio::test]
    async fn send_without_listener_is_dropped() {
        let host = host();
        assert_eq!(
            host.send(ChannelMessage::GetHistory).await,
            Err(ChannelError::NoListener)
        );
    }

    #[tokio::test]
    async fn listener_reply_reaches_sender() {
        let host = host();
        let mut sub = host.subscribe().unwrap();
        let responder = tokio::spawn(async move {
            let mut envelope = sub.recv().await.unwrap();
            assert_eq!(envelope.message, ChannelMessage::GetHistory);
            envelope.respond(ChannelReply::Ack);
            sub
        });
        let reply = host.send(ChannelMessage::GetHistory).await.unwrap();
        assert_eq!(reply, Some(ChannelReply::Ack));
        drop(responder.await.unwrap());
    }

    #[tokio::test]
    async fn dropped_envelope_is_a_silent_success() {
        let host = host();
        let mut sub = host.subscribe().unwrap();
        let listener = tokio::spawn(async move {
            let _ = sub.recv().await;
            sub
        });
        let reply = host
            .send(ChannelMessage::InsertText { text: "hi".into() })
            .await
            .unwrap();
        assert_eq!(reply, None);
        drop(listener.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_send_times_out_to_none() {
        let host = host();
        let mut sub = host.subscribe().unwrap();
        let held = tokio::spawn(async move {
            let envelope = sub.recv().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(envelope);
        });
        assert_eq!(host.send(ChannelMessage::GetHistory).await, Ok(None));
        held.abort();
    }

    #[tokio::test]
    async fn dropping_subscription_detaches() {
        let host = host();
        let sub = host.subscribe().unwrap();
        assert!(host.has_listener());
        drop(sub);
        assert!(!host.has_listener());
    }

    #[tokio::test]
    async fn resubscribe_replaces_listener_and_old_drop_keeps_new() {
        let host = host();
        let old = host.subscribe().unwrap();
        let _new = host.subscribe().unwrap();
        drop(old);
        assert!(host.has_listener());
    }

    #[tokio::test]
    async fn invalidated_host_rejects_sends_and_ends_subscription() {
        let host = host();
        let mut sub = host.subscribe().unwrap();
        host.invalidate();
        assert_eq!(
            host.send(ChannelMessage::GetHistory).await,
            Err(ChannelError::Invalidated)
        );
        assert!(sub.recv().await.is_none());
        assert!(host.subscribe().is_err());
    }
}
