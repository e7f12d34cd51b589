//! # Pub/Sub Transport
//!
//! The channel transport is a process-wide connection the orchestrator does not
//! own: it only subscribes and unsubscribes handlers. A [`SubscriptionHandler`]
//! is the orchestrator's end of a subscription. Whatever the transport receives
//! on a channel is pushed through [`SubscriptionHandler::deliver`] into the
//! orchestrator inbox, behind every request already queued there.
//!
//! Handlers only hold a weak reference to the inbox, so a transport that keeps
//! handlers around never keeps a stopped orchestrator alive.

use crate::model::{ChannelId, StatusNotification};
use crate::orchestrator_actor::OrchestratorRequest;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport disconnected: {0}")]
    Disconnected(String),

    #[error("Subscription rejected: {0}")]
    Rejected(String),

    /// The orchestrator behind the handler has shut down.
    #[error("Handler inbox closed")]
    InboxClosed,
}

/// What a handler is subscribed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandlerKind {
    Status,
    Output,
}

/// A decoded message received on a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelPayload {
    Status(StatusNotification),
    Output(String),
    /// The transport failed to read or decode a message on this channel.
    Failure(String),
}

/// The orchestrator side of a channel subscription.
///
/// Two handlers are equal only if they are the same handler: an orchestrator
/// owns exactly one status handler and one output handler, so equality is what
/// lets a transport recognise a repeated subscription.
#[derive(Clone)]
pub struct SubscriptionHandler {
    id: u64,
    kind: HandlerKind,
    inbox: mpsc::WeakSender<OrchestratorRequest>,
}

impl SubscriptionHandler {
    pub(crate) fn new(kind: HandlerKind, inbox: &mpsc::Sender<OrchestratorRequest>) -> Self {
        Self {
            id: NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            inbox: inbox.downgrade(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    /// Hands a channel message to the orchestrator.
    pub async fn deliver(&self, channel: &ChannelId, payload: ChannelPayload) -> Result<(), TransportError> {
        let inbox = self.inbox.upgrade().ok_or(TransportError::InboxClosed)?;
        inbox
            .send(OrchestratorRequest::Channel {
                channel: channel.clone(),
                payload,
            })
            .await
            .map_err(|_| TransportError::InboxClosed)
    }
}

impl PartialEq for SubscriptionHandler {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SubscriptionHandler {}

impl std::fmt::Debug for SubscriptionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandler")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn subscribe(&self, channel: &ChannelId, handler: SubscriptionHandler) -> Result<(), TransportError>;

    async fn unsubscribe(&self, channel: &ChannelId, handler: &SubscriptionHandler) -> Result<(), TransportError>;
}
