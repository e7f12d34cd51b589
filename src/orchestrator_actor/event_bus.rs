//! # Event Bus
//!
//! Listeners register for one or more [`EventKind`]s and receive every matching
//! [`EnvironmentEvent`] in publication order. The bus is owned by the
//! orchestrator actor, so registration, removal and publication never race.
//!
//! A listener whose receiver was dropped is pruned on the next publication.

use crate::model::{EnvironmentEvent, EventKind};
use std::collections::HashMap;
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u32);

impl Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener_{}", self.0)
    }
}

/// Receiving end of a registration.
#[derive(Debug)]
pub struct EventListener {
    id: ListenerId,
    receiver: mpsc::UnboundedReceiver<EnvironmentEvent>,
}

impl EventListener {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Waits for the next event. Returns `None` once the listener was
    /// unregistered or the orchestrator stopped.
    pub async fn recv(&mut self) -> Option<EnvironmentEvent> {
        self.receiver.recv().await
    }

    /// Returns an already published event without waiting.
    pub fn try_recv(&mut self) -> Option<EnvironmentEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

#[derive(Debug)]
struct Registration {
    kinds: Vec<EventKind>,
    sender: mpsc::UnboundedSender<EnvironmentEvent>,
}

#[derive(Debug, Default)]
pub struct EventBus {
    listeners: HashMap<ListenerId, Registration>,
    next_id: u32,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kinds: Vec<EventKind>) -> EventListener {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.listeners.insert(id, Registration { kinds, sender });
        debug!(%id, listeners = self.listeners.len(), "Listener registered");
        EventListener { id, receiver }
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn publish(&mut self, event: EnvironmentEvent) {
        let kind = event.kind();
        self.listeners.retain(|id, registration| {
            if !registration.kinds.contains(&kind) {
                return !registration.sender.is_closed();
            }
            let delivered = registration.sender.send(event.clone()).is_ok();
            if !delivered {
                debug!(%id, "Pruning closed listener");
            }
            delivered
        });
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
