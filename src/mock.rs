//! # Mock Collaborators
//!
//! In-process stand-ins for the provisioning backend and the pub/sub transport,
//! so the orchestrator can be driven end to end without a container runtime.
//!
//! [`MockBackend`] answers from a queue of expectations:
//!
//! ```ignore
//! let backend = Arc::new(MockBackend::new());
//! backend.expect_start().return_ok(descriptor("m-1"));
//! backend.expect_destroy("m-1").return_err(BackendError::Rejected("busy".into()));
//! // ... drive the orchestrator ...
//! backend.verify(); // Ensures all expectations were met
//! ```
//!
//! With a status feed attached ([`MockBackend::with_status_feed`]), requests that
//! have no queued expectation are acknowledged automatically and the matching
//! RUNNING / DESTROYED notifications are published on the [`MockMessageBus`].
//!
//! [`MockMessageBus`] records every subscribe and unsubscribe call, keeps one
//! entry per handler and channel, and can be told to fail on given channels.

use crate::clients::{
    BackendError, ChannelPayload, HandlerKind, MachineDescriptor, MachineDetail, MessageBus,
    ProvisioningBackend, SubscriptionHandler, TransportError,
};
use crate::model::{
    ChannelId, MachineChannels, MachineConfig, MachineId, MachineStatus, StatusNotification, WorkspaceId,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Descriptor with the conventional `machine:{id}:status` and
/// `machine:{id}:output` channels.
pub fn descriptor(id: &str) -> MachineDescriptor {
    MachineDescriptor {
        id: MachineId::from(id),
        channels: MachineChannels {
            status: Some(ChannelId(format!("machine:{id}:status"))),
            output: Some(ChannelId(format!("machine:{id}:output"))),
        },
    }
}

// =============================================================================
// BACKEND
// =============================================================================

enum Expectation {
    Start {
        response: Result<MachineDescriptor, BackendError>,
    },
    Destroy {
        id: MachineId,
        response: Result<(), BackendError>,
    },
}

/// A request received by [`MockBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendRequest {
    Start { workspace: WorkspaceId, config: MachineConfig },
    Destroy { workspace: WorkspaceId, machine: MachineId },
    Detail(MachineId),
}

/// Interleaved record of backend requests and fed notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalEntry {
    Requested(BackendRequest),
    /// A notification the status feed published for the named machine.
    Emitted { machine: String, status: MachineStatus },
}

struct StatusFeed {
    bus: Arc<MockMessageBus>,
    failing: HashSet<String>,
}

struct Launched {
    name: String,
    status_channel: Option<ChannelId>,
}

type Expectations = Arc<Mutex<VecDeque<Expectation>>>;

pub struct MockBackend {
    expectations: Expectations,
    details: Mutex<HashMap<MachineId, MachineDetail>>,
    journal: Arc<Mutex<Vec<JournalEntry>>>,
    launched: Mutex<HashMap<MachineId, Launched>>,
    feed: Option<StatusFeed>,
    next_id: AtomicU32,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Backend answering only from expectations.
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(VecDeque::new())),
            details: Mutex::new(HashMap::new()),
            journal: Arc::new(Mutex::new(Vec::new())),
            launched: Mutex::new(HashMap::new()),
            feed: None,
            next_id: AtomicU32::new(1),
        }
    }

    /// Backend that acknowledges unexpected requests and publishes the
    /// resulting notifications on `bus`.
    pub fn with_status_feed(bus: Arc<MockMessageBus>) -> Self {
        Self {
            feed: Some(StatusFeed {
                bus,
                failing: HashSet::new(),
            }),
            ..Self::new()
        }
    }

    /// Machines with this name report ERROR instead of RUNNING.
    pub fn failing(mut self, name: &str) -> Self {
        if let Some(feed) = self.feed.as_mut() {
            feed.failing.insert(name.to_string());
        }
        self
    }

    pub fn expect_start(&self) -> StartExpectationBuilder {
        StartExpectationBuilder {
            expectations: self.expectations.clone(),
        }
    }

    pub fn expect_destroy(&self, id: &str) -> DestroyExpectationBuilder {
        DestroyExpectationBuilder {
            id: MachineId::from(id),
            expectations: self.expectations.clone(),
        }
    }

    /// Detail returned for `detail.id`. Machines without a detail are not found.
    pub fn set_detail(&self, detail: MachineDetail) {
        lock(&self.details).insert(detail.id.clone(), detail);
    }

    /// Verifies that all expectations were met.
    pub fn verify(&self) {
        let remaining = lock(&self.expectations).len();
        if remaining > 0 {
            panic!("Not all expectations were met. {remaining} remaining");
        }
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        lock(&self.journal).clone()
    }

    pub fn requests(&self) -> Vec<BackendRequest> {
        self.journal()
            .into_iter()
            .filter_map(|entry| match entry {
                JournalEntry::Requested(request) => Some(request),
                JournalEntry::Emitted { .. } => None,
            })
            .collect()
    }

    /// Names of the machines a start was requested for, in request order.
    pub fn started(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                BackendRequest::Start { config, .. } => Some(config.name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, request: BackendRequest) {
        lock(&self.journal).push(JournalEntry::Requested(request));
    }

    fn next_expectation(&self) -> Option<Expectation> {
        lock(&self.expectations).pop_front()
    }

    fn emit(&self, name: String, status: MachineStatus, workspace: &WorkspaceId, id: &MachineId, channel: ChannelId) {
        let Some(feed) = &self.feed else {
            return;
        };
        let bus = feed.bus.clone();
        let journal = self.journal.clone();
        let mut notification = StatusNotification::new(id.clone(), workspace.clone(), status);
        notification.machine_name = Some(name.clone());
        if status == MachineStatus::Error {
            notification = notification.with_error(format!("Machine {name} failed to boot"));
        }

        tokio::spawn(async move {
            // The orchestrator subscribes only after the start request returned.
            for _ in 0..500 {
                if bus.has_subscriber(&channel, HandlerKind::Status) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            lock(&journal).push(JournalEntry::Emitted { machine: name, status });
            let delivered = bus.publish_status(&channel, notification).await;
            debug!(%channel, ?status, delivered, "Status fed");
        });
    }
}

#[async_trait]
impl ProvisioningBackend for MockBackend {
    async fn request_start(
        &self,
        workspace: &WorkspaceId,
        config: &MachineConfig,
    ) -> Result<MachineDescriptor, BackendError> {
        self.record(BackendRequest::Start {
            workspace: workspace.clone(),
            config: config.clone(),
        });

        let descriptor = match self.next_expectation() {
            Some(Expectation::Start { response }) => response?,
            Some(Expectation::Destroy { id, .. }) => {
                return Err(BackendError::Rejected(format!(
                    "Unexpected start of '{}', expected destroy of {id}",
                    config.name
                )));
            }
            None if self.feed.is_some() => {
                let n = self.next_id.fetch_add(1, Ordering::Relaxed);
                descriptor(&format!("{}-{n}", config.name))
            }
            None => return Err(BackendError::Unavailable(format!("Unexpected start of '{}'", config.name))),
        };

        lock(&self.launched).insert(
            descriptor.id.clone(),
            Launched {
                name: config.name.clone(),
                status_channel: descriptor.channels.status.clone(),
            },
        );
        if let (Some(feed), Some(channel)) = (&self.feed, &descriptor.channels.status) {
            let status = if feed.failing.contains(&config.name) {
                MachineStatus::Error
            } else {
                MachineStatus::Running
            };
            self.emit(config.name.clone(), status, workspace, &descriptor.id, channel.clone());
        }
        Ok(descriptor)
    }

    async fn request_destroy(&self, workspace: &WorkspaceId, machine: &MachineId) -> Result<(), BackendError> {
        self.record(BackendRequest::Destroy {
            workspace: workspace.clone(),
            machine: machine.clone(),
        });

        match self.next_expectation() {
            Some(Expectation::Destroy { id, response }) if id == *machine => response?,
            Some(Expectation::Destroy { id, .. }) => {
                return Err(BackendError::Rejected(format!("Expected destroy of {id}, got {machine}")));
            }
            Some(Expectation::Start { .. }) => {
                return Err(BackendError::Rejected(format!("Unexpected destroy of {machine}")));
            }
            None if self.feed.is_some() => {}
            None => return Err(BackendError::Unavailable(format!("Unexpected destroy of {machine}"))),
        }

        let launched = lock(&self.launched).remove(machine);
        if let Some(Launched {
            name,
            status_channel: Some(channel),
        }) = launched
        {
            self.emit(name, MachineStatus::Destroyed, workspace, machine, channel);
        }
        Ok(())
    }

    async fn fetch_machine_detail(&self, machine: &MachineId) -> Result<MachineDetail, BackendError> {
        self.record(BackendRequest::Detail(machine.clone()));
        if let Some(detail) = lock(&self.details).get(machine) {
            return Ok(detail.clone());
        }
        match (&self.feed, lock(&self.launched).get(machine)) {
            (Some(_), Some(launched)) => Ok(MachineDetail {
                id: machine.clone(),
                name: launched.name.clone(),
                status: MachineStatus::Running,
                projects_root: Some("/projects".to_string()),
            }),
            _ => Err(BackendError::NotFound(machine.clone())),
        }
    }
}

/// Builder for `start` expectations.
pub struct StartExpectationBuilder {
    expectations: Expectations,
}

impl StartExpectationBuilder {
    pub fn return_ok(self, descriptor: MachineDescriptor) {
        lock(&self.expectations).push_back(Expectation::Start { response: Ok(descriptor) });
    }

    pub fn return_err(self, error: BackendError) {
        lock(&self.expectations).push_back(Expectation::Start { response: Err(error) });
    }
}

/// Builder for `destroy` expectations.
pub struct DestroyExpectationBuilder {
    id: MachineId,
    expectations: Expectations,
}

impl DestroyExpectationBuilder {
    pub fn return_ok(self) {
        lock(&self.expectations).push_back(Expectation::Destroy {
            id: self.id,
            response: Ok(()),
        });
    }

    pub fn return_err(self, error: BackendError) {
        lock(&self.expectations).push_back(Expectation::Destroy {
            id: self.id,
            response: Err(error),
        });
    }
}

// =============================================================================
// MESSAGE BUS
// =============================================================================

#[derive(Default)]
struct BusState {
    handlers: BTreeMap<ChannelId, Vec<SubscriptionHandler>>,
    subscribe_calls: Vec<ChannelId>,
    unsubscribe_calls: Vec<ChannelId>,
    fail_subscribe: HashSet<ChannelId>,
    fail_unsubscribe: HashSet<ChannelId>,
}

#[derive(Default)]
pub struct MockMessageBus {
    state: Mutex<BusState>,
}

impl MockMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribing to `channel` fails from now on.
    pub fn fail_subscribe(&self, channel: &str) {
        lock(&self.state).fail_subscribe.insert(ChannelId::from(channel));
    }

    /// Unsubscribing from `channel` fails from now on.
    pub fn fail_unsubscribe(&self, channel: &str) {
        lock(&self.state).fail_unsubscribe.insert(ChannelId::from(channel));
    }

    pub fn subscribe_calls(&self) -> Vec<ChannelId> {
        lock(&self.state).subscribe_calls.clone()
    }

    pub fn unsubscribe_calls(&self) -> Vec<ChannelId> {
        lock(&self.state).unsubscribe_calls.clone()
    }

    /// Channels with at least one handler attached.
    pub fn active_channels(&self) -> Vec<ChannelId> {
        lock(&self.state)
            .handlers
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    pub fn has_subscriber(&self, channel: &ChannelId, kind: HandlerKind) -> bool {
        lock(&self.state)
            .handlers
            .get(channel)
            .is_some_and(|handlers| handlers.iter().any(|handler| handler.kind() == kind))
    }

    /// Delivers a status notification to the status handlers of `channel`.
    /// Returns how many handlers accepted it.
    pub async fn publish_status(&self, channel: &ChannelId, notification: StatusNotification) -> usize {
        self.publish(channel, HandlerKind::Status, ChannelPayload::Status(notification))
            .await
    }

    /// Delivers a console line to the output handlers of `channel`.
    pub async fn publish_output(&self, channel: &ChannelId, line: &str) -> usize {
        self.publish(channel, HandlerKind::Output, ChannelPayload::Output(line.to_string()))
            .await
    }

    async fn publish(&self, channel: &ChannelId, kind: HandlerKind, payload: ChannelPayload) -> usize {
        let handlers: Vec<SubscriptionHandler> = lock(&self.state)
            .handlers
            .get(channel)
            .map(|handlers| handlers.iter().filter(|h| h.kind() == kind).cloned().collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for handler in handlers {
            match handler.deliver(channel, payload.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(%channel, handler = handler.id(), error = %e, "Delivery failed"),
            }
        }
        delivered
    }
}

#[async_trait]
impl MessageBus for MockMessageBus {
    async fn subscribe(&self, channel: &ChannelId, handler: SubscriptionHandler) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.subscribe_calls.push(channel.clone());
        if state.fail_subscribe.contains(channel) {
            return Err(TransportError::Rejected(channel.to_string()));
        }
        let handlers = state.handlers.entry(channel.clone()).or_default();
        if !handlers.contains(&handler) {
            handlers.push(handler);
        }
        Ok(())
    }

    async fn unsubscribe(&self, channel: &ChannelId, handler: &SubscriptionHandler) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.unsubscribe_calls.push(channel.clone());
        if state.fail_unsubscribe.contains(channel) {
            return Err(TransportError::Disconnected(channel.to_string()));
        }
        if let Some(handlers) = state.handlers.get_mut(channel) {
            handlers.retain(|h| h != handler);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MachineSource;

    fn config(name: &str) -> MachineConfig {
        MachineConfig::new(name, MachineSource::recipe("dockerfile", "http://recipes/x"))
    }

    #[tokio::test]
    async fn test_backend_with_expectations() {
        let backend = MockBackend::new();
        let workspace = WorkspaceId::from("ws");
        backend.expect_start().return_ok(descriptor("m-1"));
        backend
            .expect_destroy("m-1")
            .return_err(BackendError::Rejected("busy".to_string()));

        let started = backend.request_start(&workspace, &config("db")).await.unwrap();
        assert_eq!(started.channels.status, Some(ChannelId::from("machine:m-1:status")));
        assert_eq!(
            backend.request_destroy(&workspace, &MachineId::from("m-1")).await,
            Err(BackendError::Rejected("busy".to_string()))
        );
        backend.verify();
        assert_eq!(backend.started(), vec!["db"]);
    }

    #[tokio::test]
    async fn test_backend_without_expectation_fails() {
        let backend = MockBackend::new();
        let result = backend.request_start(&WorkspaceId::from("ws"), &config("db")).await;
        assert!(matches!(result, Err(BackendError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_bus_keeps_one_entry_per_handler() {
        let bus = MockMessageBus::new();
        let (sender, _receiver) = tokio::sync::mpsc::channel(4);
        let handler = SubscriptionHandler::new(HandlerKind::Status, &sender);
        let channel = ChannelId::from("machine:m-1:status");

        bus.subscribe(&channel, handler.clone()).await.unwrap();
        bus.subscribe(&channel, handler.clone()).await.unwrap();
        assert_eq!(bus.subscribe_calls().len(), 2);
        assert_eq!(bus.active_channels(), vec![channel.clone()]);

        bus.unsubscribe(&channel, &handler).await.unwrap();
        assert!(bus.active_channels().is_empty());
        assert!(!bus.has_subscriber(&channel, HandlerKind::Status));
    }
}
