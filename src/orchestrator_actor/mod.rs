//! Machine lifecycle orchestration for one environment.
//!
//! [`new`] builds the actor and its client; the actor starts working once its
//! [`run`](OrchestratorActor::run) future is spawned with an [`OrchestratorContext`].

pub mod actor;
pub mod error;
pub mod event_bus;
pub mod message;
pub mod subscriptions;

pub use actor::*;
pub use error::*;
pub use event_bus::*;
pub use message::*;
pub use subscriptions::*;

use crate::clients::{MessageBus, OrchestratorClient, ProvisioningBackend, SessionContext};
use crate::config::OrchestratorConfig;
use crate::model::WorkspaceId;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Collaborators injected into the actor when it starts running.
#[derive(Clone)]
pub struct OrchestratorContext {
    pub backend: Arc<dyn ProvisioningBackend>,
    pub bus: Arc<dyn MessageBus>,
    pub session: Arc<dyn SessionContext>,
}

/// Creates an orchestrator actor for `workspace_id` and its client.
pub fn new(workspace_id: WorkspaceId, config: OrchestratorConfig) -> (OrchestratorActor, OrchestratorClient) {
    let config = Arc::new(config);
    let (sender, receiver) = mpsc::channel(config.inbox_capacity.max(1));
    let actor = OrchestratorActor::new(workspace_id, config.clone(), &sender, receiver);
    let client = OrchestratorClient::new(sender, config);
    (actor, client)
}
