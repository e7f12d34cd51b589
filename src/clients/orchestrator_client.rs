use crate::config::OrchestratorConfig;
use crate::model::{ChannelId, EventKind, Machine, MachineConfig, MachineHandle, MachineStatus, OperationType};
use crate::orchestrator_actor::{EventListener, ListenerId, OrchestratorError, OrchestratorRequest, Response};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};

/// Client for interacting with the orchestrator actor of one environment.
///
/// Cloning is cheap. The actor stops once every clone is dropped.
#[derive(Clone)]
pub struct OrchestratorClient {
    sender: mpsc::Sender<OrchestratorRequest>,
    defaults: Arc<OrchestratorConfig>,
}

impl OrchestratorClient {
    pub fn new(sender: mpsc::Sender<OrchestratorRequest>, defaults: Arc<OrchestratorConfig>) -> Self {
        Self { sender, defaults }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Response<T>) -> OrchestratorRequest,
    ) -> Result<T, OrchestratorError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| OrchestratorError::ActorClosed)?;
        response.await.map_err(|_| OrchestratorError::ActorDropped)?
    }

    /// Requests a machine start. Returns once the backend accepted the request;
    /// the machine reports RUNNING later through its status channel.
    #[instrument(skip(self, config), fields(name = %config.name))]
    pub async fn start(&self, config: MachineConfig) -> Result<MachineHandle, OrchestratorError> {
        debug!(?config, "start called");
        info!("Sending start to orchestrator");
        self.request(|respond_to| OrchestratorRequest::Start {
            config,
            operation: OperationType::Start,
            respond_to,
        })
        .await
    }

    /// Starts a machine built straight from a recipe URL with default limits.
    #[instrument(skip(self))]
    pub async fn start_from_recipe(
        &self,
        recipe_url: &str,
        display_name: &str,
        is_dev: bool,
    ) -> Result<MachineHandle, OrchestratorError> {
        let config = self.defaults.recipe_machine(recipe_url, display_name, is_dev);
        self.start(config).await
    }

    #[instrument(skip(self))]
    pub async fn destroy(&self, handle: MachineHandle) -> Result<(), OrchestratorError> {
        debug!("Sending request");
        self.request(|respond_to| OrchestratorRequest::Destroy { handle, respond_to })
            .await
    }

    /// Destroys the machine and starts it again with the same config once the
    /// backend reported it DESTROYED.
    #[instrument(skip(self))]
    pub async fn restart(&self, handle: MachineHandle) -> Result<(), OrchestratorError> {
        debug!("Sending request");
        self.request(|respond_to| OrchestratorRequest::Restart { handle, respond_to })
            .await
    }

    /// Releases every subscription and forgets every machine. Safe to call twice.
    #[instrument(skip(self))]
    pub async fn environment_stopped(&self) -> Result<(), OrchestratorError> {
        info!("Stopping environment");
        self.request(|respond_to| OrchestratorRequest::EnvironmentStopped { respond_to })
            .await
    }

    pub async fn machine(&self, handle: MachineHandle) -> Result<Option<Machine>, OrchestratorError> {
        self.request(|respond_to| OrchestratorRequest::GetMachine { handle, respond_to })
            .await
    }

    pub async fn machine_state(&self, handle: MachineHandle) -> Result<Option<MachineStatus>, OrchestratorError> {
        Ok(self.machine(handle).await?.map(|machine| machine.status))
    }

    /// Every machine known to the orchestrator, by handle.
    pub async fn machines(&self) -> Result<Vec<Machine>, OrchestratorError> {
        self.request(|respond_to| OrchestratorRequest::ListMachines { respond_to })
            .await
    }

    pub async fn subscribed_channels(&self) -> Result<Vec<ChannelId>, OrchestratorError> {
        self.request(|respond_to| OrchestratorRequest::SubscribedChannels { respond_to })
            .await
    }

    #[instrument(skip(self))]
    pub async fn listen(&self, kinds: Vec<EventKind>) -> Result<EventListener, OrchestratorError> {
        self.request(|respond_to| OrchestratorRequest::Listen { kinds, respond_to })
            .await
    }

    /// Returns `false` if the listener was not registered.
    #[instrument(skip(self))]
    pub async fn unlisten(&self, listener: ListenerId) -> Result<bool, OrchestratorError> {
        self.request(|respond_to| OrchestratorRequest::Unlisten { listener, respond_to })
            .await
    }
}
