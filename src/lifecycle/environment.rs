use crate::clients::OrchestratorClient;
use crate::config::OrchestratorConfig;
use crate::model::{EnvironmentEvent, EventKind, MachineConfig, MachineHandle, OperationStatus, WorkspaceId};
use crate::orchestrator_actor::{OrchestratorContext, OrchestratorError};
use crate::resolver;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A running orchestrator for one environment.
///
/// `EnvironmentSystem` spawns the orchestrator actor with its collaborators,
/// starts the environment in dependency order and shuts the actor down.
///
/// # Example
///
/// ```ignore
/// let system = EnvironmentSystem::new(workspace_id, ctx, OrchestratorConfig::from_env());
///
/// let handles = system.start_environment(&configs).await?;
/// // ... use system.client ...
///
/// system.stop_environment().await?;
/// system.shutdown().await?;
/// ```
pub struct EnvironmentSystem {
    pub client: OrchestratorClient,
    handle: JoinHandle<()>,
}

impl EnvironmentSystem {
    /// Spawns the orchestrator of `workspace_id`.
    pub fn new(workspace_id: WorkspaceId, ctx: OrchestratorContext, config: OrchestratorConfig) -> Self {
        let (actor, client) = crate::orchestrator_actor::new(workspace_id, config);
        let handle = tokio::spawn(actor.run(ctx));
        Self { client, handle }
    }

    /// See [`start_environment`].
    pub async fn start_environment(&self, configs: &[MachineConfig]) -> Result<Vec<MachineHandle>, OrchestratorError> {
        start_environment(&self.client, configs).await
    }

    pub async fn stop_environment(&self) -> Result<(), OrchestratorError> {
        self.client.environment_stopped().await
    }

    /// Drops the client and waits for the orchestrator task to finish.
    ///
    /// Clones of the client handed out earlier keep the orchestrator alive, so
    /// drop them first.
    pub async fn shutdown(self) -> Result<(), String> {
        info!("Shutting down environment...");
        drop(self.client);

        if let Err(e) = self.handle.await {
            error!("Orchestrator task failed: {:?}", e);
            return Err(format!("Orchestrator task failed: {:?}", e));
        }

        info!("Environment shutdown complete.");
        Ok(())
    }
}

/// Starts every machine of an environment, rank by rank.
///
/// Machines of one rank are started together. The next rank is started only
/// after every machine of the current one reported RUNNING. A machine that
/// reports ERROR, or whose start is rejected, ends the sequence: nothing that
/// depends on it is started and [`OrchestratorError::EnvironmentStartFailed`]
/// names the failed machines of that rank.
///
/// Configuration errors are returned before any start is issued. There is no
/// built-in timeout; wrap the call in `tokio::time::timeout` if needed.
pub async fn start_environment(
    client: &OrchestratorClient,
    configs: &[MachineConfig],
) -> Result<Vec<MachineHandle>, OrchestratorError> {
    let levels = resolver::levels(configs)?;
    let mut started = Vec::with_capacity(configs.len());

    for (rank, level) in levels.into_iter().enumerate() {
        info!(rank, machines = level.len(), "Starting rank");

        // Registered before the first start so no progress event is missed.
        let mut listener = client.listen(vec![EventKind::Progress]).await?;
        let mut pending: HashMap<MachineHandle, String> = HashMap::new();
        let mut failed = Vec::new();

        for config in level {
            let name = config.name.clone();
            match client.start(config).await {
                Ok(handle) => {
                    pending.insert(handle, name);
                    started.push(handle);
                }
                Err(OrchestratorError::StartRequestRejected { machine, source }) => {
                    warn!(%machine, error = %source, "Machine start rejected");
                    failed.push(machine);
                }
                Err(e) => return Err(e),
            }
        }

        while !pending.is_empty() {
            let Some(event) = listener.recv().await else {
                return Err(OrchestratorError::ActorClosed);
            };
            let EnvironmentEvent::Progress(progress) = event else {
                continue;
            };
            match progress.status {
                OperationStatus::Success => {
                    pending.remove(&progress.handle);
                }
                OperationStatus::Error => {
                    if let Some(name) = pending.remove(&progress.handle) {
                        warn!(handle = %progress.handle, %name, message = ?progress.message, "Machine failed to start");
                        failed.push(name);
                    }
                }
                OperationStatus::InProgress => {}
            }
        }
        client.unlisten(listener.id()).await?;

        if !failed.is_empty() {
            return Err(OrchestratorError::EnvironmentStartFailed { failed });
        }
    }

    info!(machines = started.len(), "Environment started");
    Ok(started)
}
