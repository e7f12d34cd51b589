//! # Provisioning Backend
//!
//! The REST layer that actually asks a container runtime for machines lives
//! outside this crate. The orchestrator only needs the three calls below.

use crate::model::{MachineChannels, MachineConfig, MachineId, MachineStatus, WorkspaceId};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Machine not found: {0}")]
    NotFound(MachineId),

    /// The backend could not be reached.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// What the backend returns once it accepted a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineDescriptor {
    pub id: MachineId,
    pub channels: MachineChannels,
}

/// Full machine description, available once the machine runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineDetail {
    pub id: MachineId,
    pub name: String,
    pub status: MachineStatus,
    /// Filesystem root holding the workspace projects.
    pub projects_root: Option<String>,
}

#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    async fn request_start(
        &self,
        workspace: &WorkspaceId,
        config: &MachineConfig,
    ) -> Result<MachineDescriptor, BackendError>;

    async fn request_destroy(&self, workspace: &WorkspaceId, machine: &MachineId) -> Result<(), BackendError>;

    async fn fetch_machine_detail(&self, machine: &MachineId) -> Result<MachineDetail, BackendError>;
}
