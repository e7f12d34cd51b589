//! Error types for the orchestrator actor.

use crate::clients::BackendError;
use crate::model::{MachineHandle, MachineStatus};
use crate::resolver::ResolveError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrchestratorError {
    /// The actor task has stopped and no longer accepts requests.
    #[error("Actor closed")]
    ActorClosed,

    /// The actor dropped the reply channel before answering.
    #[error("Actor dropped response channel")]
    ActorDropped,

    #[error("Machine not found: {0}")]
    MachineNotFound(MachineHandle),

    /// The machine exists but is in a state the operation cannot act on.
    #[error("Machine {handle} is {status}")]
    InvalidState { handle: MachineHandle, status: MachineStatus },

    #[error("Start of machine '{machine}' rejected: {source}")]
    StartRequestRejected { machine: String, source: BackendError },

    #[error("Destroy of machine '{machine}' rejected: {source}")]
    DestroyRequestRejected { machine: String, source: BackendError },

    /// A machine failed while the environment was starting; nothing depending
    /// on it was started.
    #[error("Environment start failed at machines {failed:?}")]
    EnvironmentStartFailed { failed: Vec<String> },

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}
