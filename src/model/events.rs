//! # Events
//!
//! Two families of events flow through the system:
//!
//! - [`StatusNotification`]s arrive from the pub/sub transport on a machine's
//!   status channel. They are the only thing that moves a machine between states.
//! - [`EnvironmentEvent`]s are published by the orchestrator to whoever registered
//!   a listener for the matching [`EventKind`] (UI, progress reporting, the
//!   environment start driver).

use crate::model::{ChannelId, MachineHandle, MachineId, MachineStatus, OperationType, WorkspaceId};
use serde::{Deserialize, Serialize};

/// Status report for one machine, as delivered on its status channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotification {
    pub machine_id: MachineId,
    pub workspace_id: WorkspaceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_name: Option<String>,
    pub event_type: MachineStatus,
    #[serde(default, rename = "error", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StatusNotification {
    pub fn new(
        machine_id: impl Into<MachineId>,
        workspace_id: impl Into<WorkspaceId>,
        event_type: MachineStatus,
    ) -> Self {
        Self {
            machine_id: machine_id.into(),
            workspace_id: workspace_id.into(),
            machine_name: None,
            event_type,
            error_message: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Lifecycle milestones exposed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineAction {
    Creating,
    Running,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MachineStateEvent {
    pub action: MachineAction,
    pub handle: MachineHandle,
    pub machine_id: MachineId,
    pub name: String,
    pub operation: OperationType,
}

/// State of the "machine booting" step shown by progress reporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    InProgress,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub handle: MachineHandle,
    pub machine_name: String,
    pub status: OperationStatus,
    pub message: Option<String>,
}

/// One line of console output received on an output channel.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLine {
    pub channel: ChannelId,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvironmentEvent {
    Machine(MachineStateEvent),
    Progress(ProgressEvent),
    Output(OutputLine),
}

/// Discriminant of [`EnvironmentEvent`], used to register listeners per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Machine,
    Progress,
    Output,
}

impl EnvironmentEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EnvironmentEvent::Machine(_) => EventKind::Machine,
            EnvironmentEvent::Progress(_) => EventKind::Progress,
            EnvironmentEvent::Output(_) => EventKind::Output,
        }
    }
}
