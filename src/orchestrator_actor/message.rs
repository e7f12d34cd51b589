//! Requests processed by the orchestrator actor.

use super::{EventListener, ListenerId, OrchestratorError};
use crate::clients::ChannelPayload;
use crate::model::{ChannelId, EventKind, Machine, MachineConfig, MachineHandle, OperationType};
use tokio::sync::oneshot;

/// One-shot reply channel for a request.
pub type Response<T> = oneshot::Sender<Result<T, OrchestratorError>>;

/// Everything the orchestrator reacts to.
///
/// Commands come from [`OrchestratorClient`](crate::clients::OrchestratorClient).
/// `Channel` messages come from subscription handlers and carry no reply.
#[derive(Debug)]
pub enum OrchestratorRequest {
    Start {
        config: MachineConfig,
        operation: OperationType,
        respond_to: Response<MachineHandle>,
    },
    Destroy {
        handle: MachineHandle,
        respond_to: Response<()>,
    },
    Restart {
        handle: MachineHandle,
        respond_to: Response<()>,
    },
    EnvironmentStopped {
        respond_to: Response<()>,
    },
    GetMachine {
        handle: MachineHandle,
        respond_to: Response<Option<Machine>>,
    },
    ListMachines {
        respond_to: Response<Vec<Machine>>,
    },
    SubscribedChannels {
        respond_to: Response<Vec<ChannelId>>,
    },
    Listen {
        kinds: Vec<EventKind>,
        respond_to: Response<EventListener>,
    },
    Unlisten {
        listener: ListenerId,
        respond_to: Response<bool>,
    },
    Channel {
        channel: ChannelId,
        payload: ChannelPayload,
    },
}
