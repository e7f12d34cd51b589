//! Session context: which machine the interactive session is bound to.

use crate::model::MachineId;
use std::sync::{Mutex, PoisonError};

/// The machine hosting the user-facing workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevMachine {
    pub id: MachineId,
    pub name: String,
    pub projects_root: Option<String>,
}

pub trait SessionContext: Send + Sync {
    fn dev_machine(&self) -> Option<DevMachine>;

    fn set_dev_machine(&self, machine: Option<DevMachine>);

    fn projects_root(&self) -> Option<String>;

    fn set_projects_root(&self, root: Option<String>);
}

#[derive(Debug, Default)]
struct SessionState {
    dev_machine: Option<DevMachine>,
    projects_root: Option<String>,
}

/// Process-local session.
#[derive(Debug, Default)]
pub struct InMemorySession {
    state: Mutex<SessionState>,
}

impl InMemorySession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionContext for InMemorySession {
    fn dev_machine(&self) -> Option<DevMachine> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).dev_machine.clone()
    }

    fn set_dev_machine(&self, machine: Option<DevMachine>) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).dev_machine = machine;
    }

    fn projects_root(&self) -> Option<String> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).projects_root.clone()
    }

    fn set_projects_root(&self, root: Option<String>) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).projects_root = root;
    }
}
