//! # Machine Model
//!
//! [`MachineConfig`] is the immutable descriptor an environment is defined with.
//! [`Machine`] is the runtime entity the orchestrator tracks once the provisioning
//! backend has accepted a start request for a config.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

/// Local identifier handed out by the orchestrator when a start is accepted.
///
/// Unlike [`MachineId`], a handle is known to the caller before the machine has
/// reported anything, and it is never reused within one orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MachineHandle(pub u32);

impl From<u32> for MachineHandle {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl Display for MachineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "machine_{}", self.0)
    }
}

/// Identity assigned by the provisioning backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineId(pub String);

impl Display for MachineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MachineId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(pub String);

impl Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Name of a pub/sub stream (status events or log output).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Where a machine is created from: a recipe or a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSource {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl MachineSource {
    pub fn recipe(source_type: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            location: Some(location.into()),
            content: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// RAM size in megabytes.
    pub ram: u32,
}

/// A server exposed by a machine, keyed by `port/protocol` (e.g. `8080/tcp`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConf {
    #[serde(rename = "ref")]
    pub reference: String,
    pub port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Immutable per-start descriptor of a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfig {
    pub name: String,
    #[serde(default, rename = "dev")]
    pub is_dev: bool,
    pub source: MachineSource,
    #[serde(default = "default_machine_type", rename = "type")]
    pub machine_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limits>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, rename = "machineLinks")]
    pub links: Vec<String>,
    #[serde(default)]
    pub servers: Vec<ServerConf>,
    #[serde(default, rename = "envVariables")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<String>,
}

fn default_machine_type() -> String {
    "docker".to_string()
}

impl MachineConfig {
    /// Minimal config built from a recipe location.
    pub fn new(name: impl Into<String>, source: MachineSource) -> Self {
        Self {
            name: name.into(),
            is_dev: false,
            source,
            machine_type: default_machine_type(),
            limits: None,
            depends_on: Vec::new(),
            links: Vec::new(),
            servers: Vec::new(),
            env: BTreeMap::new(),
            ports: Vec::new(),
        }
    }

    pub fn dev(mut self, is_dev: bool) -> Self {
        self.is_dev = is_dev;
        self
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn links<I, S>(mut self, links: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.links = links.into_iter().map(Into::into).collect();
        self
    }

    pub fn limits(mut self, ram: u32) -> Self {
        self.limits = Some(Limits { ram });
        self
    }
}

/// Lifecycle state of a tracked machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineStatus {
    Creating,
    Running,
    Error,
    Destroyed,
}

impl MachineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MachineStatus::Error | MachineStatus::Destroyed)
    }

    /// Applies a reported status to the current one.
    ///
    /// Returns the next state, or `None` when the report is not a legal
    /// transition. Repeating the current non-terminal state is accepted as a no-op.
    pub fn transition(self, reported: MachineStatus) -> Option<MachineStatus> {
        use MachineStatus::*;
        match (self, reported) {
            (Creating, Creating) => Some(Creating),
            (Creating, Running) | (Running, Running) => Some(Running),
            (Creating, Error) | (Running, Error) => Some(Error),
            (Creating, Destroyed) | (Running, Destroyed) => Some(Destroyed),
            _ => None,
        }
    }
}

impl Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MachineStatus::Creating => "CREATING",
            MachineStatus::Running => "RUNNING",
            MachineStatus::Error => "ERROR",
            MachineStatus::Destroyed => "DESTROYED",
        };
        f.write_str(label)
    }
}

/// Why a machine was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    Start,
    Restart,
}

/// The channels a machine publishes on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineChannels {
    pub status: Option<ChannelId>,
    pub output: Option<ChannelId>,
}

/// A machine tracked by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct Machine {
    pub handle: MachineHandle,
    pub id: MachineId,
    pub workspace_id: WorkspaceId,
    pub status: MachineStatus,
    pub config: MachineConfig,
    pub operation: OperationType,
    pub channels: MachineChannels,
    /// Set once the backend accepted a destroy request; the terminal state
    /// still only comes from the DESTROYED notification.
    pub destroy_requested: bool,
}

impl Machine {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_dev(&self) -> bool {
        self.config.is_dev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_reject_every_report() {
        for terminal in [MachineStatus::Error, MachineStatus::Destroyed] {
            for reported in [
                MachineStatus::Creating,
                MachineStatus::Running,
                MachineStatus::Error,
                MachineStatus::Destroyed,
            ] {
                assert_eq!(terminal.transition(reported), None);
            }
        }
    }

    #[test]
    fn test_running_cannot_go_back_to_creating() {
        assert_eq!(MachineStatus::Running.transition(MachineStatus::Creating), None);
        assert_eq!(
            MachineStatus::Creating.transition(MachineStatus::Running),
            Some(MachineStatus::Running)
        );
        assert_eq!(
            MachineStatus::Running.transition(MachineStatus::Error),
            Some(MachineStatus::Error)
        );
    }

    #[test]
    fn test_config_deserializes_from_camel_case() {
        let json = r#"{
            "name": "db",
            "dev": false,
            "source": { "type": "dockerfile", "location": "http://recipes/db" },
            "dependsOn": ["cache"],
            "machineLinks": ["cache:redis"],
            "limits": { "ram": 512 },
            "envVariables": { "PGDATA": "/data" }
        }"#;
        let config: MachineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.name, "db");
        assert_eq!(config.machine_type, "docker");
        assert_eq!(config.depends_on, vec!["cache"]);
        assert_eq!(config.links, vec!["cache:redis"]);
        assert_eq!(config.limits, Some(Limits { ram: 512 }));
        assert_eq!(config.env.get("PGDATA").map(String::as_str), Some("/data"));
    }
}
