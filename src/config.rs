//! # Orchestrator Configuration
//!
//! Defaults match what a workspace expects out of the box. Every field can be
//! overridden through `MACHINE_ORCHESTRATOR_*` environment variables, see
//! [`OrchestratorConfig::from_env`].

use crate::model::{ChannelId, Limits, MachineConfig, MachineSource, WorkspaceId};
use serde::Deserialize;
use tracing::warn;

const ENV_PREFIX: &str = "MACHINE_ORCHESTRATOR_";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Capacity of the orchestrator inbox. Callers wait when it is full.
    pub inbox_capacity: usize,
    /// RAM limit (MB) for machines started from a recipe.
    pub default_ram_mb: u32,
    /// RAM limit (MB) for the dev machine started from a recipe.
    pub dev_ram_mb: u32,
    pub machine_type: String,
    pub recipe_source_type: String,
    /// Environment-wide agent log channel; `{workspace}` is replaced by the workspace id.
    pub agent_log_channel: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 32,
            default_ram_mb: 1024,
            dev_ram_mb: 3072,
            machine_type: "docker".to_string(),
            recipe_source_type: "dockerfile".to_string(),
            agent_log_channel: "workspace:{workspace}:ext-server:output".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults with environment overrides applied.
    ///
    /// Unparseable numeric values are logged and ignored.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("INBOX_CAPACITY") {
            match value.parse::<usize>() {
                Ok(capacity) if capacity > 0 => self.inbox_capacity = capacity,
                _ => warn!(value = %value, "Ignoring invalid inbox capacity"),
            }
        }
        if let Some(value) = lookup("DEFAULT_RAM_MB") {
            match value.parse() {
                Ok(ram) => self.default_ram_mb = ram,
                Err(_) => warn!(value = %value, "Ignoring invalid default RAM limit"),
            }
        }
        if let Some(value) = lookup("DEV_RAM_MB") {
            match value.parse() {
                Ok(ram) => self.dev_ram_mb = ram,
                Err(_) => warn!(value = %value, "Ignoring invalid dev RAM limit"),
            }
        }
        if let Some(value) = lookup("MACHINE_TYPE") {
            self.machine_type = value;
        }
        if let Some(value) = lookup("RECIPE_SOURCE_TYPE") {
            self.recipe_source_type = value;
        }
        if let Some(value) = lookup("AGENT_LOG_CHANNEL") {
            self.agent_log_channel = value;
        }
        self
    }

    pub fn agent_log_channel(&self, workspace: &WorkspaceId) -> ChannelId {
        ChannelId(self.agent_log_channel.replace("{workspace}", &workspace.0))
    }

    /// Builds the config of a machine started directly from a recipe URL.
    pub fn recipe_machine(&self, recipe_url: &str, display_name: &str, is_dev: bool) -> MachineConfig {
        let ram = if is_dev { self.dev_ram_mb } else { self.default_ram_mb };
        let mut config = MachineConfig::new(
            display_name,
            MachineSource::recipe(self.recipe_source_type.as_str(), recipe_url),
        )
        .dev(is_dev);
        config.machine_type = self.machine_type.clone();
        config.limits = Some(Limits { ram });
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_recipe_machine_limits() {
        let config = OrchestratorConfig::default();
        let dev = config.recipe_machine("http://recipes/dev", "dev-machine", true);
        let plain = config.recipe_machine("http://recipes/db", "db", false);

        assert!(dev.is_dev);
        assert_eq!(dev.limits, Some(Limits { ram: 3072 }));
        assert_eq!(plain.limits, Some(Limits { ram: 1024 }));
        assert_eq!(plain.source.source_type, "dockerfile");
        assert_eq!(plain.source.location.as_deref(), Some("http://recipes/db"));
        assert_eq!(plain.machine_type, "docker");
    }

    #[test]
    fn test_overrides_apply_and_bad_values_are_ignored() {
        let vars: HashMap<&str, &str> = [
            ("INBOX_CAPACITY", "0"),
            ("DEV_RAM_MB", "4096"),
            ("DEFAULT_RAM_MB", "lots"),
            ("AGENT_LOG_CHANNEL", "agent:{workspace}"),
        ]
        .into_iter()
        .collect();
        let config = OrchestratorConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.inbox_capacity, 32);
        assert_eq!(config.dev_ram_mb, 4096);
        assert_eq!(config.default_ram_mb, 1024);
        assert_eq!(
            config.agent_log_channel(&WorkspaceId::from("ws-7")),
            ChannelId::from("agent:ws-7")
        );
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: OrchestratorConfig = serde_json::from_str(r#"{"dev_ram_mb": 2048}"#).unwrap();
        assert_eq!(config.dev_ram_mb, 2048);
        assert_eq!(config.inbox_capacity, 32);
    }
}
