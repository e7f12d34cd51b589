//! Demo: starts an environment against the in-process mock backend.
//!
//! The first argument, if any, is a JSON file holding a list of machine
//! configs. Without it a three machine environment is used.

use machine_orchestrator::clients::{InMemorySession, SessionContext};
use machine_orchestrator::config::OrchestratorConfig;
use machine_orchestrator::lifecycle::{setup_tracing, EnvironmentSystem};
use machine_orchestrator::mock::{MockBackend, MockMessageBus};
use machine_orchestrator::model::{MachineConfig, MachineSource, WorkspaceId};
use machine_orchestrator::orchestrator_actor::OrchestratorContext;
use std::error::Error;
use std::sync::Arc;
use tracing::{info, Instrument};

fn demo_environment() -> Vec<MachineConfig> {
    let recipe = |name: &str| MachineSource::recipe("dockerfile", format!("http://recipes/{name}"));
    vec![
        MachineConfig::new("dev-machine", recipe("dev"))
            .dev(true)
            .links(["api:backend"])
            .limits(3072),
        MachineConfig::new("api", recipe("api")).depends_on(["db"]),
        MachineConfig::new("db", recipe("postgres")).limits(1024),
    ]
}

fn load_environment() -> Result<Vec<MachineConfig>, Box<dyn Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!(%path, "Loading environment");
            Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
        }
        None => Ok(demo_environment()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing();

    let configs = load_environment()?;
    let bus = Arc::new(MockMessageBus::new());
    let session = Arc::new(InMemorySession::new());
    let ctx = OrchestratorContext {
        backend: Arc::new(MockBackend::with_status_feed(bus.clone())),
        bus,
        session: session.clone(),
    };

    let system = EnvironmentSystem::new(WorkspaceId::from("workspace-demo"), ctx, OrchestratorConfig::from_env());

    let span = tracing::info_span!("environment_start");
    let handles = system.start_environment(&configs).instrument(span).await?;

    for machine in system.client.machines().await? {
        println!("{} {:<12} {}", machine.handle, machine.name(), machine.status);
    }
    if let Some(dev) = session.dev_machine() {
        println!("dev machine: {} ({})", dev.name, dev.id);
    }
    info!(started = handles.len(), "Environment ready");

    system.stop_environment().await?;
    system.shutdown().await?;

    info!("Demo completed successfully");
    Ok(())
}
