//! Runtime wiring: spawning the orchestrator for an environment, starting the
//! environment in dependency order, and shutting it down.

pub mod environment;
pub mod tracing;

pub use environment::*;
pub use self::tracing::setup_tracing;
