//! # Machine Orchestrator
//!
//! Starts the machines of a development environment in dependency order and
//! tracks their lifecycle from asynchronous status notifications.
//!
//! ## Core Concepts
//!
//! ### Dependency order
//! Machines declare what they need through `dependsOn` and `machineLinks`.
//! The [`resolver`] turns that into ranks: a machine is started only after
//! every machine of a lower rank reported RUNNING. Cycles, duplicate names,
//! unknown targets and malformed links are rejected before anything starts.
//!
//! ### One actor per environment
//! The [`OrchestratorActor`](orchestrator_actor::OrchestratorActor) owns all
//! mutable state (tracked machines, channel subscriptions, pending restarts,
//! event listeners) and handles one request at a time. Commands come from the
//! cloneable [`OrchestratorClient`](clients::OrchestratorClient); status and
//! output messages from the pub/sub transport enter the same inbox through
//! [`SubscriptionHandler`](clients::SubscriptionHandler)s. No locks guard the
//! orchestration state.
//!
//! ### Collaborators
//! The provisioning backend, the pub/sub transport and the session are traits
//! in [`clients`], injected when the actor starts running. [`mock`] has
//! in-process implementations for tests and the demo binary.
//!
//! ## Module Tour
//!
//! - [`model`]: machine configs, runtime machines, lifecycle states and events.
//! - [`resolver`]: start order computation.
//! - [`orchestrator_actor`]: the actor, its requests, errors, subscription
//!   registry and event bus.
//! - [`clients`]: the orchestrator client and the collaborator traits.
//! - [`lifecycle`]: [`EnvironmentSystem`](lifecycle::EnvironmentSystem), the
//!   rank-by-rank environment start, and [`setup_tracing`](lifecycle::setup_tracing).
//! - [`config`]: defaults and `MACHINE_ORCHESTRATOR_*` overrides.
//!
//! ## Running the Demo
//!
//! ```bash
//! RUST_LOG=info cargo run
//! RUST_LOG=debug cargo run -- environment.json
//! ```

pub mod clients;
pub mod config;
pub mod lifecycle;
pub mod mock;
pub mod model;
pub mod orchestrator_actor;
pub mod resolver;
