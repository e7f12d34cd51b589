//! # Observability & Tracing
//!
//! [`setup_tracing`] installs a compact `tracing_subscriber` formatter filtered by
//! `RUST_LOG`. Module paths are hidden (`with_target(false)`); every event
//! carries the handle, machine id or channel it is about as structured fields.
//!
//! ## What Gets Traced
//!
//! - **Orchestrator lifecycle**: `Orchestrator started`, `Environment stopped`, `Shutdown`
//! - **Machine lifecycle**: `Machine creating`, `Machine running`, `Machine destroyed`
//! - **Degraded paths** (`warn`): rejected requests, failed (un)subscriptions,
//!   illegal transitions
//! - **Payloads** (`debug`): full configs and subscription bookkeeping
//!
//! ## Usage
//!
//! ```bash
//! # Milestones only
//! RUST_LOG=info cargo run
//!
//! # Full payloads and subscription bookkeeping
//! RUST_LOG=debug cargo run -- environment.json
//! ```
//!
//! With `RUST_LOG=info` a three machine environment reads:
//!
//! ```text
//! INFO Orchestrator started workspace=workspace-demo
//! INFO Starting rank rank=0 machines=1
//! INFO start: Sending start to orchestrator name="db"
//! INFO Machine creating handle=machine_1 machine_id=db-1 name=db operation=Start
//! INFO Machine running handle=machine_1 machine_id=db-1 name=db
//! INFO Starting rank rank=1 machines=1
//! ```

/// Initializes the global subscriber. Call once, at program start.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
