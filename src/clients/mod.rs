//! The orchestrator client and the collaborators the orchestrator talks to.

pub mod backend;
pub mod orchestrator_client;
pub mod session;
pub mod transport;

pub use backend::*;
pub use orchestrator_client::*;
pub use session::*;
pub use transport::*;
