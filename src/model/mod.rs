//! Pure data structures shared by the resolver, the orchestrator actor and its clients.

pub mod events;
pub mod machine;

pub use events::*;
pub use machine::*;
