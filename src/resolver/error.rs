//! Configuration errors detected while ordering a machine set.

use thiserror::Error;

/// Errors that make a machine set impossible to order.
///
/// All of them are detected before any start request is issued, and the
/// ordering fails as a whole: no partial order is ever returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Two configs in the same environment share a name.
    #[error("Configs contain machines with duplicate name: {0}")]
    DuplicateMachineName(String),

    /// A `dependsOn` entry or link names a machine outside the set.
    #[error("Machine {machine} depends on unknown machine {dependency}")]
    UnknownDependency { machine: String, dependency: String },

    /// A link is neither `name` nor `name:alias`.
    #[error("Machine {machine} has invalid link {link}")]
    MalformedLinkReference { machine: String, link: String },

    /// No rank assignment covers these machines (they sit on or behind a cycle).
    #[error("Launch order of machines [{}] can't be evaluated", .unresolved.join(", "))]
    CyclicOrUnresolvableDependency { unresolved: Vec<String> },
}
