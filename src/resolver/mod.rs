//! # Dependency Resolver
//!
//! Computes the order in which the machines of an environment are started.
//!
//! Every machine gets a *rank*: `0` when it depends on nothing, otherwise one
//! more than the highest rank among its dependencies. Dependencies come from
//! `dependsOn` and from the machine part of every link (`name` or `name:alias`).
//!
//! Ranks are propagated in passes over the unresolved machines until a pass
//! makes no progress. Whatever is left unresolved at that point is on, or
//! behind, a cycle.
//!
//! ```
//! use machine_orchestrator::model::{MachineConfig, MachineSource};
//! use machine_orchestrator::resolver;
//!
//! let recipe = MachineSource::recipe("dockerfile", "http://recipes/base");
//! let configs = vec![
//!     MachineConfig::new("app", recipe.clone()).depends_on(["db"]),
//!     MachineConfig::new("db", recipe),
//! ];
//!
//! let names: Vec<_> = resolver::order(&configs)
//!     .unwrap()
//!     .into_iter()
//!     .map(|c| c.name)
//!     .collect();
//! assert_eq!(names, ["db", "app"]);
//! ```

pub mod error;

pub use error::*;

use crate::model::MachineConfig;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Start rank per machine name.
pub type WeightMap = HashMap<String, usize>;

/// Returns the configs sorted so that every machine comes after all of its
/// dependencies. Machines with equal rank keep their declaration order.
pub fn order(configs: &[MachineConfig]) -> Result<Vec<MachineConfig>, ResolveError> {
    let weights = weigh(configs)?;

    let mut ordered = configs.to_vec();
    // Vec::sort_by_key is stable: ties stay in declaration order.
    ordered.sort_by_key(|config| weights[&config.name]);

    debug!(
        order = ?ordered.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        "Resolved start order"
    );
    Ok(ordered)
}

/// Same as [`order`], grouped by rank. Level `n` holds every machine of rank `n`.
pub fn levels(configs: &[MachineConfig]) -> Result<Vec<Vec<MachineConfig>>, ResolveError> {
    let weights = weigh(configs)?;
    let mut levels: Vec<Vec<MachineConfig>> = Vec::new();

    let mut ordered = configs.to_vec();
    ordered.sort_by_key(|config| weights[&config.name]);

    for config in ordered {
        let rank = weights[&config.name];
        if levels.len() <= rank {
            levels.resize_with(rank + 1, Vec::new);
        }
        levels[rank].push(config);
    }
    Ok(levels)
}

/// Computes the rank of every machine.
pub fn weigh(configs: &[MachineConfig]) -> Result<WeightMap, ResolveError> {
    let mut names = HashSet::with_capacity(configs.len());
    for config in configs {
        if !names.insert(config.name.as_str()) {
            return Err(ResolveError::DuplicateMachineName(config.name.clone()));
        }
    }

    let dependencies = dependency_lists(configs, &names)?;

    let mut weights = WeightMap::with_capacity(configs.len());
    let mut progressed = true;
    while weights.len() != configs.len() && progressed {
        progressed = false;
        for (config, deps) in configs.iter().zip(&dependencies) {
            if weights.contains_key(&config.name) {
                continue;
            }
            if !deps.iter().all(|dep| weights.contains_key(*dep)) {
                continue;
            }
            let rank = deps
                .iter()
                .map(|dep| weights[*dep] + 1)
                .max()
                .unwrap_or(0);
            weights.insert(config.name.clone(), rank);
            progressed = true;
        }
    }

    if weights.len() != configs.len() {
        let unresolved = configs
            .iter()
            .filter(|config| !weights.contains_key(&config.name))
            .map(|config| config.name.clone())
            .collect();
        return Err(ResolveError::CyclicOrUnresolvableDependency { unresolved });
    }

    Ok(weights)
}

/// Extracts the machine name from a link (`name` or `name:alias`).
///
/// An empty name is returned as is and then fails as an unknown dependency.
pub fn link_target<'a>(machine: &str, link: &'a str) -> Result<&'a str, ResolveError> {
    let mut segments = link.split(':');
    let target = segments.next().unwrap_or_default();
    if segments.count() > 1 {
        return Err(ResolveError::MalformedLinkReference {
            machine: machine.to_string(),
            link: link.to_string(),
        });
    }
    Ok(target)
}

/// One dependency list per config, in the same order as `configs`.
fn dependency_lists<'a>(
    configs: &'a [MachineConfig],
    names: &HashSet<&str>,
) -> Result<Vec<Vec<&'a str>>, ResolveError> {
    configs
        .iter()
        .map(|config| {
            let mut deps: Vec<&str> = config.depends_on.iter().map(String::as_str).collect();
            for link in &config.links {
                deps.push(link_target(&config.name, link)?);
            }
            if let Some(unknown) = deps.iter().find(|dep| !names.contains(*dep)) {
                return Err(ResolveError::UnknownDependency {
                    machine: config.name.clone(),
                    dependency: unknown.to_string(),
                });
            }
            Ok(deps)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MachineSource;

    fn machine(name: &str, deps: &[&str]) -> MachineConfig {
        MachineConfig::new(name, MachineSource::recipe("dockerfile", "http://recipes/x"))
            .depends_on(deps.iter().copied())
    }

    fn names(configs: &[MachineConfig]) -> Vec<&str> {
        configs.iter().map(|c| c.name.as_str()).collect()
    }

    fn assert_dependencies_first(configs: &[MachineConfig]) {
        let ordered = order(configs).unwrap();
        let position = |name: &str| ordered.iter().position(|c| c.name == name).unwrap();
        for config in configs {
            for dep in &config.depends_on {
                assert!(
                    position(dep.as_str()) < position(config.name.as_str()),
                    "{dep} must precede {}",
                    config.name
                );
            }
            for link in &config.links {
                let target = link_target(&config.name, link).unwrap();
                assert!(position(target) < position(config.name.as_str()));
            }
        }
    }

    #[test]
    fn test_chain_orders_dependencies_first() {
        let configs = vec![machine("C", &["A", "B"]), machine("B", &["A"]), machine("A", &[])];
        let ordered = order(&configs).unwrap();
        assert_eq!(names(&ordered), ["A", "B", "C"]);
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let configs = vec![
            machine("web", &["db"]),
            machine("worker", &[]),
            machine("db", &[]),
            machine("cache", &[]),
        ];
        let ordered = order(&configs).unwrap();
        assert_eq!(names(&ordered), ["worker", "db", "cache", "web"]);
    }

    #[test]
    fn test_order_is_deterministic() {
        let configs = vec![
            machine("e", &["c", "d"]),
            machine("d", &["a"]),
            machine("c", &["a", "b"]),
            machine("b", &[]),
            machine("a", &[]),
        ];
        let first = order(&configs).unwrap();
        for _ in 0..20 {
            assert_eq!(order(&configs).unwrap(), first);
        }
        assert_dependencies_first(&configs);
    }

    #[test]
    fn test_links_constrain_like_depends_on() {
        let configs = vec![
            machine("app", &[]).links(["db:database", "cache"]),
            machine("db", &[]),
            machine("cache", &["db"]),
        ];
        let weights = weigh(&configs).unwrap();
        assert_eq!(weights["db"], 0);
        assert_eq!(weights["cache"], 1);
        assert_eq!(weights["app"], 2);
        assert_dependencies_first(&configs);
    }

    #[test]
    fn test_two_node_cycle_fails() {
        let configs = vec![machine("A", &["B"]), machine("B", &["A"])];
        let err = order(&configs).unwrap_err();
        assert_eq!(
            err,
            ResolveError::CyclicOrUnresolvableDependency {
                unresolved: vec!["A".into(), "B".into()]
            }
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let configs = vec![machine("solo", &["solo"])];
        assert!(matches!(
            order(&configs),
            Err(ResolveError::CyclicOrUnresolvableDependency { unresolved }) if unresolved == ["solo"]
        ));
    }

    #[test]
    fn test_machines_behind_a_cycle_are_reported() {
        let configs = vec![
            machine("root", &[]),
            machine("x", &["y", "root"]),
            machine("y", &["x"]),
            machine("tail", &["x"]),
        ];
        match weigh(&configs) {
            Err(ResolveError::CyclicOrUnresolvableDependency { unresolved }) => {
                assert_eq!(unresolved, ["x", "y", "tail"]);
            }
            other => panic!("Expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_names_fail_even_when_rankable() {
        let configs = vec![machine("db", &[]), machine("db", &[])];
        assert_eq!(
            order(&configs).unwrap_err(),
            ResolveError::DuplicateMachineName("db".into())
        );
    }

    #[test]
    fn test_duplicate_names_win_over_cycles() {
        let configs = vec![machine("a", &["a"]), machine("a", &[])];
        assert!(matches!(order(&configs), Err(ResolveError::DuplicateMachineName(_))));
    }

    #[test]
    fn test_unknown_dependency_fails_fast() {
        let configs = vec![machine("app", &["ghost"])];
        assert_eq!(
            order(&configs).unwrap_err(),
            ResolveError::UnknownDependency {
                machine: "app".into(),
                dependency: "ghost".into()
            }
        );
    }

    #[test]
    fn test_link_syntax() {
        assert_eq!(link_target("m", "db").unwrap(), "db");
        assert_eq!(link_target("m", "db:alias").unwrap(), "db");
        assert!(matches!(
            link_target("m", "db:alias:extra"),
            Err(ResolveError::MalformedLinkReference { .. })
        ));
        assert_eq!(link_target("m", ":alias").unwrap(), "");
        assert_eq!(link_target("m", "").unwrap(), "");

        let empty = vec![machine("app", &[]).links([":alias"])];
        assert_eq!(
            order(&empty).unwrap_err(),
            ResolveError::UnknownDependency {
                machine: "app".into(),
                dependency: "".into()
            }
        );

        let configs = vec![machine("app", &[]).links(["db:a:b"]), machine("db", &[])];
        assert_eq!(
            order(&configs).unwrap_err(),
            ResolveError::MalformedLinkReference {
                machine: "app".into(),
                link: "db:a:b".into()
            }
        );
    }

    #[test]
    fn test_levels_group_by_rank() {
        let configs = vec![
            machine("api", &["db", "cache"]),
            machine("db", &[]),
            machine("cache", &[]),
            machine("ui", &["api"]),
        ];
        let levels = levels(&configs).unwrap();
        let grouped: Vec<Vec<&str>> = levels.iter().map(|l| names(l)).collect();
        assert_eq!(grouped, vec![vec!["db", "cache"], vec!["api"], vec!["ui"]]);
    }

    #[test]
    fn test_empty_set_orders_to_nothing() {
        assert!(order(&[]).unwrap().is_empty());
        assert!(levels(&[]).unwrap().is_empty());
    }
}
