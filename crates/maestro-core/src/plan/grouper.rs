//! Dependency grouper - Kahn-style topological leveling.
//!
//! Converts `(execution_plan, dependencies)` into an ordered sequence of
//! parallel-safe groups: each round emits the set of agents whose unsatisfied
//! dependencies are empty, removes them, and iterates. A round that emits
//! nothing while agents remain means the graph has a cycle.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EngineError, EngineResult};

/// Levelize a plan into parallel groups.
///
/// Dependencies naming agents outside the plan are ignored; they cannot be
/// satisfied by this run and do not gate execution. Ties within a level
/// follow the plan order, which the group's set form preserves implicitly
/// (the executor derives emission order from the plan).
pub fn levelize(
    plan: &[String],
    dependencies: &BTreeMap<String, BTreeSet<String>>,
) -> EngineResult<Vec<BTreeSet<String>>> {
    let in_plan: BTreeSet<&str> = plan.iter().map(String::as_str).collect();
    let mut remaining: Vec<&str> = plan.iter().map(String::as_str).collect();
    let mut satisfied: BTreeSet<&str> = BTreeSet::new();
    let mut groups: Vec<BTreeSet<String>> = Vec::new();

    while !remaining.is_empty() {
        let level: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|agent| {
                dependencies
                    .get(*agent)
                    .map(|deps| {
                        deps.iter()
                            .filter(|d| in_plan.contains(d.as_str()))
                            .all(|d| satisfied.contains(d.as_str()))
                    })
                    .unwrap_or(true)
            })
            .collect();

        if level.is_empty() {
            return Err(EngineError::CyclicPlan(
                remaining.iter().map(|a| a.to_string()).collect(),
            ));
        }

        satisfied.extend(level.iter().copied());
        remaining.retain(|agent| !satisfied.contains(agent));
        groups.push(level.into_iter().map(String::from).collect());
    }

    Ok(groups)
}

/// Check that `groups` is a valid levelization of `(plan, dependencies)`:
/// groups are pairwise disjoint, their union equals the plan set, and every
/// agent's in-plan dependencies sit in a strictly earlier group.
pub fn validate_levelization(
    plan: &[String],
    dependencies: &BTreeMap<String, BTreeSet<String>>,
    groups: &[BTreeSet<String>],
) -> Result<(), String> {
    let plan_set: BTreeSet<&str> = plan.iter().map(String::as_str).collect();

    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for group in groups {
        for agent in group {
            if !seen.insert(agent.as_str()) {
                return Err(format!("agent {agent} appears in more than one group"));
            }
        }
    }
    if seen != plan_set {
        return Err("union of parallel groups must equal the execution plan".into());
    }

    let mut earlier: BTreeSet<&str> = BTreeSet::new();
    for group in groups {
        for agent in group {
            if let Some(deps) = dependencies.get(agent.as_str()) {
                for dep in deps {
                    if plan_set.contains(dep.as_str()) && !earlier.contains(dep.as_str()) {
                        return Err(format!(
                            "agent {agent} depends on {dep}, which is not in an earlier group"
                        ));
                    }
                }
            }
        }
        earlier.extend(group.iter().map(String::as_str));
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
