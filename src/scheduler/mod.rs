//! Dependency-aware partitioning of build steps into execution groups
//!
//! A layered topological sort (Kahn's algorithm, one frontier at a time):
//! group 0 holds every step without prerequisites, group k every remaining
//! step whose prerequisites all sit in groups `0..k`. Groups run strictly in
//! order; steps inside a group may run concurrently.
//!
//! Cycles are configuration errors and are reported before anything runs.

use crate::steps::BuildStep;
use crate::util::kv::{join_indices, KvWriter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: usize, dependency: usize },

    #[error("step {0} depends on itself")]
    SelfDependency(usize),

    #[error("dependency cycle between steps {}", join_indices(.0))]
    Cycle(Vec<usize>),

    #[error("step index {found} does not match its position {expected}")]
    IndexMismatch { expected: usize, found: usize },
}

/// Step indices that may run concurrently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionGroup {
    pub steps: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub groups: Vec<ExecutionGroup>,
}

impl ExecutionPlan {
    /// All step indices in the order they become eligible
    pub fn execution_order(&self) -> Vec<usize> {
        self.groups.iter().flat_map(|g| g.steps.iter().copied()).collect()
    }

    pub fn step_count(&self) -> usize {
        self.groups.iter().map(|g| g.steps.len()).sum()
    }

    /// Group number of every step, keyed by step index
    pub fn group_of(&self) -> BTreeMap<usize, usize> {
        self.groups
            .iter()
            .enumerate()
            .flat_map(|(g, group)| group.steps.iter().map(move |&s| (s, g)))
            .collect()
    }

    /// `parallel_groups_count`, `parallel_groups_<i>_steps`, `execution_order_steps`
    pub fn to_kv(&self) -> String {
        let mut w = KvWriter::new();
        w.field("parallel_groups_count", self.groups.len());
        for (i, group) in self.groups.iter().enumerate() {
            w.field(&format!("parallel_groups_{}_steps", i), join_indices(&group.steps));
        }
        w.field("execution_order_steps", join_indices(&self.execution_order()));
        w.finish()
    }
}

/// Computes the execution plan for `steps`
///
/// `steps[i].index` must equal `i`; the step parser guarantees this.
pub fn plan(steps: &[BuildStep]) -> Result<ExecutionPlan, SchedulerError> {
    for (position, step) in steps.iter().enumerate() {
        if step.index != position {
            return Err(SchedulerError::IndexMismatch {
                expected: position,
                found: step.index,
            });
        }
        for &dep in &step.dependencies {
            if dep == step.index {
                return Err(SchedulerError::SelfDependency(dep));
            }
            if dep >= steps.len() {
                return Err(SchedulerError::UnknownDependency {
                    step: step.index,
                    dependency: dep,
                });
            }
        }
    }

    let mut in_degree: Vec<usize> = steps.iter().map(|s| s.dependencies.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for step in steps {
        for &dep in &step.dependencies {
            dependents[dep].push(step.index);
        }
    }

    let mut frontier: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &degree)| degree == 0)
        .map(|(idx, _)| idx)
        .collect();

    let mut groups = Vec::new();
    let mut placed = 0;

    while !frontier.is_empty() {
        let current: Vec<usize> = frontier.iter().copied().collect();
        let mut next = BTreeSet::new();

        for &idx in &current {
            for &dependent in &dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    next.insert(dependent);
                }
            }
        }

        placed += current.len();
        groups.push(ExecutionGroup { steps: current });
        frontier = next;
    }

    if placed < steps.len() {
        let stuck: Vec<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree > 0)
            .map(|(idx, _)| idx)
            .collect();
        return Err(SchedulerError::Cycle(stuck));
    }

    Ok(ExecutionPlan { groups })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(index: usize, deps: &[usize]) -> BuildStep {
        deps.iter().fold(
            BuildStep::new(index, format!("step-{}", index), "alpine").with_command("true"),
            |s, &d| s.depends_on(d),
        )
    }

    fn assert_layered(steps: &[BuildStep], plan: &ExecutionPlan) {
        let group_of = plan.group_of();
        assert_eq!(group_of.len(), steps.len(), "every step in exactly one group");
        assert_eq!(plan.step_count(), steps.len());
        for s in steps {
            for d in &s.dependencies {
                assert!(group_of[d] < group_of[&s.index]);
            }
        }
    }

    #[test]
    fn test_independent_steps_share_one_group() {
        let steps = vec![step(0, &[]), step(1, &[])];
        let plan = plan(&steps).unwrap();
        assert_eq!(plan.groups, vec![ExecutionGroup { steps: vec![0, 1] }]);
    }

    #[test]
    fn test_linear_chain() {
        let steps = vec![step(0, &[]), step(1, &[0])];
        let plan = plan(&steps).unwrap();
        assert_eq!(plan.groups.len(), 2);
        assert_eq!(plan.groups[0].steps, vec![0]);
        assert_eq!(plan.groups[1].steps, vec![1]);
    }

    #[test]
    fn test_diamond() {
        let steps = vec![step(0, &[]), step(1, &[0]), step(2, &[0]), step(3, &[1, 2])];
        let plan = plan(&steps).unwrap();
        assert_eq!(plan.groups.len(), 3);
        assert_eq!(plan.groups[1].steps, vec![1, 2]);
        assert_eq!(plan.execution_order(), vec![0, 1, 2, 3]);
        assert_layered(&steps, &plan);
    }

    #[test]
    fn test_uneven_depths_land_in_earliest_group() {
        // 3 only needs 0, so it runs alongside 1 rather than after 2
        let steps = vec![step(0, &[]), step(1, &[0]), step(2, &[1]), step(3, &[0])];
        let plan = plan(&steps).unwrap();
        assert_eq!(plan.groups[1].steps, vec![1, 3]);
        assert_eq!(plan.groups[2].steps, vec![2]);
        assert_layered(&steps, &plan);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let steps = vec![step(0, &[]), step(1, &[2]), step(2, &[1])];
        assert_eq!(plan(&steps), Err(SchedulerError::Cycle(vec![1, 2])));
    }

    #[test]
    fn test_steps_behind_a_cycle_are_reported_too() {
        let steps = vec![step(0, &[1]), step(1, &[0]), step(2, &[1])];
        assert_eq!(plan(&steps), Err(SchedulerError::Cycle(vec![0, 1, 2])));
    }

    #[test]
    fn test_self_dependency() {
        let steps = vec![step(0, &[0])];
        assert_eq!(plan(&steps), Err(SchedulerError::SelfDependency(0)));
    }

    #[test]
    fn test_unknown_dependency() {
        let steps = vec![step(0, &[5])];
        assert_eq!(
            plan(&steps),
            Err(SchedulerError::UnknownDependency {
                step: 0,
                dependency: 5
            })
        );
    }

    #[test]
    fn test_empty_input_is_empty_plan() {
        let plan = plan(&[]).unwrap();
        assert!(plan.groups.is_empty());
        assert_eq!(plan.to_kv(), "parallel_groups_count=0\nexecution_order_steps=\n");
    }

    #[test]
    fn test_to_kv() {
        let steps = vec![step(0, &[]), step(1, &[]), step(2, &[0, 1])];
        let plan = plan(&steps).unwrap();
        assert_eq!(
            plan.to_kv(),
            "parallel_groups_count=2\n\
             parallel_groups_0_steps=0,1\n\
             parallel_groups_1_steps=2\n\
             execution_order_steps=0,1,2\n"
        );
    }

    #[test]
    fn test_wide_random_dags_are_layered() {
        // Deterministic pseudo-random DAGs: edges only point to lower indices
        let mut seed: u64 = 0x5eed;
        for size in [1usize, 5, 20, 60] {
            let steps: Vec<BuildStep> = (0..size)
                .map(|i| {
                    let mut s = step(i, &[]);
                    for d in 0..i {
                        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                        if (seed >> 33) % 4 == 0 {
                            s = s.depends_on(d);
                        }
                    }
                    s
                })
                .collect();
            let plan = plan(&steps).unwrap();
            assert_layered(&steps, &plan);
        }
    }
}
