//! System scheduler — conflict detection and batch computation.
//!
//! Within a stage the scheduler groups systems into **batches** based on
//! their declared access signatures and explicit ordering constraints.
//! Systems within a batch have no conflicts and run in parallel. Batches
//! execute sequentially with a barrier between them.

use std::collections::{BTreeSet, HashMap};

use engine_system::AccessSignature;
use tracing::info;

use crate::error::ConfigError;
use crate::registry::SystemRegistry;
use crate::stage::StageGraph;

/// A registered system as the scheduler sees it.
#[derive(Debug, Clone)]
pub struct RegisteredSystem {
    /// Registration index in the [`SystemRegistry`].
    pub index: usize,
    /// The system name (e.g. `"physics"`).
    pub name: String,
    /// The system's data access requirements.
    pub access: AccessSignature,
    /// Systems this one must run before.
    pub before: Vec<String>,
    /// Systems this one must run after.
    pub after: Vec<String>,
}

/// A batch is a group of systems that can run in parallel (no conflicts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Registration indices of the batch's systems, ascending.
    pub system_indices: Vec<usize>,
}

/// The batches of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSchedule {
    /// Stage name.
    pub name: String,
    /// Batches in execution order.
    pub batches: Vec<Batch>,
}

/// The full execution plan of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    /// Stages in execution order, including stages with no systems.
    pub stages: Vec<StageSchedule>,
}

impl Schedule {
    /// Total number of batches across all stages.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.stages.iter().map(|stage| stage.batches.len()).sum()
    }
}

/// Computes the batches of one stage.
///
/// 1. Explicit `before`/`after` constraints between systems of this stage
///    form a graph; it is ordered topologically, ties broken by registration
///    order then name.
/// 2. In that order, each system is placed in the first batch that comes
///    after every batch holding one of its explicit predecessors and holds
///    no system it conflicts with. A new batch is appended when none fits.
/// 3. Systems within a batch are listed in registration order.
///
/// Constraints naming systems outside `systems` are ignored here.
///
/// # Errors
///
/// Returns [`ConfigError::OrderingCycle`] if the constraints are cyclic.
pub fn compute_batches(stage: &str, systems: &[RegisteredSystem]) -> Result<Vec<Batch>, ConfigError> {
    if systems.is_empty() {
        return Ok(Vec::new());
    }

    let local: HashMap<&str, usize> = systems
        .iter()
        .enumerate()
        .map(|(i, system)| (system.name.as_str(), i))
        .collect();

    // Explicit edges, predecessor -> successor.
    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); systems.len()];
    let mut predecessors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); systems.len()];
    for (i, system) in systems.iter().enumerate() {
        for other in &system.before {
            if let Some(&j) = local.get(other.as_str()) {
                successors[i].insert(j);
                predecessors[j].insert(i);
            }
        }
        for other in &system.after {
            if let Some(&j) = local.get(other.as_str()) {
                successors[j].insert(i);
                predecessors[i].insert(j);
            }
        }
    }

    let order = topological_order(stage, systems, &successors, &predecessors)?;

    let mut placed: Vec<Option<usize>> = vec![None; systems.len()];
    // Local indices per batch.
    let mut batches: Vec<Vec<usize>> = Vec::new();
    for &i in &order {
        let earliest = predecessors[i]
            .iter()
            .filter_map(|&p| placed[p])
            .map(|batch| batch + 1)
            .max()
            .unwrap_or(0);
        let fits = |members: &[usize]| {
            members
                .iter()
                .all(|&j| !systems[i].access.conflicts_with(&systems[j].access))
        };
        let free = (earliest..batches.len()).find(|&b| fits(&batches[b]));
        let batch = match free {
            Some(batch) => batch,
            None => {
                batches.push(Vec::new());
                batches.len() - 1
            }
        };
        batches[batch].push(i);
        placed[i] = Some(batch);
    }

    Ok(batches
        .into_iter()
        .map(|members| {
            let mut system_indices: Vec<usize> =
                members.into_iter().map(|i| systems[i].index).collect();
            system_indices.sort_unstable();
            Batch { system_indices }
        })
        .collect())
}

/// Kahn's algorithm over local indices. The ready set is keyed by
/// (registration index, name) so the order is deterministic.
fn topological_order(
    stage: &str,
    systems: &[RegisteredSystem],
    successors: &[BTreeSet<usize>],
    predecessors: &[BTreeSet<usize>],
) -> Result<Vec<usize>, ConfigError> {
    let key = |i: usize| (systems[i].index, systems[i].name.as_str(), i);

    let mut in_degree: Vec<usize> = predecessors.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<(usize, &str, usize)> = (0..systems.len())
        .filter(|&i| in_degree[i] == 0)
        .map(key)
        .collect();
    let mut order = Vec::with_capacity(systems.len());

    while let Some((_, _, i)) = ready.pop_first() {
        order.push(i);
        for &j in &successors[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.insert(key(j));
            }
        }
    }

    if order.len() < systems.len() {
        return Err(ConfigError::OrderingCycle {
            stage: stage.to_string(),
            systems: find_cycle(systems, predecessors, &in_degree),
        });
    }
    Ok(order)
}

/// Names along one cycle among the systems Kahn's algorithm could not
/// order. Every such system has an unordered predecessor, so walking
/// predecessors must revisit a node.
fn find_cycle(
    systems: &[RegisteredSystem],
    predecessors: &[BTreeSet<usize>],
    in_degree: &[usize],
) -> Vec<String> {
    let blocked = |i: usize| in_degree[i] > 0;
    let Some(start) = (0..systems.len()).find(|&i| blocked(i)) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&next) = predecessors[current].iter().find(|&&p| blocked(p)) else {
            break;
        };
        if let Some(pos) = path.iter().position(|&i| i == next) {
            // `path` was walked backwards; reverse it into constraint order.
            return std::iter::once(next)
                .chain(path[pos..].iter().rev().copied())
                .map(|i| systems[i].name.clone())
                .collect();
        }
        path.push(next);
        current = next;
    }
    path.iter().map(|&i| systems[i].name.clone()).collect()
}

/// Validate every system against the stage graph and each other, then
/// compute the batches of every stage.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownStage`], [`ConfigError::UnknownSystem`],
/// [`ConfigError::SelfConstraint`], [`ConfigError::CrossStageConstraint`] or
/// [`ConfigError::OrderingCycle`].
pub fn build_schedule(stages: &StageGraph, registry: &SystemRegistry) -> Result<Schedule, ConfigError> {
    let mut per_stage: Vec<Vec<RegisteredSystem>> = vec![Vec::new(); stages.len()];

    for (index, runner) in registry.iter().enumerate() {
        let config = runner.config();
        let stage = stages
            .position(&config.stage)
            .ok_or_else(|| ConfigError::UnknownStage(config.stage.clone()))?;

        let constraints = config
            .before
            .iter()
            .map(|other| ("before", other))
            .chain(config.after.iter().map(|other| ("after", other)));
        for (relation, other) in constraints {
            if *other == config.name {
                return Err(ConfigError::SelfConstraint(config.name.clone()));
            }
            let other_config = registry
                .get(other)
                .map(|runner| runner.config())
                .ok_or_else(|| ConfigError::UnknownSystem {
                    system: config.name.clone(),
                    other: other.clone(),
                })?;
            let other_stage = stages
                .position(&other_config.stage)
                .ok_or_else(|| ConfigError::UnknownStage(other_config.stage.clone()))?;
            let contradicts = match relation {
                "before" => other_stage < stage,
                _ => other_stage > stage,
            };
            if contradicts {
                return Err(ConfigError::CrossStageConstraint {
                    system: config.name.clone(),
                    stage: config.stage.clone(),
                    relation,
                    other: other.clone(),
                    other_stage: other_config.stage.clone(),
                });
            }
        }

        per_stage[stage].push(RegisteredSystem {
            index,
            name: config.name.clone(),
            access: config.access.clone(),
            before: config.before.clone(),
            after: config.after.clone(),
        });
    }

    let stages = stages
        .iter()
        .zip(per_stage)
        .map(|(name, systems)| {
            Ok(StageSchedule {
                name: name.to_string(),
                batches: compute_batches(name, &systems)?,
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;
    let schedule = Schedule { stages };

    info!(
        stage_count = schedule.stages.len(),
        batch_count = schedule.batch_count(),
        system_count = registry.len(),
        "schedule rebuilt"
    );
    Ok(schedule)
}
