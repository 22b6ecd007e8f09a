//! Dependency-aware batcher and topological scheduler (C5, §4.1).

mod batch;
mod cycles;
mod toposort;

pub use batch::{Batch, BatchingConfig, OversizedTaskWarning};
pub use cycles::{CycleReport, ResolvedEdgeRemoval};
pub use toposort::topological_sort;

use crate::error::OrchestratorError;
use crate::model::Subtask;

/// Runs the full planning pipeline: detect cycles, resolve them, topologically
/// sort, then pack into batches. Mirrors the controller's `StartExecution`
/// step 2 call into C5 (§4.7).
pub struct Planner {
    pub config: BatchingConfig,
}

/// Result of a complete planning pass, surfaced to the controller.
pub struct PlanResult {
    pub batches: Vec<Batch>,
    pub cycle_report: CycleReport,
    pub removed_edges: Vec<ResolvedEdgeRemoval>,
    pub oversized_warnings: Vec<OversizedTaskWarning>,
}

impl Planner {
    pub fn new(config: BatchingConfig) -> Self {
        Self { config }
    }

    pub fn plan(&self, tasks: &[Subtask]) -> Result<PlanResult, OrchestratorError> {
        let cycle_report = cycles::detect_cycles(tasks);
        let (resolved_tasks, removed_edges) = if cycle_report.cycles.is_empty() {
            (tasks.to_vec(), Vec::new())
        } else {
            cycles::resolve_cycles(tasks, &cycle_report)
        };

        let still_cyclic = cycles::detect_cycles(&resolved_tasks);
        if !still_cyclic.cycles.is_empty() {
            return Err(OrchestratorError::CycleUnresolvable {
                message: format!(
                    "{} cycle(s) remain unresolved after edge removal",
                    still_cyclic.cycles.len()
                ),
            });
        }

        let ordered = toposort::topological_sort(&resolved_tasks)?;
        let (batches, oversized_warnings) = batch::pack(&ordered, &self.config);
        let batches = if self.config.balance_workloads {
            batch::balance_workloads(batches, &ordered)
        } else {
            batches
        };

        Ok(PlanResult {
            batches,
            cycle_report,
            removed_edges,
            oversized_warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DependencyKind, Priority, Subtask, SubtaskType};

    #[test]
    fn happy_path_three_dependent_subtasks_batch_in_order() {
        let a = Subtask::new("wf", "A", "research", SubtaskType::Research, Priority::Medium);
        let b = Subtask::new("wf", "B", "analysis", SubtaskType::Analysis, Priority::Medium)
            .with_dependency(a.id.clone(), DependencyKind::Blocking);
        let c = Subtask::new("wf", "C", "creation", SubtaskType::Creation, Priority::Medium)
            .with_dependency(b.id.clone(), DependencyKind::Blocking);

        let planner = Planner::new(BatchingConfig::default());
        let plan = planner.plan(&[a.clone(), b.clone(), c.clone()]).unwrap();

        assert_eq!(plan.batches.len(), 3);
        assert_eq!(plan.batches[0].tasks[0].id, a.id);
        assert_eq!(plan.batches[1].tasks[0].id, b.id);
        assert_eq!(plan.batches[2].tasks[0].id, c.id);
    }

    #[test]
    fn empty_subtask_set_yields_zero_batches() {
        let planner = Planner::new(BatchingConfig::default());
        let plan = planner.plan(&[]).unwrap();
        assert!(plan.batches.is_empty());
    }

    #[test]
    fn cycle_is_resolved_by_removing_lowest_criticality_edge() {
        let p = Subtask::new("wf", "P", "p", SubtaskType::Research, Priority::Medium);
        let q = Subtask::new("wf", "Q", "q", SubtaskType::Research, Priority::Medium)
            .with_dependency(p.id.clone(), DependencyKind::Blocking);
        let p = p.with_dependency(q.id.clone(), DependencyKind::Soft);

        let planner = Planner::new(BatchingConfig::default());
        let plan = planner.plan(&[p.clone(), q.clone()]).unwrap();

        assert_eq!(plan.cycle_report.cycles.len(), 1);
        // P -> Q(soft) gets removed (lower criticality than Q -> P blocking),
        // so P should be scheduled before Q.
        assert_eq!(plan.batches[0].tasks[0].id, p.id);
        assert_eq!(plan.batches[1].tasks[0].id, q.id);
        assert_eq!(plan.removed_edges.len(), 1);
        assert_eq!(plan.removed_edges[0].source_id, p.id);
        assert_eq!(plan.removed_edges[0].target_id, q.id);
    }
}
