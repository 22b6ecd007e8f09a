//! Kahn's algorithm with a deterministic tie-break heap (§4.1).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::error::OrchestratorError;
use crate::model::Subtask;

/// Heap key: `(-priority, createdAt, id)`, smallest first. Wrapped in a
/// newtype so `BinaryHeap` (a max-heap) pops the *smallest* key by
/// reversing the derived `Ord`.
struct HeapEntry<'a> {
    task: &'a Subtask,
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.task.id == other.task.id
    }
}
impl Eq for HeapEntry<'_> {}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse the natural "smallest key
        // wins" comparison so `pop()` yields the smallest key.
        let key_self = (std::cmp::Reverse(self.task.priority), self.task.created_at, &self.task.id);
        let key_other = (std::cmp::Reverse(other.task.priority), other.task.created_at, &other.task.id);
        key_other.cmp(&key_self)
    }
}

/// Topologically sorts `tasks` over their full dependency graph (blocking
/// and soft edges both constrain ordering; only blocking edges constrain
/// batch placement, enforced separately in [`super::batch`]).
pub fn topological_sort(tasks: &[Subtask]) -> Result<Vec<Subtask>, OrchestratorError> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }

    let by_id: HashMap<&str, &Subtask> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut in_degree: HashMap<&str, usize> = tasks.iter().map(|t| (t.id.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for task in tasks {
        let mut unique_targets = std::collections::HashSet::new();
        for edge in &task.dependencies {
            if by_id.contains_key(edge.target_id.as_str()) {
                unique_targets.insert(edge.target_id.as_str());
            }
        }
        *in_degree.get_mut(task.id.as_str()).unwrap() = unique_targets.len();
        for target in unique_targets {
            dependents.entry(target).or_default().push(task.id.as_str());
        }
    }

    let mut heap: BinaryHeap<HeapEntry> = tasks
        .iter()
        .filter(|t| in_degree[t.id.as_str()] == 0)
        .map(|task| HeapEntry { task })
        .collect();

    let mut ordered = Vec::with_capacity(tasks.len());
    while let Some(HeapEntry { task }) = heap.pop() {
        ordered.push(task.clone());
        if let Some(deps) = dependents.get(task.id.as_str()) {
            for &dependent_id in deps {
                let degree = in_degree.get_mut(dependent_id).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    heap.push(HeapEntry {
                        task: by_id[dependent_id],
                    });
                }
            }
        }
    }

    if ordered.len() != tasks.len() {
        return Err(OrchestratorError::CycleUnresolvable {
            message: format!(
                "topological sort only ordered {}/{} subtasks; a cycle remains",
                ordered.len(),
                tasks.len()
            ),
        });
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DependencyKind, Priority, SubtaskType};

    #[test]
    fn respects_blocking_dependency_order() {
        let a = Subtask::new("wf", "A", "a", SubtaskType::Research, Priority::Low);
        let b = Subtask::new("wf", "B", "b", SubtaskType::Research, Priority::Low)
            .with_dependency(a.id.clone(), DependencyKind::Blocking);
        let ordered = topological_sort(&[b.clone(), a.clone()]).unwrap();
        assert_eq!(ordered[0].id, a.id);
        assert_eq!(ordered[1].id, b.id);
    }

    #[test]
    fn higher_priority_breaks_ties_among_independent_tasks() {
        let low = Subtask::new("wf", "Low", "x", SubtaskType::Research, Priority::Low);
        let critical = Subtask::new("wf", "Crit", "x", SubtaskType::Research, Priority::Critical);
        let ordered = topological_sort(&[low.clone(), critical.clone()]).unwrap();
        assert_eq!(ordered[0].id, critical.id);
        assert_eq!(ordered[1].id, low.id);
    }

    #[test]
    fn remaining_cycle_yields_cycle_unresolvable() {
        let mut a = Subtask::new("wf", "A", "a", SubtaskType::Research, Priority::Low);
        let mut b = Subtask::new("wf", "B", "b", SubtaskType::Research, Priority::Low);
        a.dependencies.push(crate::model::DependencyEdge {
            target_id: b.id.clone(),
            kind: DependencyKind::Blocking,
        });
        b.dependencies.push(crate::model::DependencyEdge {
            target_id: a.id.clone(),
            kind: DependencyKind::Blocking,
        });
        let err = topological_sort(&[a, b]).unwrap_err();
        assert!(matches!(err, OrchestratorError::CycleUnresolvable { .. }));
    }

    #[test]
    fn empty_input_returns_empty_order() {
        assert!(topological_sort(&[]).unwrap().is_empty());
    }
}
