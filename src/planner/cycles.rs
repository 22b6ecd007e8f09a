//! Cycle detection and resolution over the subtask dependency graph (§4.1).

use std::collections::{HashMap, HashSet};

use crate::model::{DependencyKind, Priority, Subtask};

/// Output of [`detect_cycles`]: each cycle as an ordered list of subtask
/// ids, plus the set of all subtask ids touched by any cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycles: Vec<Vec<String>>,
    pub affected: HashSet<String>,
}

/// One edge removed during cycle resolution, for diagnostics/logging.
#[derive(Debug, Clone)]
pub struct ResolvedEdgeRemoval {
    pub source_id: String,
    pub target_id: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

/// Iterative DFS with white/grey/black coloring (§4.1). On reentry into a
/// grey node, the cycle is the current path sliced from that node's first
/// occurrence.
pub fn detect_cycles(tasks: &[Subtask]) -> CycleReport {
    let mut colors: HashMap<&str, Color> = tasks.iter().map(|t| (t.id.as_str(), Color::White)).collect();
    let mut cycles = Vec::new();
    let mut affected = HashSet::new();

    // Deterministic start order: iterate tasks as given (already stable
    // from the caller; planner feeds subtasks in declaration order).
    for start in tasks {
        if colors.get(start.id.as_str()) != Some(&Color::White) {
            continue;
        }
        // Explicit stack of (node, next-dependency-index) frames, since a
        // recursive DFS would defeat the point of an iterative traversal
        // over a graph that may be deep or adversarially cyclic.
        let mut stack: Vec<(&str, usize)> = vec![(start.id.as_str(), 0)];
        let mut path: Vec<&str> = vec![start.id.as_str()];
        colors.insert(start.id.as_str(), Color::Grey);

        while let Some((node_id, idx)) = stack.last().copied() {
            let node = tasks.iter().find(|t| t.id == node_id).expect("node must exist");
            if idx >= node.dependencies.len() {
                colors.insert(node_id, Color::Black);
                stack.pop();
                path.pop();
                continue;
            }
            stack.last_mut().unwrap().1 += 1;
            let target_id = node.dependencies[idx].target_id.as_str();
            let Some(&target_color) = colors.get(target_id) else {
                // Dangling dependency reference: no such subtask, ignore.
                continue;
            };
            match target_color {
                Color::White => {
                    colors.insert(target_id, Color::Grey);
                    path.push(target_id);
                    stack.push((target_id, 0));
                }
                Color::Grey => {
                    if let Some(start_idx) = path.iter().position(|&id| id == target_id) {
                        let cycle: Vec<String> = path[start_idx..].iter().map(|s| s.to_string()).collect();
                        for id in &cycle {
                            affected.insert(id.clone());
                        }
                        cycles.push(cycle);
                    }
                }
                Color::Black => {}
            }
        }
    }

    CycleReport { cycles, affected }
}

fn criticality_score(kind: DependencyKind, priority: Priority) -> u32 {
    kind.criticality_base() + priority.criticality_contribution()
}

/// For each detected cycle, remove the single lowest-criticality edge
/// along it; ties broken by earliest lexicographic source id (§4.1).
/// Returns the rewritten tasks plus the edges actually removed, for
/// diagnostics/logging.
pub fn resolve_cycles(tasks: &[Subtask], report: &CycleReport) -> (Vec<Subtask>, Vec<ResolvedEdgeRemoval>) {
    let mut tasks = tasks.to_vec();
    let by_id: HashMap<String, usize> = tasks.iter().enumerate().map(|(i, t)| (t.id.clone(), i)).collect();
    let mut removed = Vec::new();

    for cycle in &report.cycles {
        let mut worst: Option<(u32, &str, usize)> = None; // (score, source_id, dep_index)
        for window in cycle.windows(2).chain(std::iter::once(
            [cycle[cycle.len() - 1].as_str(), cycle[0].as_str()].as_slice(),
        )) {
            let source_id = window[0];
            let target_id = window[1];
            let Some(&source_idx) = by_id.get(source_id) else { continue };
            let source = &tasks[source_idx];
            let Some(dep_idx) = source.dependencies.iter().position(|e| e.target_id == target_id) else {
                continue;
            };
            let score = criticality_score(source.dependencies[dep_idx].kind, source.priority);
            let candidate = (score, source_id, dep_idx);
            worst = Some(match worst {
                None => candidate,
                Some(current) => {
                    if candidate.0 < current.0
                        || (candidate.0 == current.0 && candidate.1 < current.1)
                    {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }

        if let Some((_, source_id, dep_idx)) = worst {
            if let Some(&idx) = by_id.get(source_id) {
                let edge = tasks[idx].dependencies.remove(dep_idx);
                removed.push(ResolvedEdgeRemoval {
                    source_id: source_id.to_string(),
                    target_id: edge.target_id,
                });
            }
        }
    }

    (tasks, removed)
}
