//! Greedy dependency-respecting batch packing and workload balancing (§4.1).

use serde::{Deserialize, Serialize};

use crate::model::Subtask;

/// Batching tunables from §6's configuration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    pub max_batch_size: usize,
    pub max_tokens_per_batch: u64,
    pub respect_dependencies: bool,
    pub balance_workloads: bool,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            max_tokens_per_batch: 8000,
            respect_dependencies: true,
            balance_workloads: false,
        }
    }
}

/// A group of subtasks dispatched together, sharing no unmet blocking
/// dependency against each other.
#[derive(Debug, Clone)]
pub struct Batch {
    pub tasks: Vec<Subtask>,
    pub token_estimate: u64,
}

/// A subtask whose token estimate alone exceeds `maxTokensPerBatch`; it
/// still gets its own batch, but is reported as a warning, not an error.
#[derive(Debug, Clone)]
pub struct OversizedTaskWarning {
    pub subtask_id: String,
    pub token_estimate: u64,
}

/// Greedy pack per §4.1's `Batch` operation.
pub fn pack(ordered: &[Subtask], config: &BatchingConfig) -> (Vec<Batch>, Vec<OversizedTaskWarning>) {
    let mut batches: Vec<Batch> = Vec::new();
    let mut warnings = Vec::new();
    let mut sealed_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut current: Vec<Subtask> = Vec::new();
    let mut current_tokens: u64 = 0;

    for task in ordered {
        let token_estimate = task.token_estimate();

        if token_estimate > config.max_tokens_per_batch {
            if !current.is_empty() {
                for t in &current {
                    sealed_ids.insert(t.id.clone());
                }
                batches.push(Batch {
                    tasks: std::mem::take(&mut current),
                    token_estimate: current_tokens,
                });
                current_tokens = 0;
            }
            warnings.push(OversizedTaskWarning {
                subtask_id: task.id.clone(),
                token_estimate,
            });
            sealed_ids.insert(task.id.clone());
            batches.push(Batch {
                tasks: vec![task.clone()],
                token_estimate,
            });
            continue;
        }

        let blocking_ok = !config.respect_dependencies
            || task.blocking_dependencies().all(|dep| sealed_ids.contains(dep));
        let size_ok = current.len() < config.max_batch_size;
        let token_ok = current_tokens + token_estimate <= config.max_tokens_per_batch;

        if size_ok && token_ok && blocking_ok {
            current.push(task.clone());
            current_tokens += token_estimate;
        } else {
            if !current.is_empty() {
                for t in &current {
                    sealed_ids.insert(t.id.clone());
                }
                batches.push(Batch {
                    tasks: std::mem::take(&mut current),
                    token_estimate: current_tokens,
                });
            }
            current.push(task.clone());
            current_tokens = token_estimate;
        }
    }

    if !current.is_empty() {
        batches.push(Batch {
            tasks: current,
            token_estimate: current_tokens,
        });
    }

    (batches, warnings)
}

fn batch_index_of(batches: &[Batch], subtask_id: &str) -> Option<usize> {
    batches.iter().position(|b| b.tasks.iter().any(|t| t.id == subtask_id))
}

/// Moves the last task of the heaviest batch into the lightest, only when
/// doing so does not violate blocking dependency order, capped at 10
/// iterations (§4.1).
pub fn balance_workloads(mut batches: Vec<Batch>, all_tasks: &[Subtask]) -> Vec<Batch> {
    if batches.len() < 2 {
        return batches;
    }

    for _ in 0..10 {
        let loads: Vec<u64> = batches.iter().map(|b| b.token_estimate).collect();
        let Some((heavy_idx, &heavy)) = loads.iter().enumerate().max_by_key(|(_, v)| **v) else {
            break;
        };
        let Some((light_idx, &light)) = loads.iter().enumerate().min_by_key(|(_, v)| **v) else {
            break;
        };
        if heavy_idx == light_idx || light == 0 || (heavy as f64) <= 1.2 * (light as f64) {
            break;
        }

        let Some(moving_task) = batches[heavy_idx].tasks.last().cloned() else {
            break;
        };

        let min_allowed = moving_task
            .blocking_dependencies()
            .filter_map(|dep_id| batch_index_of(&batches, dep_id))
            .max()
            .map(|i| i + 1)
            .unwrap_or(0);

        let max_allowed = all_tasks
            .iter()
            .filter(|t| t.blocking_dependencies().any(|d| d == moving_task.id))
            .filter_map(|t| batch_index_of(&batches, &t.id))
            .min()
            .map(|i| i.saturating_sub(1))
            .unwrap_or(batches.len() - 1);

        if light_idx >= min_allowed && light_idx <= max_allowed {
            let moved_tokens = moving_task.token_estimate();
            batches[heavy_idx].tasks.pop();
            batches[heavy_idx].token_estimate -= moved_tokens;
            batches[light_idx].tasks.push(moving_task);
            batches[light_idx].token_estimate += moved_tokens;
        } else {
            // No legal move would shrink the imbalance; stop rather than
            // spin through the remaining iterations.
            break;
        }
    }

    batches.retain(|b| !b.tasks.is_empty());
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DependencyKind, Priority, SubtaskType};

    #[test]
    fn oversized_task_gets_its_own_batch_and_a_warning() {
        let mut config = BatchingConfig::default();
        config.max_tokens_per_batch = 10;
        let huge = Subtask::new(
            "wf",
            "huge",
            "x".repeat(1000),
            SubtaskType::Research,
            Priority::Low,
        );
        let (batches, warnings) = pack(&[huge.clone()], &config);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].tasks.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].subtask_id, huge.id);
    }

    #[test]
    fn max_batch_size_seals_and_starts_a_new_batch() {
        let mut config = BatchingConfig::default();
        config.max_batch_size = 2;
        config.max_tokens_per_batch = 1_000_000;
        let tasks: Vec<Subtask> = (0..5)
            .map(|i| Subtask::new("wf", format!("t{i}"), "d", SubtaskType::Research, Priority::Low))
            .collect();
        let (batches, _) = pack(&tasks, &config);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].tasks.len(), 2);
        assert_eq!(batches[2].tasks.len(), 1);
    }

    #[test]
    fn blocking_predecessor_in_current_batch_forces_a_seal() {
        let config = BatchingConfig::default();
        let a = Subtask::new("wf", "A", "d", SubtaskType::Research, Priority::Low);
        let b = Subtask::new("wf", "B", "d", SubtaskType::Research, Priority::Low)
            .with_dependency(a.id.clone(), DependencyKind::Blocking);
        let (batches, _) = pack(&[a.clone(), b.clone()], &config);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].tasks[0].id, a.id);
        assert_eq!(batches[1].tasks[0].id, b.id);
    }
}
