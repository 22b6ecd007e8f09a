//! Assembles `ReintegrationData` into a final structured document (C10, §4.9).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{Subtask, SubtaskType};
use crate::planner::Batch;
use crate::store::{BatchMetadata, ExecutionLevel, ReintegrationData};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SectioningStrategy {
    ByType,
    ByDependencyLevel,
    ByExecutionOrder,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Markdown,
    Html,
    Plain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReintegrationConfig {
    pub strategy: SectioningStrategy,
    pub format: OutputFormat,
    /// Per-content-block cap; truncation always lands on the last newline
    /// boundary inside the budget rather than mid-line.
    pub max_content_length: Option<usize>,
}

impl Default for ReintegrationConfig {
    fn default() -> Self {
        Self {
            strategy: SectioningStrategy::ByExecutionOrder,
            format: OutputFormat::Markdown,
            max_content_length: None,
        }
    }
}

const TYPE_ORDER: [SubtaskType; 4] = [
    SubtaskType::Research,
    SubtaskType::Analysis,
    SubtaskType::Creation,
    SubtaskType::Validation,
];

fn type_label(t: SubtaskType) -> &'static str {
    match t {
        SubtaskType::Research => "Research",
        SubtaskType::Analysis => "Analysis",
        SubtaskType::Creation => "Creation",
        SubtaskType::Validation => "Validation",
    }
}

/// One rendered section: a title plus the subtask ids placed under it, in
/// render order.
struct Section<'a> {
    title: String,
    subtask_ids: Vec<&'a str>,
}

/// Assembles a workflow's persisted results into one of {markdown, html,
/// plain}. Consumes a `Subtask` slice alongside `ReintegrationData` since the
/// store's result rows don't themselves carry subtask type or title (§4.9's
/// by-type sectioning needs both).
pub struct Reintegrator {
    config: ReintegrationConfig,
}

impl Reintegrator {
    pub fn new(config: ReintegrationConfig) -> Self {
        Self { config }
    }

    pub fn compose(&self, data: &ReintegrationData, subtasks: &[Subtask]) -> String {
        let subtasks_by_id: HashMap<&str, &Subtask> = subtasks.iter().map(|s| (s.id.as_str(), s)).collect();
        let finals = final_results_by_subtask(data);

        let sections = match self.config.strategy {
            SectioningStrategy::ByType => self.sections_by_type(&finals, &subtasks_by_id),
            SectioningStrategy::ByDependencyLevel => self.sections_by_dependency_level(data, &finals),
            SectioningStrategy::ByExecutionOrder => self.sections_by_execution_order(data, &finals),
        };

        let mut doc = String::new();
        doc.push_str(&self.header(&data.workflow_id, data));

        for section in sections {
            if section.subtask_ids.is_empty() {
                continue;
            }
            doc.push_str(&self.section_header(&section.title));
            for subtask_id in section.subtask_ids {
                let Some(result) = finals.get(subtask_id) else { continue };
                let title = subtasks_by_id.get(subtask_id).map(|s| s.title.as_str()).unwrap_or(subtask_id);
                doc.push_str(&self.content_block(title, &self.truncate(&result.content)));
                if !result.errors.is_empty() {
                    for message in &result.errors {
                        doc.push_str(&self.error_block(message));
                    }
                }
            }
        }

        doc.push_str(&self.footer());
        doc
    }

    fn sections_by_type<'a>(
        &self,
        finals: &HashMap<&'a str, &'a crate::model::SubtaskResult>,
        subtasks_by_id: &HashMap<&'a str, &'a Subtask>,
    ) -> Vec<Section<'a>> {
        TYPE_ORDER
            .iter()
            .map(|&t| {
                let mut ids: Vec<&str> = finals
                    .keys()
                    .filter(|id| subtasks_by_id.get(*id).map(|s| s.subtask_type) == Some(t))
                    .copied()
                    .collect();
                ids.sort_by_key(|id| finals.get(id).map(|r| r.execution_order).unwrap_or(0));
                Section {
                    title: type_label(t).to_string(),
                    subtask_ids: ids,
                }
            })
            .collect()
    }

    fn sections_by_dependency_level<'a>(
        &self,
        data: &'a ReintegrationData,
        finals: &HashMap<&'a str, &'a crate::model::SubtaskResult>,
    ) -> Vec<Section<'a>> {
        let mut by_level: HashMap<usize, Vec<&str>> = HashMap::new();
        for level in &data.execution_levels {
            if finals.contains_key(level.subtask_id.as_str()) {
                by_level.entry(level.level).or_default().push(level.subtask_id.as_str());
            }
        }
        let mut levels: Vec<usize> = by_level.keys().copied().collect();
        levels.sort_unstable();

        levels
            .into_iter()
            .map(|level| {
                let mut ids = by_level.remove(&level).unwrap_or_default();
                ids.sort_by_key(|id| finals.get(id).map(|r| r.execution_order).unwrap_or(0));
                Section {
                    title: format!("Level {level}"),
                    subtask_ids: ids,
                }
            })
            .collect()
    }

    fn sections_by_execution_order<'a>(
        &self,
        data: &'a ReintegrationData,
        finals: &HashMap<&'a str, &'a crate::model::SubtaskResult>,
    ) -> Vec<Section<'a>> {
        let mut batches: Vec<&BatchMetadata> = data.batches.iter().collect();
        batches.sort_by_key(|b| b.batch_index);

        batches
            .into_iter()
            .map(|batch| {
                let mut ids: Vec<&str> = batch
                    .subtask_ids
                    .iter()
                    .map(|s| s.as_str())
                    .filter(|id| finals.contains_key(id))
                    .collect();
                ids.sort_by_key(|id| finals.get(id).map(|r| r.execution_order).unwrap_or(0));
                Section {
                    title: format!("Batch {}", batch.batch_index),
                    subtask_ids: ids,
                }
            })
            .collect()
    }

    fn truncate(&self, content: &str) -> std::borrow::Cow<'_, str> {
        match self.config.max_content_length {
            Some(limit) if content.len() > limit => {
                // `limit` is a byte offset that may fall inside a multibyte
                // codepoint; snap down to the nearest char boundary before
                // slicing so arbitrary valid UTF-8 agent output never panics.
                let char_safe_limit = content
                    .char_indices()
                    .map(|(i, c)| i + c.len_utf8())
                    .take_while(|&end| end <= limit)
                    .last()
                    .unwrap_or(0);
                let prefix = &content[..char_safe_limit];
                let boundary = prefix.rfind('\n').unwrap_or(char_safe_limit);
                std::borrow::Cow::Owned(format!("{}\n[truncated]", &content[..boundary]))
            }
            _ => std::borrow::Cow::Borrowed(content),
        }
    }

    fn header(&self, workflow_id: &str, data: &ReintegrationData) -> String {
        let summary = &data.summary;
        match self.config.format {
            OutputFormat::Markdown => format!(
                "# Workflow {workflow_id}\n\n{}/{} subtasks succeeded ({} failed, avg {:.0}ms)\n\n",
                summary.succeeded, summary.total, summary.failed, summary.avg_duration_ms
            ),
            OutputFormat::Html => format!(
                "<html><body><h1>Workflow {workflow_id}</h1><p>{}/{} subtasks succeeded ({} failed, avg {:.0}ms)</p>\n",
                summary.succeeded, summary.total, summary.failed, summary.avg_duration_ms
            ),
            OutputFormat::Plain => format!(
                "Workflow {workflow_id}\n{}/{} subtasks succeeded ({} failed, avg {:.0}ms)\n\n",
                summary.succeeded, summary.total, summary.failed, summary.avg_duration_ms
            ),
        }
    }

    fn section_header(&self, title: &str) -> String {
        match self.config.format {
            OutputFormat::Markdown => format!("## {title}\n\n"),
            OutputFormat::Html => format!("<h2>{title}</h2>\n"),
            OutputFormat::Plain => format!("{title}\n{}\n", "-".repeat(title.len())),
        }
    }

    fn content_block(&self, title: &str, content: &str) -> String {
        match self.config.format {
            OutputFormat::Markdown => format!("### {title}\n\n{content}\n\n"),
            OutputFormat::Html => format!("<h3>{title}</h3><div>{content}</div>\n"),
            OutputFormat::Plain => format!("{title}:\n{content}\n\n"),
        }
    }

    fn error_block(&self, message: &str) -> String {
        match self.config.format {
            OutputFormat::Markdown => format!("> **Error:** {message}\n\n"),
            OutputFormat::Html => format!("<p class=\"error\">Error: {message}</p>\n"),
            OutputFormat::Plain => format!("ERROR: {message}\n"),
        }
    }

    fn footer(&self) -> String {
        match self.config.format {
            OutputFormat::Markdown => "\n---\n".to_string(),
            OutputFormat::Html => "</body></html>".to_string(),
            OutputFormat::Plain => String::new(),
        }
    }
}

/// Derives each subtask's execution level from its batch index: since the
/// planner never schedules a subtask before every blocking predecessor's
/// batch, a subtask's batch index is a valid (if sometimes coarser) stand-in
/// for its DAG depth, and is what the store's reintegration query has on
/// hand without re-walking dependency edges (§4.8, §4.9).
pub fn execution_levels_from_batches(batches: &[Batch]) -> Vec<ExecutionLevel> {
    batches
        .iter()
        .enumerate()
        .flat_map(|(level, batch)| {
            batch.tasks.iter().map(move |task| ExecutionLevel {
                subtask_id: task.id.clone(),
                level,
            })
        })
        .collect()
}

/// For each subtask id, keeps the highest-`executionOrder` result — the
/// last attempt recorded, which is whatever the retry/multipass loop
/// settled on (§4.2).
fn final_results_by_subtask(data: &ReintegrationData) -> HashMap<&str, &crate::model::SubtaskResult> {
    let mut finals: HashMap<&str, &crate::model::SubtaskResult> = HashMap::new();
    for result in &data.results {
        finals
            .entry(result.subtask_id.as_str())
            .and_modify(|existing| {
                if result.execution_order > existing.execution_order {
                    *existing = result;
                }
            })
            .or_insert(result);
    }
    finals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, SubtaskResult, TokenUsage};
    use crate::store::{ExecutionLevel, ExecutionSummary};
    use chrono::Utc;

    fn sample_data() -> (ReintegrationData, Vec<Subtask>) {
        let t1 = Subtask::new("wf1", "Research the topic", "d", SubtaskType::Research, Priority::Medium);
        let t2 = Subtask::new("wf1", "Write the draft", "d", SubtaskType::Creation, Priority::Medium);

        let r1 = SubtaskResult::new(t1.id.clone(), "a1", "research findings", TokenUsage::default(), 0.9, vec![], vec![], 0, "wf1::batch-0");
        let r2 = SubtaskResult::new(t2.id.clone(), "a2", "draft text", TokenUsage::default(), 0.8, vec![], vec![], 1, "wf1::batch-0");

        let data = ReintegrationData {
            workflow_id: "wf1".to_string(),
            results: vec![r1, r2],
            execution_levels: vec![
                ExecutionLevel { subtask_id: t1.id.clone(), level: 0 },
                ExecutionLevel { subtask_id: t2.id.clone(), level: 1 },
            ],
            batches: vec![BatchMetadata {
                batch_id: "wf1::batch-0".to_string(),
                workflow_id: "wf1".to_string(),
                batch_index: 0,
                subtask_ids: vec![t1.id.clone(), t2.id.clone()],
                started_at: Utc::now(),
                ended_at: None,
            }],
            summary: ExecutionSummary {
                total: 2,
                succeeded: 2,
                failed: 0,
                total_duration_ms: 100,
                avg_duration_ms: 50.0,
            },
        };
        (data, vec![t1, t2])
    }

    #[test]
    fn markdown_by_execution_order_includes_both_sections() {
        let (data, subtasks) = sample_data();
        let reintegrator = Reintegrator::new(ReintegrationConfig::default());
        let doc = reintegrator.compose(&data, &subtasks);
        assert!(doc.contains("# Workflow wf1"));
        assert!(doc.contains("research findings"));
        assert!(doc.contains("draft text"));
        assert!(doc.contains("Batch 0"));
    }

    #[test]
    fn by_type_groups_under_type_labels() {
        let (data, subtasks) = sample_data();
        let reintegrator = Reintegrator::new(ReintegrationConfig {
            strategy: SectioningStrategy::ByType,
            format: OutputFormat::Markdown,
            max_content_length: None,
        });
        let doc = reintegrator.compose(&data, &subtasks);
        assert!(doc.contains("## Research"));
        assert!(doc.contains("## Creation"));
    }

    #[test]
    fn by_dependency_level_orders_levels_ascending() {
        let (data, subtasks) = sample_data();
        let reintegrator = Reintegrator::new(ReintegrationConfig {
            strategy: SectioningStrategy::ByDependencyLevel,
            format: OutputFormat::Plain,
            max_content_length: None,
        });
        let doc = reintegrator.compose(&data, &subtasks);
        let level0 = doc.find("Level 0").unwrap();
        let level1 = doc.find("Level 1").unwrap();
        assert!(level0 < level1);
    }

    #[test]
    fn content_truncates_at_last_newline_within_budget() {
        let (data, subtasks) = sample_data();
        let reintegrator = Reintegrator::new(ReintegrationConfig {
            strategy: SectioningStrategy::ByExecutionOrder,
            format: OutputFormat::Plain,
            max_content_length: Some(5),
        });
        let doc = reintegrator.compose(&data, &subtasks);
        assert!(doc.contains("[truncated]"));
        assert!(!doc.contains("research findings"));
    }

    #[test]
    fn html_format_wraps_document_in_html_tags() {
        let (data, subtasks) = sample_data();
        let reintegrator = Reintegrator::new(ReintegrationConfig {
            strategy: SectioningStrategy::ByExecutionOrder,
            format: OutputFormat::Html,
            max_content_length: None,
        });
        let doc = reintegrator.compose(&data, &subtasks);
        assert!(doc.starts_with("<html>"));
        assert!(doc.ends_with("</html>"));
    }
}
