//! Rule-based output validation producing pass/retry/halt verdicts (§4.3).

mod custom;
mod regex_rule;
mod schema;
mod semantic;

use serde::{Deserialize, Serialize};

pub use custom::CustomBuiltin;

/// The kind of check a [`Rule`] performs, carrying its own configuration.
///
/// A tagged variant rather than a dynamic, untyped configuration bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleConfig {
    Schema {
        /// Expected top-level JSON `type`, e.g. "object".
        expected_type: String,
        required_fields: Vec<String>,
    },
    Regex {
        pattern: String,
        #[serde(default)]
        case_insensitive: bool,
    },
    Semantic {
        expected_topics: Vec<String>,
        #[serde(default = "semantic::default_similarity_threshold")]
        similarity_threshold: f64,
    },
    Custom {
        builtin: CustomBuiltin,
        #[serde(default)]
        config: serde_json::Value,
    },
}

/// One validation rule: a check plus its weight and required-ness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub config: RuleConfig,
    pub weight: f64,
    pub required: bool,
}

/// The outcome of running a single rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_name: String,
    pub passed: bool,
    pub score: f64,
    pub message: String,
    pub required: bool,
    pub weight: f64,
}

/// Aggregate verdict across all rules run against one output (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub passed: bool,
    pub should_halt: bool,
    pub should_retry: bool,
    pub confidence: f64,
    pub outcomes: Vec<RuleOutcome>,
}

/// Tunables for verdict aggregation, independent of any one rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub min_threshold: f64,
    pub halt_threshold: f64,
    pub retry_on_failure: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_threshold: 0.7,
            halt_threshold: 0.2,
            retry_on_failure: true,
        }
    }
}

/// Runs an ordered list of rules against agent output and aggregates a
/// verdict, per §4.3.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    pub config: ValidatorConfig,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, output: &str, rules: &[Rule]) -> ValidationVerdict {
        if rules.is_empty() {
            return ValidationVerdict {
                passed: true,
                should_halt: false,
                should_retry: false,
                confidence: 1.0,
                outcomes: Vec::new(),
            };
        }

        let outcomes: Vec<RuleOutcome> = rules.iter().map(|rule| self.run_rule(output, rule)).collect();

        let weight_sum: f64 = outcomes.iter().map(|o| o.weight).sum();
        let confidence = if weight_sum > 0.0 {
            outcomes.iter().map(|o| o.score * o.weight).sum::<f64>() / weight_sum
        } else {
            0.0
        };

        let any_required_failed = outcomes.iter().any(|o| o.required && !o.passed);
        let passed = !any_required_failed && confidence >= self.config.min_threshold;
        let should_halt = any_required_failed || confidence < self.config.halt_threshold;
        let should_retry = self.config.retry_on_failure && !passed && !should_halt;

        ValidationVerdict {
            passed,
            should_halt,
            should_retry,
            confidence,
            outcomes,
        }
    }

    fn run_rule(&self, output: &str, rule: &Rule) -> RuleOutcome {
        let (passed, score, message) = match &rule.config {
            RuleConfig::Schema {
                expected_type,
                required_fields,
            } => schema::check(output, expected_type, required_fields),
            RuleConfig::Regex {
                pattern,
                case_insensitive,
            } => regex_rule::check(output, pattern, *case_insensitive),
            RuleConfig::Semantic {
                expected_topics,
                similarity_threshold,
            } => semantic::check(output, expected_topics, *similarity_threshold),
            RuleConfig::Custom { builtin, config } => custom::check(output, *builtin, config),
        };
        RuleOutcome {
            rule_name: rule.name.clone(),
            passed,
            score,
            message,
            required: rule.required,
            weight: rule.weight,
        }
    }
}
