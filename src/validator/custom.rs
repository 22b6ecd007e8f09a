//! CUSTOM rule: invokes a named builtin from a closed registry (§4.3).
//! An unknown builtin is rejected at deserialization time since
//! [`CustomBuiltin`] is itself a closed enum rather than a free string.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CustomBuiltin {
    WordCount,
    HasKeywords,
    SentimentPositive,
    SentimentNegative,
    CodeBlocks,
    UrlsPresent,
}

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "excellent", "positive", "success", "succeeded", "happy", "improved",
];
const NEGATIVE_WORDS: &[&str] = &[
    "bad", "poor", "terrible", "negative", "failure", "failed", "sad", "worsened",
];

pub fn check(output: &str, builtin: CustomBuiltin, config: &serde_json::Value) -> (bool, f64, String) {
    match builtin {
        CustomBuiltin::WordCount => word_count(output, config),
        CustomBuiltin::HasKeywords => has_keywords(output, config),
        CustomBuiltin::SentimentPositive => sentiment(output, POSITIVE_WORDS, "positive"),
        CustomBuiltin::SentimentNegative => sentiment(output, NEGATIVE_WORDS, "negative"),
        CustomBuiltin::CodeBlocks => code_blocks(output),
        CustomBuiltin::UrlsPresent => urls_present(output),
    }
}

fn word_count(output: &str, config: &serde_json::Value) -> (bool, f64, String) {
    let min_words = config.get("min").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
    let count = output.split_whitespace().count();
    if count >= min_words {
        (true, 1.0, format!("{count} words (>= {min_words})"))
    } else {
        (false, count as f64 / min_words.max(1) as f64, format!("{count} words (< {min_words})"))
    }
}

fn has_keywords(output: &str, config: &serde_json::Value) -> (bool, f64, String) {
    let keywords: Vec<String> = config
        .get("keywords")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_lowercase)).collect())
        .unwrap_or_default();
    if keywords.is_empty() {
        return (false, 0.0, "no keywords configured".to_string());
    }
    let lower = output.to_lowercase();
    let hit_count = keywords.iter().filter(|kw| lower.contains(kw.as_str())).count();
    let score = hit_count as f64 / keywords.len() as f64;
    (hit_count > 0, score, format!("{hit_count}/{} keywords present", keywords.len()))
}

fn sentiment(output: &str, lexicon: &[&str], label: &str) -> (bool, f64, String) {
    let lower = output.to_lowercase();
    let hits = lexicon.iter().filter(|w| lower.contains(*w)).count();
    let score = (hits as f64 / 3.0).min(1.0);
    (hits > 0, score, format!("{hits} {label} signal words found"))
}

fn code_blocks(output: &str) -> (bool, f64, String) {
    let fence_count = output.matches("```").count();
    let blocks = fence_count / 2;
    if blocks > 0 {
        (true, 1.0, format!("{blocks} fenced code block(s) found"))
    } else {
        (false, 0.0, "no fenced code blocks found".to_string())
    }
}

fn urls_present(output: &str) -> (bool, f64, String) {
    let has_url = output.contains("http://") || output.contains("https://");
    if has_url {
        (true, 1.0, "at least one URL present".to_string())
    } else {
        (false, 0.0, "no URL present".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_count_respects_configured_minimum() {
        let config = serde_json::json!({"min": 3});
        let (passed, _, _) = check("one two", CustomBuiltin::WordCount, &config);
        assert!(!passed);
        let (passed, _, _) = check("one two three", CustomBuiltin::WordCount, &config);
        assert!(passed);
    }

    #[test]
    fn code_blocks_detected_by_fences() {
        let (passed, _, _) = check("no code here", CustomBuiltin::CodeBlocks, &serde_json::Value::Null);
        assert!(!passed);
        let (passed, _, _) = check("```rust\nfn f() {}\n```", CustomBuiltin::CodeBlocks, &serde_json::Value::Null);
        assert!(passed);
    }

    #[test]
    fn urls_present_checks_scheme_prefix() {
        let (passed, _, _) = check("see https://example.com", CustomBuiltin::UrlsPresent, &serde_json::Value::Null);
        assert!(passed);
    }
}
