//! SEMANTIC rule: lowercase word-set Jaccard-style overlap against expected
//! topics, boosted x2 and capped at 1.0 (§4.3).

use std::collections::HashSet;

pub fn default_similarity_threshold() -> f64 {
    0.5
}

const MIN_TOKEN_LEN: usize = 3;

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() >= MIN_TOKEN_LEN)
        .collect()
}

pub fn check(output: &str, expected_topics: &[String], similarity_threshold: f64) -> (bool, f64, String) {
    if expected_topics.is_empty() {
        return (true, 1.0, "no expected topics configured".to_string());
    }

    let output_tokens = tokenize(output);

    let mut best: f64 = 0.0;
    let mut best_topic = "";
    for topic in expected_topics {
        let topic_tokens = tokenize(topic);
        let similarity = similarity_score(&output_tokens, &topic_tokens);
        if similarity > best {
            best = similarity;
            best_topic = topic;
        }
    }

    let passed = best >= similarity_threshold;
    let message = if passed {
        format!("best topic match '{best_topic}' scored {best:.2}")
    } else {
        format!("no topic reached threshold {similarity_threshold:.2}, best was {best:.2}")
    };
    (passed, best, message)
}

fn similarity_score(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let denom = a.len().max(b.len()) as f64;
    ((intersection / denom) * 2.0).min(1.0)
}
