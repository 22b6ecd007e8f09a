//! REGEX rule: compile `pattern`, pass on >= 1 match (§4.3).

use regex::RegexBuilder;

pub fn check(output: &str, pattern: &str, case_insensitive: bool) -> (bool, f64, String) {
    let compiled = match RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
    {
        Ok(r) => r,
        Err(e) => return (false, 0.0, format!("invalid regex '{pattern}': {e}")),
    };

    if compiled.is_match(output) {
        (true, 1.0, format!("pattern '{pattern}' matched"))
    } else {
        (false, 0.0, format!("pattern '{pattern}' did not match"))
    }
}
