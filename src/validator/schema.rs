//! SCHEMA rule: parse output as JSON, check `type` and `required` fields (§4.3).

pub fn check(output: &str, expected_type: &str, required_fields: &[String]) -> (bool, f64, String) {
    let parsed: serde_json::Value = match serde_json::from_str(output) {
        Ok(v) => v,
        Err(e) => return (false, 0.0, format!("output is not valid JSON: {e}")),
    };

    let actual_type = json_type_name(&parsed);
    if actual_type != expected_type {
        return (
            false,
            0.0,
            format!("expected JSON type '{expected_type}', got '{actual_type}'"),
        );
    }

    let missing: Vec<&str> = required_fields
        .iter()
        .filter(|field| parsed.get(field.as_str()).is_none())
        .map(|s| s.as_str())
        .collect();

    if missing.is_empty() {
        (true, 1.0, "schema satisfied".to_string())
    } else {
        (
            false,
            0.0,
            format!("missing required fields: {}", missing.join(", ")),
        )
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
