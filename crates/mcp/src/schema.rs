//! Minimal JSON-Schema validation for tool arguments.
//!
//! Covers what tool schemas actually use: a top-level object with typed
//! properties, `required` lists, and `enum` constraints. Unknown
//! properties are tolerated (tools receive the full argument object).

use serde_json::Value;

/// Validate `args` against `schema`. Returns a human-readable explanation
/// on the first mismatch.
pub fn validate_args(args: &Value, schema: &Value) -> Result<(), String> {
    let obj = match args {
        Value::Object(map) => map,
        other => {
            return Err(format!(
                "arguments must be a JSON object, got {}",
                type_name(other)
            ))
        }
    };

    // Required properties.
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !obj.contains_key(key) {
                return Err(format!("missing required argument '{key}'"));
            }
        }
    }

    // Per-property checks.
    let properties = match schema.get("properties").and_then(|p| p.as_object()) {
        Some(p) => p,
        None => return Ok(()),
    };

    for (key, prop_schema) in properties {
        let value = match obj.get(key) {
            Some(v) => v,
            None => continue,
        };

        if let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) {
            if !type_matches(value, expected) {
                return Err(format!(
                    "argument '{key}' must be of type {expected}, got {}",
                    type_name(value)
                ));
            }
        }

        if let Some(allowed) = prop_schema.get("enum").and_then(|e| e.as_array()) {
            if !allowed.contains(value) {
                return Err(format!(
                    "argument '{key}' must be one of {}",
                    serde_json::to_string(allowed).unwrap_or_default()
                ));
            }
        }
    }

    Ok(())
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type keyword: be permissive.
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
