//! Structural validation of tool arguments.
//!
//! Covers the JSON Schema subset the built-in tools declare: `type`,
//! `properties`, `required`, `additionalProperties: false`, `enum`,
//! `minimum`/`maximum`, `minLength`/`maxLength`, `maxItems` and `items`.
//! Unknown keywords are ignored.

use serde_json::Value;

/// Check `value` against `schema`. The error names the offending path.
pub fn validate(schema: &Value, value: &Value) -> Result<(), String> {
    check(schema, value, "$")
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn check(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema.get("type") {
        let ok = match expected {
            Value::String(t) => type_matches(t, value),
            Value::Array(types) => types
                .iter()
                .filter_map(Value::as_str)
                .any(|t| type_matches(t, value)),
            _ => true,
        };
        if !ok {
            return Err(format!("{}: expected {}", path, expected));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{}: must be one of {}", path, Value::from(allowed.clone())));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(format!("{}: must be >= {}", path, min));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(format!("{}: must be <= {}", path, max));
            }
        }
    }

    if let Some(s) = value.as_str() {
        let len = s.chars().count() as u64;
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if len < min {
                return Err(format!("{}: must be at least {} characters", path, min));
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
            if len > max {
                return Err(format!("{}: must be at most {} characters", path, max));
            }
        }
    }

    if let Some(items) = value.as_array() {
        if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
            if items.len() as u64 > max {
                return Err(format!("{}: must have at most {} items", path, max));
            }
        }
        if let Some(item_schema) = schema.get("items") {
            for (i, item) in items.iter().enumerate() {
                check(item_schema, item, &format!("{}[{}]", path, i))?;
            }
        }
    }

    if let Some(object) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(key) {
                    return Err(format!("{}: missing required field '{}'", path, key));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

        for (key, field) in object {
            match properties.and_then(|p| p.get(key)) {
                Some(field_schema) => {
                    // Optional fields may be sent as null.
                    if field.is_null() && !is_required(schema, key) {
                        continue;
                    }
                    check(field_schema, field, &format!("{}.{}", path, key))?;
                }
                None if closed => {
                    return Err(format!("{}: unknown field '{}'", path, key));
                }
                None => {}
            }
        }
    }

    Ok(())
}

fn is_required(schema: &serde_json::Map<String, Value>, key: &str) -> bool {
    schema
        .get("required")
        .and_then(Value::as_array)
        .is_some_and(|r| r.iter().any(|k| k.as_str() == Some(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "minLength": 1},
                "limit": {"type": "integer", "minimum": 1, "maximum": 100}
            },
            "required": ["query"]
        })
    }

    #[test]
    fn test_valid_arguments() {
        assert!(validate(&search_schema(), &json!({"query": "lofi", "limit": 5})).is_ok());
        assert!(validate(&search_schema(), &json!({"query": "lofi", "limit": null})).is_ok());
    }

    #[test]
    fn test_missing_required() {
        let err = validate(&search_schema(), &json!({"limit": 5})).unwrap_err();
        assert!(err.contains("missing required field 'query'"));
    }

    #[test]
    fn test_wrong_type_and_range() {
        let err = validate(&search_schema(), &json!({"query": 1})).unwrap_err();
        assert!(err.starts_with("$.query"));
        let err = validate(&search_schema(), &json!({"query": "a", "limit": 101})).unwrap_err();
        assert!(err.contains("<= 100"));
        let err = validate(&search_schema(), &json!({"query": "a", "limit": 1.5})).unwrap_err();
        assert!(err.contains("integer"));
    }

    #[test]
    fn test_enum_and_closed_objects() {
        let schema = json!({
            "type": "object",
            "properties": {"loop": {"type": "string", "enum": ["none", "queue", "track"]}},
            "required": ["loop"],
            "additionalProperties": false
        });
        assert!(validate(&schema, &json!({"loop": "queue"})).is_ok());
        assert!(validate(&schema, &json!({"loop": "forever"})).is_err());
        assert!(validate(&schema, &json!({"loop": "none", "x": 1})).is_err());
    }

    #[test]
    fn test_nested_array_items() {
        let schema = json!({
            "type": "object",
            "properties": {
                "fields": {
                    "type": "array",
                    "maxItems": 2,
                    "items": {
                        "type": "object",
                        "properties": {"name": {"type": "string", "maxLength": 3}},
                        "required": ["name"]
                    }
                }
            }
        });
        assert!(validate(&schema, &json!({"fields": [{"name": "abc"}]})).is_ok());
        let err = validate(&schema, &json!({"fields": [{"name": "abcd"}]})).unwrap_err();
        assert!(err.starts_with("$.fields[0].name"));
        assert!(validate(&schema, &json!({"fields": [{"name": "a"}, {"name": "b"}, {"name": "c"}]})).is_err());
    }

    #[test]
    fn test_top_level_must_be_object() {
        assert!(validate(&search_schema(), &json!("query")).is_err());
    }
}
