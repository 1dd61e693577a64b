//! Check tool input against its JSON Schema before execution.

use serde_json::Value;
use thiserror::Error;

/// First violation found while validating tool input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("expected object input, got {found}")]
    NotAnObject { found: &'static str },
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("field '{field}' expected type '{expected}', got {found}")]
    WrongType {
        field: String,
        expected: String,
        found: &'static str,
    },
    #[error("field '{field}' must be one of {allowed}")]
    NotAllowed { field: String, allowed: String },
}

/// Validate input against an object schema.
///
/// Covers the subset of JSON Schema tool definitions use: top-level object
/// type, `required`, per-property `type` and string `enum`. Nested objects are
/// checked recursively.
pub fn validate_input(input: &Value, schema: &Value) -> Result<(), SchemaViolation> {
    validate_at(input, schema, "")
}

fn validate_at(input: &Value, schema: &Value, path: &str) -> Result<(), SchemaViolation> {
    if schema.get("type").and_then(Value::as_str) == Some("object") {
        let Some(obj) = input.as_object() else {
            return Err(if path.is_empty() {
                SchemaViolation::NotAnObject {
                    found: type_name(input),
                }
            } else {
                SchemaViolation::WrongType {
                    field: path.to_string(),
                    expected: "object".into(),
                    found: type_name(input),
                }
            });
        };

        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str);
        for name in required {
            if !obj.contains_key(name) {
                return Err(SchemaViolation::MissingField(join(path, name)));
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, value) in obj {
                if let Some(property) = properties.get(key) {
                    validate_property(value, property, &join(path, key))?;
                }
            }
        }
    }
    Ok(())
}

fn validate_property(value: &Value, property: &Value, field: &str) -> Result<(), SchemaViolation> {
    let Some(expected) = property.get("type").and_then(Value::as_str) else {
        return Ok(());
    };
    if expected == "object" {
        return validate_at(value, property, field);
    }
    if !matches_type(value, expected) {
        return Err(SchemaViolation::WrongType {
            field: field.to_string(),
            expected: expected.to_string(),
            found: type_name(value),
        });
    }
    if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(SchemaViolation::NotAllowed {
                field: field.to_string(),
                allowed: Value::Array(allowed.clone()).to_string(),
            });
        }
    }
    Ok(())
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "null" => value.is_null(),
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
