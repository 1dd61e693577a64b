//! Typed access to tool input.

use serde_json::Value;

use crate::error::{AgentError, Result};

/// Wrapper around a tool call's input value.
#[derive(Debug, Clone)]
pub struct ToolInput {
    value: Value,
}

impl ToolInput {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn raw(&self) -> &Value {
        &self.value
    }

    /// Required string field.
    pub fn str(&self, key: &str) -> Result<&str> {
        self.value
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::InvalidArgument(format!("missing string field '{key}'")))
    }

    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    /// Deserialize the whole input into a typed struct.
    ///
    /// Some providers send arguments as an encoded JSON string; that form is
    /// decoded first.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let value = match &self.value {
            Value::String(raw) if raw.trim().is_empty() => Value::Object(Default::default()),
            Value::String(raw) => serde_json::from_str(raw.trim())
                .map_err(|e| AgentError::InvalidArgument(format!("invalid tool input: {e}")))?,
            other => other.clone(),
        };
        serde_json::from_value(value)
            .map_err(|e| AgentError::InvalidArgument(format!("invalid tool input: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct City {
        city: String,
    }

    #[test]
    fn reads_string_fields() {
        let input = ToolInput::new(json!({ "city": "Lisbon" }));
        assert_eq!(input.str("city").unwrap(), "Lisbon");
        assert!(input.str("country").is_err());
        assert_eq!(input.opt_str("country"), None);
    }

    #[test]
    fn parses_encoded_string_input() {
        let input = ToolInput::new(json!("{\"city\":\"Oslo\"}"));
        let city: City = input.parse().unwrap();
        assert_eq!(city.city, "Oslo");
    }

    #[test]
    fn parse_reports_shape_mismatch() {
        let input = ToolInput::new(json!({ "town": "Oslo" }));
        assert!(matches!(
            input.parse::<City>(),
            Err(AgentError::InvalidArgument(_))
        ));
    }
}
