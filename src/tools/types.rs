//! JSON Schema descriptions of tool input.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Input schema for a tool, always a JSON Schema object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub schema: Value,
}

impl ToolSchema {
    pub fn from_value(schema: Value) -> Self {
        Self { schema }
    }

    /// A schema that takes no input.
    pub fn empty() -> Self {
        Self::object().build()
    }

    pub fn object() -> ObjectSchemaBuilder {
        ObjectSchemaBuilder::default()
    }
}

/// Builds `{"type":"object", ...}` schemas field by field.
#[derive(Debug, Default)]
pub struct ObjectSchemaBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl ObjectSchemaBuilder {
    fn field(mut self, name: &str, mut spec: Value, description: &str, required: bool) -> Self {
        if let Some(obj) = spec.as_object_mut() {
            obj.insert("description".into(), Value::String(description.to_string()));
        }
        self.properties.insert(name.to_string(), spec);
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn string(self, name: &str, description: &str, required: bool) -> Self {
        self.field(name, json!({ "type": "string" }), description, required)
    }

    pub fn integer(self, name: &str, description: &str, required: bool) -> Self {
        self.field(name, json!({ "type": "integer" }), description, required)
    }

    pub fn number(self, name: &str, description: &str, required: bool) -> Self {
        self.field(name, json!({ "type": "number" }), description, required)
    }

    pub fn one_of(self, name: &str, description: &str, values: &[&str], required: bool) -> Self {
        self.field(
            name,
            json!({ "type": "string", "enum": values }),
            description,
            required,
        )
    }

    /// Nest another object schema.
    pub fn object(self, name: &str, description: &str, nested: ToolSchema, required: bool) -> Self {
        self.field(name, nested.schema, description, required)
    }

    pub fn build(self) -> ToolSchema {
        ToolSchema {
            schema: json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
            }),
        }
    }
}
