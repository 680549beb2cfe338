//! Tool descriptors and their parameter schemas.

use crate::content::ToolKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Parameter value types the broker understands.
///
/// This is the JSON Schema subset named by the protocol; anything else in
/// a discovered schema is rejected at catalog-parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Boolean => "boolean",
            ParameterType::Object => "object",
            ParameterType::Array => "array",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(ParameterType::String),
            // integers collapse into the number type
            "number" | "integer" => Some(ParameterType::Number),
            "boolean" => Some(ParameterType::Boolean),
            "object" => Some(ParameterType::Object),
            "array" => Some(ParameterType::Array),
            _ => None,
        }
    }
}

/// One named parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub param_type: ParameterType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, param_type: ParameterType, required: bool) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// An ordered parameter schema for a tool.
///
/// Stored in declaration order so re-serialization is stable, which keeps
/// catalog round-trips lossless.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub parameters: Vec<ParameterSpec>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Render as a JSON Schema `object` value, the shape both the wire
    /// catalog and the model's function definitions use.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(param.param_type.as_str()));
            if let Some(desc) = &param.description {
                prop.insert("description".into(), json!(desc));
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(json!(param.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Parse a JSON Schema `object` value into an ordered schema.
    ///
    /// Returns `None` when the value is not a well-formed object schema or
    /// names a type outside the supported subset. A missing `properties`
    /// map yields an empty schema (a tool may take no arguments).
    pub fn from_json_schema(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if let Some(ty) = obj.get("type") {
            if ty.as_str() != Some("object") {
                return None;
            }
        }

        let required: Vec<&str> = obj
            .get("required")
            .and_then(|r| r.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let mut parameters = Vec::new();
        if let Some(props) = obj.get("properties") {
            let props = props.as_object()?;
            for (name, prop) in props {
                let prop = prop.as_object()?;
                let type_str = prop.get("type").and_then(|t| t.as_str()).unwrap_or("string");
                let param_type = ParameterType::parse(type_str)?;
                let description = prop
                    .get("description")
                    .and_then(|d| d.as_str())
                    .map(String::from);
                parameters.push(ParameterSpec {
                    name: name.clone(),
                    param_type,
                    description,
                    required: required.contains(&name.as_str()),
                });
            }
        }

        Some(Self { parameters })
    }
}

/// An immutable description of one callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique within a catalog.
    pub name: String,
    #[serde(default)]
    pub kind: ToolKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: ParameterSchema,
    /// Explicit permission gate, independent of the kind-based gate.
    #[serde(default)]
    pub requires_permission: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, kind: ToolKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            parameters: ParameterSchema::new(),
            requires_permission: false,
            categories: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.parameters.push(spec);
        self
    }

    pub fn with_permission(mut self) -> Self {
        self.requires_permission = true;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    /// Whether invocations of this tool must pass the permission gate.
    pub fn gated(&self) -> bool {
        self.requires_permission || self.kind.requires_permission()
    }

    /// Render as an OpenAI-style function definition for the model.
    pub fn to_function_definition(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters.to_json_schema(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_descriptor() -> ToolDescriptor {
        ToolDescriptor::new("read_file", ToolKind::Read, "Read a file from the workspace")
            .with_parameter(
                ParameterSpec::new("path", ParameterType::String, true)
                    .with_description("Path to read"),
            )
            .with_parameter(ParameterSpec::new("limit", ParameterType::Number, false))
    }

    #[test]
    fn schema_to_json_lists_required() {
        let schema = sample_descriptor().parameters.to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["path"]["type"], "string");
        assert_eq!(schema["required"], json!(["path"]));
    }

    #[test]
    fn schema_roundtrip() {
        let original = sample_descriptor().parameters;
        let rendered = original.to_json_schema();
        let parsed = ParameterSchema::from_json_schema(&rendered).unwrap();
        assert_eq!(parsed.get("path").unwrap().required, true);
        assert_eq!(parsed.get("limit").unwrap().required, false);
        assert_eq!(
            parsed.get("limit").unwrap().param_type,
            ParameterType::Number
        );
    }

    #[test]
    fn schema_rejects_unknown_type() {
        let value = json!({
            "type": "object",
            "properties": {"x": {"type": "null"}}
        });
        assert!(ParameterSchema::from_json_schema(&value).is_none());
    }

    #[test]
    fn schema_accepts_integer_as_number() {
        let value = json!({
            "type": "object",
            "properties": {"line": {"type": "integer"}}
        });
        let schema = ParameterSchema::from_json_schema(&value).unwrap();
        assert_eq!(
            schema.get("line").unwrap().param_type,
            ParameterType::Number
        );
    }

    #[test]
    fn schema_without_properties_is_empty() {
        let value = json!({"type": "object"});
        let schema = ParameterSchema::from_json_schema(&value).unwrap();
        assert!(schema.parameters.is_empty());
    }

    #[test]
    fn non_object_schema_rejected() {
        assert!(ParameterSchema::from_json_schema(&json!({"type": "array"})).is_none());
        assert!(ParameterSchema::from_json_schema(&json!("string")).is_none());
    }

    #[test]
    fn gated_by_kind_or_flag() {
        let read = sample_descriptor();
        assert!(!read.gated());

        let flagged = ToolDescriptor::new("lint", ToolKind::Read, "Lint").with_permission();
        assert!(flagged.gated());

        let write = ToolDescriptor::new("write_file", ToolKind::Write, "Write");
        assert!(write.gated());
    }

    #[test]
    fn function_definition_shape() {
        let def = sample_descriptor().to_function_definition();
        assert_eq!(def["type"], "function");
        assert_eq!(def["function"]["name"], "read_file");
        assert_eq!(def["function"]["parameters"]["type"], "object");
    }
}
