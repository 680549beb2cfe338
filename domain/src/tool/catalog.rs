//! The per-session tool catalog discovered from the client.

use crate::content::ToolKind;
use crate::tool::descriptor::{ParameterSchema, ToolDescriptor};
use serde_json::{Value, json};
use std::collections::HashMap;

/// Ordered collection of discovered tool descriptors.
///
/// Built once per session from the raw `discover_tools` result and never
/// mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    by_name: HashMap<String, usize>,
}

/// Outcome of parsing one raw catalog.
#[derive(Debug, Clone)]
pub struct CatalogParse {
    pub catalog: ToolCatalog,
    /// Human-readable reasons for each rejected entry, in input order.
    pub rejected: Vec<String>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor. Later duplicates of a name are dropped; the
    /// first occurrence wins, mirroring first-registration priority.
    pub fn push(&mut self, descriptor: ToolDescriptor) {
        if self.by_name.contains_key(&descriptor.name) {
            return;
        }
        self.by_name
            .insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    pub fn by_kind(&self, kind: ToolKind) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter().filter(move |t| t.kind == kind)
    }

    pub fn by_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a ToolDescriptor> {
        self.tools
            .iter()
            .filter(move |t| t.categories.iter().any(|c| c == category))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Parse the raw JSON returned by `discover_tools`.
    ///
    /// Tolerant by design: unknown optional fields are ignored and an
    /// unrecognized `kind` falls back to `other`. An entry is rejected only
    /// when it has no name or its parameter schema is malformed. A result
    /// with zero surviving entries is still a valid (empty) catalog; tier
    /// selection handles that case upstream.
    pub fn parse(raw: &Value) -> CatalogParse {
        let mut catalog = ToolCatalog::new();
        let mut rejected = Vec::new();

        let entries = raw
            .get("tools")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default();

        for (i, entry) in entries.iter().enumerate() {
            match Self::parse_entry(entry) {
                Ok(descriptor) => catalog.push(descriptor),
                Err(reason) => rejected.push(format!("entry {i}: {reason}")),
            }
        }

        CatalogParse { catalog, rejected }
    }

    fn parse_entry(entry: &Value) -> Result<ToolDescriptor, String> {
        let obj = entry.as_object().ok_or("not an object")?;

        let name = obj
            .get("name")
            .and_then(|n| n.as_str())
            .filter(|n| !n.is_empty())
            .ok_or("missing name")?;

        let kind = obj
            .get("kind")
            .and_then(|k| k.as_str())
            .and_then(|k| serde_json::from_value::<ToolKind>(json!(k)).ok())
            .unwrap_or_default();

        let description = obj
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or_default();

        let parameters = match obj.get("parameters") {
            None | Some(Value::Null) => ParameterSchema::new(),
            Some(schema) => ParameterSchema::from_json_schema(schema)
                .ok_or_else(|| format!("malformed parameter schema for '{name}'"))?,
        };

        let requires_permission = obj
            .get("requires_permission")
            .and_then(|p| p.as_bool())
            .unwrap_or(false);

        let categories = obj
            .get("categories")
            .and_then(|c| c.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let mut descriptor = ToolDescriptor::new(name, kind, description);
        descriptor.parameters = parameters;
        descriptor.requires_permission = requires_permission;
        descriptor.categories = categories;
        Ok(descriptor)
    }

    /// Re-serialize to the wire shape. Parsing the output again yields an
    /// equal catalog.
    pub fn to_json(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|t| {
                let mut obj = serde_json::Map::new();
                obj.insert("name".into(), json!(t.name));
                obj.insert("kind".into(), json!(t.kind.as_str()));
                obj.insert("description".into(), json!(t.description));
                obj.insert("parameters".into(), t.parameters.to_json_schema());
                obj.insert("requires_permission".into(), json!(t.requires_permission));
                if !t.categories.is_empty() {
                    obj.insert("categories".into(), json!(t.categories));
                }
                Value::Object(obj)
            })
            .collect();
        json!({ "tools": tools })
    }
}
