//! Tool descriptors and local argument validation.
//!
//! Arguments are checked against the tool's parameter schema before any
//! transport round trip: missing required fields and primitive type
//! mismatches fail locally.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool descriptor as reported by a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool name across the merged registry.
    pub name: String,
    /// Tool description, shown to the model.
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

impl ToolSchema {
    /// Check structural validity of the descriptor itself.
    pub fn is_well_formed(&self) -> bool {
        !self.name.is_empty() && self.parameters.is_object()
    }

    /// Validate arguments against this schema.
    ///
    /// Checks that arguments form an object, that every `required`
    /// field is present, and that each known property matches its
    /// declared primitive type.
    pub fn validate_arguments(&self, arguments: &Value) -> Result<(), ValidationError> {
        let Some(args) = arguments.as_object() else {
            return Err(ValidationError::NotAnObject {
                tool: self.name.clone(),
            });
        };

        if let Some(required) = self.parameters.get("required").and_then(Value::as_array) {
            for field in required.iter().filter_map(Value::as_str) {
                if !args.contains_key(field) {
                    return Err(ValidationError::MissingField {
                        tool: self.name.clone(),
                        field: field.to_string(),
                    });
                }
            }
        }

        if let Some(properties) = self.parameters.get("properties").and_then(Value::as_object) {
            for (field, spec) in properties {
                let Some(value) = args.get(field) else {
                    continue;
                };
                let Some(expected) = spec.get("type").and_then(Value::as_str) else {
                    continue;
                };
                if !type_matches(expected, value) {
                    return Err(ValidationError::TypeMismatch {
                        tool: self.name.clone(),
                        field: field.clone(),
                        expected: expected.to_string(),
                        actual: type_name(value).to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown schema types pass; the server re-validates.
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

/// Local argument validation failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("Tool '{name}' is not present in the registry")]
    UnknownTool { name: String },

    #[error("Arguments for tool '{tool}' must be a JSON object")]
    NotAnObject { tool: String },

    #[error("Tool '{tool}' is missing required field '{field}'")]
    MissingField { tool: String, field: String },

    #[error("Tool '{tool}' field '{field}' expects {expected}, got {actual}")]
    TypeMismatch {
        tool: String,
        field: String,
        expected: String,
        actual: String,
    },
}

/// The merged registry of tools across all configured endpoints.
///
/// Maps tool name to the owning endpoint and its schema. Insertion
/// rejects empty and duplicate names.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    endpoint: String,
    schema: ToolSchema,
}

/// Registry construction failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Endpoint '{endpoint}' reported a tool with an empty or malformed name")]
    MalformedSchema { endpoint: String },

    #[error("Tool '{name}' is offered by both '{first}' and '{second}'")]
    DuplicateTool {
        name: String,
        first: String,
        second: String,
    },
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool from an endpoint.
    pub fn insert(
        &mut self,
        endpoint: impl Into<String>,
        schema: ToolSchema,
    ) -> Result<(), RegistryError> {
        let endpoint = endpoint.into();
        if !schema.is_well_formed() {
            return Err(RegistryError::MalformedSchema { endpoint });
        }
        if let Some(existing) = self.entries.get(&schema.name) {
            return Err(RegistryError::DuplicateTool {
                name: schema.name.clone(),
                first: existing.endpoint.clone(),
                second: endpoint,
            });
        }
        self.entries
            .insert(schema.name.clone(), RegistryEntry { endpoint, schema });
        Ok(())
    }

    /// Look up a tool schema by name.
    pub fn schema(&self, name: &str) -> Option<&ToolSchema> {
        self.entries.get(name).map(|e| &e.schema)
    }

    /// Name of the endpoint that owns a tool.
    pub fn endpoint_for(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|e| e.endpoint.as_str())
    }

    /// All schemas, in name order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.entries.values().map(|e| e.schema.clone()).collect()
    }

    /// Whether a tool name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(name: &str) -> ToolSchema {
        ToolSchema {
            name: name.to_string(),
            description: "test tool".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "limit": { "type": "integer" }
                },
                "required": ["path"]
            }),
        }
    }

    #[test]
    fn test_valid_arguments_pass() {
        let s = schema("read_file");
        s.validate_arguments(&json!({"path": "a.txt", "limit": 10}))
            .unwrap();
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let s = schema("read_file");
        let err = s.validate_arguments(&json!({"limit": 10})).unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { field, .. } if field == "path"));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let s = schema("read_file");
        let err = s
            .validate_arguments(&json!({"path": "a.txt", "limit": "ten"}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::TypeMismatch { field, .. } if field == "limit"));
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        let s = schema("read_file");
        let err = s.validate_arguments(&json!(["a.txt"])).unwrap_err();
        assert!(matches!(err, ValidationError::NotAnObject { .. }));
    }

    #[test]
    fn test_registry_rejects_duplicates_and_empty_names() {
        let mut registry = ToolRegistry::new();
        registry.insert("files", schema("read_file")).unwrap();

        let err = registry.insert("backup", schema("read_file")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTool { .. }));

        let err = registry.insert("files", schema("")).unwrap_err();
        assert!(matches!(err, RegistryError::MalformedSchema { .. }));
    }

    #[test]
    fn test_registry_merge_across_endpoints() {
        let mut registry = ToolRegistry::new();
        for name in ["read_file", "write_file", "list_directory"] {
            registry.insert("files", schema(name)).unwrap();
        }
        for name in ["cpu_stats", "memory_stats"] {
            registry.insert("monitor", schema(name)).unwrap();
        }

        assert_eq!(registry.len(), 5);
        assert_eq!(registry.endpoint_for("cpu_stats"), Some("monitor"));
        assert_eq!(registry.endpoint_for("read_file"), Some("files"));
    }
}
