use async_trait::async_trait;
use serde_json::Value;

use crate::error::ToolError;

/// Trait for tools the model can call.
///
/// `name()` and `description()` return `&str` and `schema()` returns
/// `&Value` so implementations can keep them in static or struct storage
/// instead of allocating per call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool name (must be unique within a registry)
    fn name(&self) -> &str;

    /// Returns a human-readable description surfaced to the model
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's argument object
    fn schema(&self) -> &Value;

    /// Execute the tool. The registry validates arguments against the
    /// schema before this is called.
    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// Compiled tool declaration advertised to the model.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDecl {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// Validate `args` against a tool's declared schema.
///
/// Covers the schema subset the tools here use: top-level object type,
/// `required` keys and per-property primitive types. Every offending
/// field is collected so the failure lists them all at once.
pub fn validate_args(tool: &str, schema: &Value, args: &Value) -> Result<(), ToolError> {
    let obj = match args.as_object() {
        Some(obj) => obj,
        None => {
            return Err(ToolError::invalid_arguments(
                tool,
                vec![format!("expected an object, got {}", json_type_name(args))],
            ))
        }
    };

    let mut issues = Vec::new();

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !obj.contains_key(key) {
                issues.push(format!("missing required field '{}'", key));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, prop) in props {
            let value = match obj.get(key) {
                Some(value) => value,
                None => continue,
            };
            if let Some(expected) = prop.get("type").and_then(|t| t.as_str()) {
                if !type_matches(expected, value) {
                    issues.push(format!(
                        "field '{}' should be {}, got {}",
                        key,
                        expected,
                        json_type_name(value)
                    ));
                }
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ToolError::invalid_arguments(tool, issues))
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type names are not this validator's problem
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
