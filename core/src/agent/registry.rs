use crate::traits::{Tool, ToolResult, ToolSpec};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

const MAX_TOOL_NAME_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid tool name '{0}': use 1-64 letters, digits, '_' or '-'")]
    InvalidName(String),
    #[error("tool '{0}' is already registered")]
    Duplicate(String),
    #[error("tool '{name}' has an invalid parameter schema: {reason}")]
    InvalidSchema { name: String, reason: String },
}

struct Registered {
    tool: Arc<dyn Tool>,
    spec: ToolSpec,
    required: Vec<String>,
}

/// Tools available to the model, in registration order. Schemas are checked
/// once on `register`; dispatch never fails.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Registered>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let spec = tool.spec();
        validate_name(&spec.name)?;

        if self.contains(&spec.name) {
            return Err(RegistryError::Duplicate(spec.name));
        }

        let required = validate_schema(&spec.name, &spec.parameters_schema)?;
        tracing::debug!("Registered tool {}", spec.name);
        self.tools.push(Registered {
            tool,
            spec,
            required,
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.spec.name == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn list_tools(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec.clone()).collect()
    }

    /// Parses `raw_args` and runs the named tool. Every failure becomes an
    /// error result naming the tool.
    pub async fn invoke(&self, name: &str, raw_args: &str) -> ToolResult {
        let Some(entry) = self.tools.iter().find(|t| t.spec.name == name) else {
            return failure(name, "unknown tool");
        };

        let args = match parse_arguments(raw_args) {
            Ok(args) => args,
            Err(reason) => return failure(name, &reason),
        };

        if let Some(missing) = entry
            .required
            .iter()
            .find(|key| args.get(key.as_str()).is_none_or(Value::is_null))
        {
            return failure(name, &format!("missing required argument '{}'", missing));
        }

        match entry.tool.execute(args).await {
            Ok(result) if result.success => result,
            Ok(result) => failure(name, result.error.as_deref().unwrap_or("tool reported failure")),
            Err(e) => failure(name, &e.to_string()),
        }
    }
}

fn failure(name: &str, reason: &str) -> ToolResult {
    ToolResult::error(format!("Error executing tool {}: {}", name, reason))
}

fn parse_arguments(raw_args: &str) -> Result<Value, String> {
    if raw_args.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_str::<Value>(raw_args) {
        Ok(Value::Object(map)) => Ok(Value::Object(map)),
        Ok(Value::Null) => Ok(Value::Object(Default::default())),
        Ok(_) => Err("arguments must be a JSON object".to_string()),
        Err(e) => Err(format!("invalid JSON arguments: {}", e)),
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_TOOL_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_string()))
    }
}

fn validate_schema(name: &str, schema: &Value) -> Result<Vec<String>, RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidSchema {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let object = schema
        .as_object()
        .ok_or_else(|| invalid("schema must be a JSON object"))?;

    if object.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("top-level type must be \"object\""));
    }

    let properties = match object.get("properties") {
        None => Default::default(),
        Some(Value::Object(props)) => props.clone(),
        Some(_) => return Err(invalid("\"properties\" must be an object")),
    };

    if let Some((key, _)) = properties.iter().find(|(_, v)| !v.is_object()) {
        return Err(invalid(&format!("property '{}' must be a schema object", key)));
    }

    let required = match object.get("required") {
        None => vec![],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid("\"required\" entries must be strings"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(invalid("\"required\" must be an array")),
    };

    if let Some(undeclared) = required.iter().find(|r| !properties.contains_key(r.as_str())) {
        return Err(invalid(&format!(
            "required property '{}' is not declared",
            undeclared
        )));
    }

    Ok(required)
}
