use crate::agent::ToolRegistry;
use serde_json::Value;
use std::sync::Arc;

pub mod current_time;
pub mod weather;

pub use current_time::CurrentTimeTool;
pub use weather::WeatherTool;

pub fn extract_string_arg(args: &Value, key: &str) -> anyhow::Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' parameter", key))
        .map(|s| s.to_string())
}

/// Registry preloaded with the built-in assistant tools.
pub fn default_registry() -> anyhow::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CurrentTimeTool))?;
    registry.register(Arc::new(WeatherTool))?;
    Ok(registry)
}
