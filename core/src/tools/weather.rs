use crate::tools::extract_string_arg;
use crate::traits::{Tool, ToolResult};
use async_trait::async_trait;
use serde_json::json;

struct CityWeather {
    names: &'static [&'static str],
    location: &'static str,
    temperature: &'static str,
    condition: &'static str,
}

// Simulated readings until a real weather API is wired in.
const CITIES: &[CityWeather] = &[
    CityWeather {
        names: &["beijing", "北京"],
        location: "Beijing",
        temperature: "25°C",
        condition: "sunny",
    },
    CityWeather {
        names: &["shanghai", "上海"],
        location: "Shanghai",
        temperature: "28°C",
        condition: "cloudy",
    },
];

pub struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the current weather for a location."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City name, e.g. Beijing"
                }
            },
            "required": ["location"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let location = extract_string_arg(&args, "location")?;
        let lowered = location.to_lowercase();

        let report = match CITIES
            .iter()
            .find(|city| city.names.iter().any(|name| lowered.contains(name)))
        {
            Some(city) => json!({
                "location": city.location,
                "temperature": city.temperature,
                "condition": city.condition,
            }),
            None => json!({
                "location": location,
                "error": "unknown location",
            }),
        };

        Ok(ToolResult::success(report.to_string()))
    }
}
