use crate::config::LlmConfig;
use crate::providers::openai::{DEEPSEEK_BASE_URL, OPENAI_BASE_URL};
use crate::providers::OpenAIProvider;
use crate::traits::Provider;
use anyhow::{Result, anyhow};

pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn Provider>> {
    let (env_vars, default_base_url): (&[&str], &str) =
        match config.provider.to_lowercase().as_str() {
            "deepseek" => (&["DEEPSEEK_API_KEY", "JARVIS_LLM_API_KEY"], DEEPSEEK_BASE_URL),
            "openai" => (&["JARVIS_LLM_API_KEY", "OPENAI_API_KEY"], OPENAI_BASE_URL),
            other => {
                return Err(anyhow!(
                    "Unknown provider: {}. Available: deepseek, openai",
                    other
                ));
            }
        };

    let api_key = resolve_api_key_with_fallback(env_vars, &config.api_key)?;
    let base_url = config.base_url.as_deref().unwrap_or(default_base_url);

    let provider = OpenAIProvider::new(api_key)
        .with_model(config.model.clone())
        .with_base_url(base_url)
        .with_temperature(config.temperature);

    Ok(Box::new(provider))
}

fn resolve_api_key_with_fallback(env_vars: &[&str], config_key: &str) -> Result<String> {
    if !config_key.is_empty() {
        return Ok(config_key.to_string());
    }
    for var_name in env_vars {
        if let Ok(key) = std::env::var(var_name)
            && !key.trim().is_empty()
        {
            return Ok(key);
        }
    }
    Err(anyhow!(
        "No API key found. Set one of {} or run 'jarvis init'",
        env_vars.join(", ")
    ))
}
