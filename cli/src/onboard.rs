use anyhow::{Context, Result};
use console::style;
use dialoguer::{Input, Password, Select};
use jarvis_core::config::{Config, LlmConfig, MemoryBackend, MemoryConfig};
use std::path::Path;

const BANNER: &str = r"
    -------------------------------------

         J . A . R . V . I . S

    -------------------------------------
";

pub const DEFAULT_SOUL: &str = r#"You are a helpful AI assistant named Jarvis. You can use tools to answer questions and you have a long-term memory.

Keep answers short enough to be read aloud. When a tool can answer a question, call it instead of guessing, then explain the result in plain words.
"#;

const PROVIDERS: [(&str, &str); 2] = [("deepseek", "deepseek-chat"), ("openai", "gpt-4o-mini")];
const MEMORY_BACKENDS: [(&str, MemoryBackend); 3] = [
    ("Neo4j graph database", MemoryBackend::Neo4j),
    ("In-process graph (lost on exit)", MemoryBackend::InMemory),
    ("Disabled", MemoryBackend::Disabled),
];

fn print_step(step: usize, total: usize, title: &str) {
    println!();
    println!(
        "{}",
        style(format!("[{}/{}] {}", step, total, title))
            .cyan()
            .bold()
    );
    println!();
}

/// Writes the default persona unless the user already has one.
pub fn ensure_soul_file(workspace: &Path) -> Result<bool> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("Failed to create workspace at {}", workspace.display()))?;

    let path = workspace.join("SOUL.md");
    if path.exists() {
        return Ok(false);
    }
    std::fs::write(&path, DEFAULT_SOUL)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

fn setup_llm() -> Result<LlmConfig> {
    let names: Vec<&str> = PROVIDERS.iter().map(|(name, _)| *name).collect();
    let selection = Select::new()
        .with_prompt("Select your language model provider")
        .items(&names)
        .default(0)
        .interact()
        .context("Failed to select provider")?;
    let (provider, default_model) = PROVIDERS[selection];

    let api_key: String = Password::new()
        .with_prompt(format!("Enter your {} API key", provider))
        .interact()
        .context("Failed to read API key")?;
    if api_key.trim().is_empty() {
        anyhow::bail!("API key cannot be empty");
    }

    let model: String = Input::new()
        .with_prompt("Model")
        .default(default_model.to_string())
        .interact_text()
        .context("Failed to read model")?;

    Ok(LlmConfig {
        provider: provider.to_string(),
        api_key,
        model,
        ..LlmConfig::default()
    })
}

fn optional_secret(prompt: &str) -> Result<String> {
    Password::new()
        .with_prompt(prompt)
        .allow_empty_password(true)
        .interact()
        .with_context(|| format!("Failed to read {}", prompt))
}

fn setup_memory() -> Result<MemoryConfig> {
    let labels: Vec<&str> = MEMORY_BACKENDS.iter().map(|(label, _)| *label).collect();
    let selection = Select::new()
        .with_prompt("Where should long-term memory live?")
        .items(&labels)
        .default(0)
        .interact()
        .context("Failed to select memory backend")?;

    let mut memory = MemoryConfig {
        backend: MEMORY_BACKENDS[selection].1,
        ..MemoryConfig::default()
    };
    if memory.backend != MemoryBackend::Neo4j {
        return Ok(memory);
    }

    memory.url = Input::new()
        .with_prompt("Neo4j HTTP URL")
        .default(memory.url)
        .interact_text()
        .context("Failed to read Neo4j URL")?;
    memory.user = Input::new()
        .with_prompt("Neo4j user")
        .default(memory.user)
        .interact_text()
        .context("Failed to read Neo4j user")?;
    memory.password = optional_secret("Neo4j password")?;
    Ok(memory)
}

pub fn run_init() -> Result<Config> {
    println!("{}", style(BANNER).cyan().bold());
    println!("  {}", style("Welcome to Jarvis!").white().bold());
    println!();

    let mut config = Config::default();

    print_step(1, 4, "Language Model");
    config.llm = setup_llm()?;

    print_step(2, 4, "Voice (optional, leave empty to skip)");
    config.stt.api_key = optional_secret("OpenAI API key for Whisper transcription")?;
    config.tts.api_key = optional_secret("ElevenLabs API key for speech")?;

    print_step(3, 4, "Long-term Memory");
    config.memory = setup_memory()?;

    print_step(4, 4, "Workspace Setup");
    match ensure_soul_file(&config.workspace_dir) {
        Ok(_) => println!(
            "  {} Persona ready at {}",
            style("✓").green(),
            style(config.workspace_dir.join("SOUL.md").display()).cyan()
        ),
        Err(e) => eprintln!(
            "  {} Warning: Could not create SOUL.md: {}",
            style("!").yellow(),
            e
        ),
    }

    println!();
    println!("  {} Configuration complete!", style("✓").green().bold());
    println!(
        "  {} Config saved to {}",
        style("→").green(),
        style(jarvis_core::config::get_config_path().display()).cyan()
    );
    println!(
        "  {} You can now run: {}",
        style("→").green(),
        style("jarvis chat").cyan().bold()
    );
    println!();

    Ok(config)
}
