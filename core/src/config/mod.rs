use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const JARVIS_DIR: &str = ".jarvis";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            api_key: String::new(),
            base_url: None,
            model: "deepseek-chat".to_string(),
            temperature: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SttConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "whisper-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TtsConfig {
    pub api_key: String,
    pub voice_id: String,
    pub model: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            // "Rachel"
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            model: "eleven_multilingual_v2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackend {
    #[default]
    Neo4j,
    InMemory,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    pub backend: MemoryBackend,
    /// HTTP endpoint of the Neo4j server, e.g. `http://localhost:7474`.
    pub url: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub top_k: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::Neo4j,
            url: "http://localhost:7474".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
            top_k: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub max_turns: usize,
    /// Per-session message cap, excluding the system message. 0 disables it.
    pub max_history: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 5,
            max_history: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub memory: MemoryConfig,
    pub agent: AgentConfig,
    pub api: ApiConfig,
    #[serde(skip)]
    pub workspace_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            llm: LlmConfig::default(),
            stt: SttConfig::default(),
            tts: TtsConfig::default(),
            memory: MemoryConfig::default(),
            agent: AgentConfig::default(),
            api: ApiConfig::default(),
            workspace_dir: get_jarvis_dir().join("workspace"),
        }
    }
}

impl Config {
    /// Loads the config file if present, then applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = if config_exists() {
            load_config()?
        } else {
            Config::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("DEEPSEEK_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = var("DEEPSEEK_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Some(v) = var("DEEPSEEK_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = var("OPENAI_API_KEY") {
            self.stt.api_key = v;
        }
        if let Some(v) = var("OPENAI_BASE_URL") {
            self.stt.base_url = v;
        }
        if let Some(v) = var("WHISPER_MODEL") {
            self.stt.model = v;
        }
        if let Some(v) = var("ELEVENLABS_API_KEY") {
            self.tts.api_key = v;
        }
        if let Some(v) = var("ELEVENLABS_VOICE_ID") {
            self.tts.voice_id = v;
        }
        if let Some(v) = var("NEO4J_URL") {
            self.memory.url = v;
        }
        if let Some(v) = var("NEO4J_USER") {
            self.memory.user = v;
        }
        if let Some(v) = var("NEO4J_PASSWORD") {
            self.memory.password = v;
        }
        if let Some(v) = var("JARVIS_API_HOST") {
            self.api.host = v;
        }
        if let Some(port) = var("JARVIS_API_PORT") {
            match port.parse() {
                Ok(port) => self.api.port = port,
                Err(_) => tracing::warn!("Ignoring invalid JARVIS_API_PORT: {}", port),
            }
        }
    }
}

pub fn get_jarvis_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(JARVIS_DIR)
}

pub fn get_config_path() -> PathBuf {
    get_jarvis_dir().join("config.toml")
}

pub fn ensure_jarvis_dir() -> Result<PathBuf> {
    let jarvis_dir = get_jarvis_dir();

    if !jarvis_dir.exists() {
        std::fs::create_dir_all(&jarvis_dir).with_context(|| {
            format!(
                "Failed to create jarvis directory at {}",
                jarvis_dir.display()
            )
        })?;
    }

    Ok(jarvis_dir)
}

pub fn load_config() -> Result<Config> {
    let mut config = load_config_from(&get_config_path())?;
    config.workspace_dir = get_jarvis_dir().join("workspace");
    Ok(config)
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            anyhow::anyhow!(
                "Config file not found at {}. Run 'jarvis init' to set up your configuration.",
                path.display()
            )
        } else {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        }
    })?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", path.display()))?;

    if let Some(parent) = path.parent() {
        config.workspace_dir = parent.join("workspace");
    }

    Ok(config)
}

pub fn save_config(config: &Config) -> Result<()> {
    ensure_jarvis_dir()?;
    save_config_to(config, &get_config_path())
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    let content =
        toml::to_string_pretty(config).with_context(|| "Failed to serialize config to TOML")?;

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(())
}

pub fn config_exists() -> bool {
    get_config_path().exists()
}
