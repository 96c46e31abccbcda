use std::path::{Path, PathBuf};

pub const DEFAULT_IDENTITY: &str = "You are a helpful AI assistant named Jarvis. \
You can use tools to answer questions and you have a long-term memory.";

const SOUL_FILE: &str = "SOUL.md";
const SOUL_MAX_CHARS: usize = 20_000;

/// Builds the prompts the conversation loop sends around the user's words.
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    pub workspace: Option<PathBuf>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace(mut self, workspace: impl AsRef<Path>) -> Self {
        self.workspace = Some(workspace.as_ref().to_path_buf());
        self
    }

    pub fn build_system_prompt(&self) -> String {
        let identity = self.load_soul().unwrap_or_else(|| DEFAULT_IDENTITY.to_string());
        let started = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");

        format!("{}\n\n## Runtime Context\n\nSession started: {}", identity, started)
    }

    /// Prepends retrieved background knowledge to the user's message.
    pub fn user_message(&self, background: &str, user_text: &str) -> String {
        format!("{}{}", background, user_text)
    }

    pub fn memory_summary(&self, user_text: &str, reply: &str) -> String {
        format!("User said: {}. Assistant replied: {}", user_text, reply)
    }

    fn load_soul(&self) -> Option<String> {
        let path = self.workspace.as_ref()?.join(SOUL_FILE);
        let content = std::fs::read_to_string(path).ok()?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.chars().take(SOUL_MAX_CHARS).collect())
    }
}
