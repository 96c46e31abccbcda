pub mod agent;
pub mod config;
pub mod memory;
pub mod providers;
pub mod tools;
pub mod traits;
pub mod voice;

#[cfg(test)]
mod test_support;

pub use agent::{AgentLoop, ContextBuilder, InMemorySessionStore, SessionStore, ToolRegistry};
pub use config::*;
pub use memory::{GraphMemory, InMemoryGraph, Neo4jGraph, create_memory};
pub use providers::{OpenAIProvider, create_provider};
pub use tools::default_registry;
pub use traits::*;
pub use voice::{SentenceBuffer, SpeechToText, TextToSpeech, VoiceError};
