pub mod memory;
pub mod provider;
pub mod tool;

pub use memory::{EntityRef, Fact, GraphStore, MemoryStore, Triplet};
pub use provider::{
    ChatMessage, ChatRequest, ChatResponse, Provider, ProviderEvent, Role, ToolCall,
};
pub use tool::{Tool, ToolResult, ToolSpec};
