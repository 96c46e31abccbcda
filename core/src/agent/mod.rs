pub mod context;
pub mod loop_;
pub mod registry;
pub mod session;

pub use context::ContextBuilder;
pub use loop_::{AgentLoop, MAX_TURNS_NOTICE, ResponseStream};
pub use registry::{RegistryError, ToolRegistry};
pub use session::{InMemorySessionStore, SessionStore};
