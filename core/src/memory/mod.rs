pub mod extraction;
pub mod factory;
pub mod graph;
pub mod in_memory;
pub mod neo4j;

pub use extraction::ExtractionError;
pub use factory::create_memory;
pub use graph::GraphMemory;
pub use in_memory::InMemoryGraph;
pub use neo4j::{GraphError, Neo4jGraph};
