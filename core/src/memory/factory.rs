use crate::config::{MemoryBackend, MemoryConfig};
use crate::memory::{GraphMemory, InMemoryGraph, Neo4jGraph};
use crate::traits::{GraphStore, MemoryStore, Provider};
use anyhow::Result;
use std::sync::Arc;

/// Builds the configured long-term memory, or `None` when it is disabled.
/// An unreachable graph is reported but still used, since every memory
/// operation degrades to a no-op on failure.
pub async fn create_memory(
    config: &MemoryConfig,
    provider: Arc<dyn Provider>,
) -> Result<Option<Arc<dyn MemoryStore>>> {
    let graph: Arc<dyn GraphStore> = match config.backend {
        MemoryBackend::Disabled => return Ok(None),
        MemoryBackend::InMemory => Arc::new(InMemoryGraph::new()),
        MemoryBackend::Neo4j => Arc::new(Neo4jGraph::new(
            &config.url,
            &config.database,
            config.user.clone(),
            config.password.clone(),
        )?),
    };

    if graph.health_check().await {
        tracing::debug!("Using {} graph for long-term memory", graph.name());
    } else {
        tracing::warn!(
            "{} graph at {} is not reachable; memory will be empty until it is",
            graph.name(),
            config.url
        );
    }
    Ok(Some(Arc::new(GraphMemory::new(provider, graph))))
}
