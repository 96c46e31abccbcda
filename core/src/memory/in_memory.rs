use crate::traits::{EntityRef, Fact, GraphStore, Triplet};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntityKey {
    name: String,
    kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Edge {
    subject: EntityKey,
    relation: String,
    object: EntityKey,
}

#[derive(Default)]
struct GraphState {
    entities: HashSet<EntityKey>,
    edges: Vec<Edge>,
    edge_index: HashSet<Edge>,
}

/// Process-local graph with the same merge semantics as the Neo4j backend.
#[derive(Default)]
pub struct InMemoryGraph {
    state: RwLock<GraphState>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_count(&self) -> usize {
        self.state
            .read()
            .map(|state| state.entities.len())
            .unwrap_or_default()
    }
}

fn matches(key: &EntityKey, entity: &EntityRef) -> bool {
    key.name == entity.name && entity.kind.as_ref().is_none_or(|kind| &key.kind == kind)
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn merge_triplet(&self, triplet: &Triplet) -> anyhow::Result<()> {
        let subject = EntityKey {
            name: triplet.subject.clone(),
            kind: triplet.subject_kind.clone(),
        };
        let object = EntityKey {
            name: triplet.object.clone(),
            kind: triplet.object_kind.clone(),
        };
        let edge = Edge {
            subject: subject.clone(),
            relation: triplet.relation.clone(),
            object: object.clone(),
        };

        let mut state = self
            .state
            .write()
            .map_err(|_| anyhow::anyhow!("graph lock poisoned"))?;
        state.entities.insert(subject);
        state.entities.insert(object);
        if state.edge_index.insert(edge.clone()) {
            state.edges.push(edge);
        }
        Ok(())
    }

    async fn facts_about(&self, entity: &EntityRef, limit: usize) -> anyhow::Result<Vec<Fact>> {
        let state = self
            .state
            .read()
            .map_err(|_| anyhow::anyhow!("graph lock poisoned"))?;

        Ok(state
            .edges
            .iter()
            .filter(|edge| matches(&edge.subject, entity) || matches(&edge.object, entity))
            .take(limit)
            .map(|edge| Fact {
                subject: edge.subject.name.clone(),
                relation: edge.relation.clone(),
                object: edge.object.name.clone(),
            })
            .collect())
    }

    async fn edge_count(&self) -> anyhow::Result<usize> {
        let state = self
            .state
            .read()
            .map_err(|_| anyhow::anyhow!("graph lock poisoned"))?;
        Ok(state.edges.len())
    }

    async fn health_check(&self) -> bool {
        true
    }
}
