use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_ENTITY_KIND: &str = "thing";

/// A (subject, relation, object) fact. Entities are keyed by name and kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Triplet {
    pub subject: String,
    pub subject_kind: String,
    pub relation: String,
    pub object: String,
    pub object_kind: String,
}

impl Triplet {
    pub fn new(
        subject: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            subject_kind: DEFAULT_ENTITY_KIND.to_string(),
            relation: relation.into(),
            object: object.into(),
            object_kind: DEFAULT_ENTITY_KIND.to_string(),
        }
    }

    pub fn with_kinds(mut self, subject_kind: &str, object_kind: &str) -> Self {
        self.subject_kind = normalize_kind(Some(subject_kind));
        self.object_kind = normalize_kind(Some(object_kind));
        self
    }
}

/// An entity mentioned in a query. `kind: None` matches every kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub name: String,
    pub kind: Option<String>,
}

impl EntityRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
        }
    }
}

/// A stored edge as returned by the graph, in stored direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fact {
    pub subject: String,
    pub relation: String,
    pub object: String,
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}.", self.subject, self.relation, self.object)
    }
}

pub fn normalize_kind(kind: Option<&str>) -> String {
    match kind.map(str::trim) {
        Some(k) if !k.is_empty() => k.to_lowercase(),
        _ => DEFAULT_ENTITY_KIND.to_string(),
    }
}

/// Persistence for triplets. Merges are idempotent.
#[async_trait]
pub trait GraphStore: Send + Sync {
    fn name(&self) -> &str;

    async fn merge_triplet(&self, triplet: &Triplet) -> anyhow::Result<()>;

    async fn facts_about(&self, entity: &EntityRef, limit: usize) -> anyhow::Result<Vec<Fact>>;

    async fn edge_count(&self) -> anyhow::Result<usize>;

    async fn health_check(&self) -> bool;
}

/// Long-term conversational memory. Both operations are best-effort and
/// never fail the caller.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Extracts triplets from `text` and persists them. Returns how many
    /// triplets were stored.
    async fn extract_and_store(&self, text: &str) -> usize;

    /// Returns a background-knowledge block for `query`, or an empty string.
    async fn retrieve_context(&self, query: &str, top_k: usize) -> String;
}
