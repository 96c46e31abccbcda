use crate::memory::extraction::{entity_prompt, parse_entities, parse_triplets, triplet_prompt};
use crate::traits::{ChatMessage, ChatRequest, GraphStore, MemoryStore, Provider};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const BACKGROUND_PREFIX: &str = "Background knowledge: ";

/// Long-term memory that lets the model turn text into triplets and stores
/// them in a graph.
pub struct GraphMemory {
    provider: Arc<dyn Provider>,
    graph: Arc<dyn GraphStore>,
}

impl GraphMemory {
    pub fn new(provider: Arc<dyn Provider>, graph: Arc<dyn GraphStore>) -> Self {
        Self { provider, graph }
    }

    async fn complete_json(&self, prompt: String) -> anyhow::Result<String> {
        let messages = [ChatMessage::user(prompt)];
        let response = self.provider.chat(ChatRequest::new(&messages).json()).await?;
        Ok(response.text.unwrap_or_default())
    }
}

#[async_trait]
impl MemoryStore for GraphMemory {
    async fn extract_and_store(&self, text: &str) -> usize {
        let raw = match self.complete_json(triplet_prompt(text)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Triplet extraction request failed: {}", e);
                return 0;
            }
        };

        let triplets = match parse_triplets(&raw) {
            Ok(triplets) => triplets,
            Err(e) => {
                warn!("Failed to parse triplets: {} (raw output: {})", e, raw);
                return 0;
            }
        };

        let mut stored = 0;
        for triplet in &triplets {
            match self.graph.merge_triplet(triplet).await {
                Ok(()) => stored += 1,
                Err(e) => warn!(
                    "Failed to store triplet ({}, {}, {}): {}",
                    triplet.subject, triplet.relation, triplet.object, e
                ),
            }
        }

        info!("Stored {} triplets in {}", stored, self.graph.name());
        stored
    }

    async fn retrieve_context(&self, query: &str, top_k: usize) -> String {
        let raw = match self.complete_json(entity_prompt(query)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Entity extraction request failed: {}", e);
                return String::new();
            }
        };

        let entities = match parse_entities(&raw) {
            Ok(entities) => entities,
            Err(e) => {
                warn!("Failed to parse entities: {} (raw output: {})", e, raw);
                return String::new();
            }
        };

        if entities.is_empty() {
            return String::new();
        }
        debug!("Looking up {} entities in {}", entities.len(), self.graph.name());

        let mut seen = HashSet::new();
        let mut sentences = Vec::new();
        for entity in &entities {
            let facts = match self.graph.facts_about(entity, top_k).await {
                Ok(facts) => facts,
                Err(e) => {
                    warn!("Failed to retrieve context from {}: {}", self.graph.name(), e);
                    return String::new();
                }
            };
            for fact in facts {
                let sentence = fact.to_string();
                if seen.insert(sentence.clone()) {
                    sentences.push(sentence);
                }
            }
        }

        if sentences.is_empty() {
            return String::new();
        }

        format!("{}{}\n\n", BACKGROUND_PREFIX, sentences.join(" "))
    }
}
