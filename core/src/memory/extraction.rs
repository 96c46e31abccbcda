//! Prompts and validated parsing for the memory extraction calls.
//!
//! The model is asked for a single JSON object. Anything that does not match
//! the expected shape is reported as an [`ExtractionError`] instead of being
//! trusted ad hoc.

use crate::traits::memory::normalize_kind;
use crate::traits::{EntityRef, Triplet};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("model output is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("model output has no \"{0}\" key")]
    MissingKey(&'static str),
    #[error("\"{0}\" is not a list")]
    NotAList(&'static str),
}

pub fn triplet_prompt(text: &str) -> String {
    format!(
        r#"Extract knowledge triplets (subject, relation, object) from the text below.
Follow these rules:
1. Subject and object must be concrete entities (people, places, organizations, concepts, ...).
2. The relation is a short descriptive verb or phrase.
3. Give each entity a type in "subject_type" / "object_type" (person, place, organization, concept, ...).
4. Respond with one JSON object of the form {{"triplets": [{{"subject": "...", "subject_type": "...", "relation": "...", "object": "...", "object_type": "..."}}]}}.
5. If there is nothing to extract, respond with {{"triplets": []}}.

Text: "{text}""#
    )
}

pub fn entity_prompt(query: &str) -> String {
    format!(
        r#"Identify the core entities (people, places, organizations, ...) in the question below.
Respond with one JSON object of the form {{"entities": [{{"name": "...", "type": "..."}}]}}.
If there are none, respond with {{"entities": []}}.

Question: "{query}""#
    )
}

pub fn parse_triplets(raw: &str) -> Result<Vec<Triplet>, ExtractionError> {
    let items = list_under_key(raw, "triplets")?;

    let triplets = items
        .iter()
        .filter_map(|item| {
            let field = |key: &str| non_empty_str(item.get(key));
            let triplet = Triplet {
                subject: field("subject")?,
                subject_kind: normalize_kind(item.get("subject_type").and_then(Value::as_str)),
                relation: field("relation")?,
                object: field("object")?,
                object_kind: normalize_kind(item.get("object_type").and_then(Value::as_str)),
            };
            Some(triplet)
        })
        .collect::<Vec<_>>();

    if triplets.len() < items.len() {
        tracing::debug!(
            "Skipped {} malformed triplets",
            items.len() - triplets.len()
        );
    }

    Ok(triplets)
}

pub fn parse_entities(raw: &str) -> Result<Vec<EntityRef>, ExtractionError> {
    let items = list_under_key(raw, "entities")?;

    let mut seen = HashSet::new();
    let entities = items
        .iter()
        .filter_map(|item| match item {
            Value::String(_) => non_empty_str(Some(item)).map(EntityRef::named),
            Value::Object(_) => {
                let name = non_empty_str(item.get("name"))?;
                let kind = item
                    .get("type")
                    .and_then(Value::as_str)
                    .filter(|k| !k.trim().is_empty())
                    .map(|k| normalize_kind(Some(k)));
                Some(EntityRef { name, kind })
            }
            _ => None,
        })
        .filter(|entity| seen.insert(entity.clone()))
        .collect();

    Ok(entities)
}

fn list_under_key(raw: &str, key: &'static str) -> Result<Vec<Value>, ExtractionError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| ExtractionError::InvalidJson(e.to_string()))?;

    match value.get(key) {
        None | Some(Value::Null) => Err(ExtractionError::MissingKey(key)),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(ExtractionError::NotAList(key)),
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
