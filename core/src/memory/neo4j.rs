//! Neo4j backend over the HTTP transactional Cypher endpoint.

use crate::traits::{EntityRef, Fact, GraphStore, Triplet};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

const MERGE_TRIPLET: &str = "\
MERGE (s:Entity {name: $subject, kind: $subject_kind})
MERGE (o:Entity {name: $object, kind: $object_kind})
MERGE (s)-[:RELATION {type: $relation}]->(o)";

const FACTS_ABOUT: &str = "\
MATCH (n:Entity {name: $name})-[r:RELATION]-(:Entity)
WHERE $kind IS NULL OR n.kind = $kind
RETURN startNode(r).name AS subject, r.type AS relation, endNode(r).name AS object
LIMIT $limit";

const EDGE_COUNT: &str = "MATCH (:Entity)-[r:RELATION]->(:Entity) RETURN count(r)";

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph url must be http(s), got '{0}' (bolt is not supported; use the HTTP port, usually 7474)")]
    UnsupportedUrl(String),
    #[error("graph request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("graph server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("cypher error {code}: {message}")]
    Query { code: String, message: String },
    #[error("unexpected row shape: {0}")]
    UnexpectedRow(String),
}

#[derive(Debug, Serialize)]
struct TxRequest<'a> {
    statements: [Statement<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Statement<'a> {
    statement: &'a str,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

impl TxResponse {
    fn into_rows(self) -> Result<Vec<Vec<Value>>, GraphError> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(GraphError::Query {
                code: error.code,
                message: error.message,
            });
        }
        Ok(self
            .results
            .into_iter()
            .flat_map(|r| r.data)
            .map(|d| d.row)
            .collect())
    }
}

pub struct Neo4jGraph {
    client: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
}

impl Neo4jGraph {
    pub fn new(
        url: &str,
        database: &str,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, GraphError> {
        let url = url.trim_end_matches('/');
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(GraphError::UnsupportedUrl(url.to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Ok(Self {
            client,
            endpoint: format!("{}/db/{}/tx/commit", url, database),
            user: user.into(),
            password: password.into(),
        })
    }

    async fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Vec<Value>>, GraphError> {
        let body = TxRequest {
            statements: [Statement {
                statement,
                parameters,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GraphError::Status { status, body });
        }

        response.json::<TxResponse>().await?.into_rows()
    }
}

fn fact_from_row(row: &[Value]) -> Result<Fact, GraphError> {
    match row {
        [Value::String(subject), Value::String(relation), Value::String(object)] => Ok(Fact {
            subject: subject.clone(),
            relation: relation.clone(),
            object: object.clone(),
        }),
        other => Err(GraphError::UnexpectedRow(Value::from(other.to_vec()).to_string())),
    }
}

#[async_trait]
impl GraphStore for Neo4jGraph {
    fn name(&self) -> &str {
        "neo4j"
    }

    async fn merge_triplet(&self, triplet: &Triplet) -> anyhow::Result<()> {
        self.run(
            MERGE_TRIPLET,
            json!({
                "subject": triplet.subject,
                "subject_kind": triplet.subject_kind,
                "object": triplet.object,
                "object_kind": triplet.object_kind,
                "relation": triplet.relation,
            }),
        )
        .await?;
        Ok(())
    }

    async fn facts_about(&self, entity: &EntityRef, limit: usize) -> anyhow::Result<Vec<Fact>> {
        let rows = self
            .run(
                FACTS_ABOUT,
                json!({
                    "name": entity.name,
                    "kind": entity.kind,
                    "limit": limit,
                }),
            )
            .await?;

        let facts = rows
            .iter()
            .map(|row| fact_from_row(row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(facts)
    }

    async fn edge_count(&self) -> anyhow::Result<usize> {
        let rows = self.run(EDGE_COUNT, json!({})).await?;
        let count = rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_u64)
            .ok_or_else(|| GraphError::UnexpectedRow(format!("{:?}", rows)))?;
        Ok(count as usize)
    }

    async fn health_check(&self) -> bool {
        match self.run("RETURN 1", json!({})).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Neo4j health check failed: {}", e);
                false
            }
        }
    }
}
