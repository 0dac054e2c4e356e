//! Vector store client for message embeddings.
//!
//! Talks to a Chroma-style HTTP API: one `message_history` collection,
//! upserts keyed by message id, similarity queries filtered by metadata.
//! Every caller treats failures as non-fatal — embedding is fire-and-forget.

use crate::errors::{CoreError, CoreResult};
use crate::message::MessageState;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

const COLLECTION_NAME: &str = "message_history";

/// Chroma-backed vector store for message history.
pub struct VectorStore {
    base_url: String,
    http: HttpClient,
    collection_id: RwLock<Option<String>>,
}

impl VectorStore {
    pub fn new(base_url: impl Into<String>) -> CoreResult<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CoreError::configuration(format!("http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            http,
            collection_id: RwLock::new(None),
        })
    }

    /// Get or create the backing collection, caching its id.
    async fn collection_id(&self) -> CoreResult<String> {
        if let Some(id) = self.collection_id.read().await.clone() {
            return Ok(id);
        }

        let response = self
            .http
            .post(format!("{}/api/v1/collections", self.base_url))
            .json(&json!({
                "name": COLLECTION_NAME,
                "get_or_create": true,
                "metadata": { "hnsw:space": "cosine" },
            }))
            .send()
            .await
            .map_err(|e| CoreError::transient("vector-store", &e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::transient(
                "vector-store",
                &format!("collection create status {}", response.status()),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::parse(format!("vector-store response: {e}")))?;
        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::parse("vector-store collection response missing id"))?
            .to_string();

        *self.collection_id.write().await = Some(id.clone());
        Ok(id)
    }

    /// Upsert a message embedding keyed by the message id.
    pub async fn embed_message(&self, state: &MessageState) -> CoreResult<()> {
        let collection = self.collection_id().await?;
        let response = self
            .http
            .post(format!(
                "{}/api/v1/collections/{collection}/upsert",
                self.base_url
            ))
            .json(&json!({
                "ids": [state.id.to_string()],
                "documents": [state.content_text],
                "metadatas": [{
                    "user_id": state.user_id.to_string(),
                    "platform": state.platform.as_str(),
                    "sender_id": state.sender.id,
                    "timestamp": state.timestamp.to_rfc3339(),
                }],
            }))
            .send()
            .await
            .map_err(|e| CoreError::transient("vector-store", &e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::transient(
                "vector-store",
                &format!("upsert status {}", response.status()),
            ));
        }
        debug!(message_id = %state.id, "message embedded");
        Ok(())
    }

    /// Retrieve similar message texts for a user by content similarity.
    pub async fn similar_messages(
        &self,
        query: &str,
        user_id: &str,
        n: usize,
        platform: Option<&str>,
    ) -> CoreResult<Vec<String>> {
        let collection = self.collection_id().await?;

        let filter = match platform {
            Some(platform) => json!({
                "$and": [
                    { "user_id": user_id },
                    { "platform": platform },
                ]
            }),
            None => json!({ "user_id": user_id }),
        };

        let response = self
            .http
            .post(format!(
                "{}/api/v1/collections/{collection}/query",
                self.base_url
            ))
            .json(&json!({
                "query_texts": [query],
                "n_results": n,
                "where": filter,
            }))
            .send()
            .await
            .map_err(|e| CoreError::transient("vector-store", &e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::transient(
                "vector-store",
                &format!("query status {}", response.status()),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::parse(format!("vector-store response: {e}")))?;
        let documents = body
            .get("documents")
            .and_then(|d| d.get(0))
            .and_then(|d| d.as_array())
            .map(|docs| {
                docs.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(documents)
    }
}
