//! Enrichment pipeline.
//!
//! For one normalized message: load sender history and thread activity,
//! run the three agents concurrently, merge their partial records after
//! the join barrier, rank, persist, embed, and publish. Batch mode pushes
//! N messages through under a semaphore; a failed message never stops its
//! peers.

use chrono::Utc;
use prism_core::agents::{classifier, context, ranker, sentiment, SenderHistory, ThreadActivity};
use prism_core::cache::RedisCache;
use prism_core::llm::LlmClient;
use prism_core::message::MessageState;
use prism_core::pubsub::EventPublisher;
use prism_core::vector::VectorStore;
use prism_db::repositories::{ContactRepository, MessageRepository};
use prism_db::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Default concurrency for on-demand batches.
pub const BATCH_CONCURRENCY: usize = 5;
/// Sync-triggered batches run narrower to leave headroom for requests.
pub const SYNC_BATCH_CONCURRENCY: usize = 3;

const HISTORY_WINDOW: u64 = 20;

pub struct EnrichmentPipeline {
    db: Arc<DatabaseConnection>,
    llm: Arc<LlmClient>,
    cache: Option<RedisCache>,
    publisher: Option<EventPublisher>,
    vector: Option<Arc<VectorStore>>,
}

impl EnrichmentPipeline {
    pub fn new(db: Arc<DatabaseConnection>, llm: Arc<LlmClient>) -> Self {
        Self {
            db,
            llm,
            cache: None,
            publisher: None,
            vector: None,
        }
    }

    pub fn with_cache(mut self, cache: RedisCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_vector_store(mut self, vector: Arc<VectorStore>) -> Self {
        self.vector = Some(vector);
        self
    }

    /// Run the full pipeline for a single message. Enrichment failures
    /// degrade to fallbacks; persistence is attempted regardless.
    pub async fn run(&self, mut state: MessageState) -> MessageState {
        let history = self.sender_history(&state).await;

        // Fan out the three agents; the join is the merge barrier.
        let (assessment, classification, reading) = tokio::join!(
            context::build_context(&self.llm, &state, &history),
            classifier::classify(&self.llm, &state),
            sentiment::detect_sentiment(&self.llm, &state),
        );
        state.apply_assessment(assessment);
        state.apply_classification(classification);
        state.apply_sentiment(reading);

        let thread = self.thread_activity(&state).await;

        let ranked = ranker::rank(&state, thread, Utc::now());
        state.enrichment.priority_score = ranked.score;
        state.enrichment.priority_label = ranked.label;

        self.persist(&state).await;
        self.embed(&state);
        self.publish(&state).await;

        info!(
            message_id = %state.id,
            score = state.enrichment.priority_score,
            label = state.enrichment.priority_label.as_str(),
            sentiment = state.enrichment.sentiment.as_str(),
            "pipeline complete"
        );

        state
    }

    /// Process a batch under a concurrency cap. Per-message failures are
    /// isolated; the original state is returned for a message whose task
    /// died.
    pub async fn run_batch(
        self: Arc<Self>,
        states: Vec<MessageState>,
        max_concurrent: usize,
    ) -> Vec<MessageState> {
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut handles = Vec::with_capacity(states.len());

        for state in states {
            let pipeline = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            let fallback = state.clone();
            handles.push((
                fallback,
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    pipeline.run(state).await
                }),
            ));
        }

        let mut processed = Vec::with_capacity(handles.len());
        for (fallback, handle) in handles {
            match handle.await {
                Ok(state) => processed.push(state),
                Err(e) => {
                    error!(message_id = %fallback.id, error = %e, "batch pipeline task failed");
                    processed.push(fallback);
                }
            }
        }
        processed
    }

    /// Sender interaction history for the context builder. `is_read` is
    /// the historical proxy for "user replied" — kept for behavioral
    /// parity even though it conflates the two signals.
    async fn sender_history(&self, state: &MessageState) -> SenderHistory {
        let repo = MessageRepository::new(&self.db);
        match repo
            .sender_history(
                state.user_id,
                &state.sender.id,
                state.platform.as_str(),
                HISTORY_WINDOW,
            )
            .await
        {
            Ok(rows) => {
                let total = rows.len() as u64;
                let replied = rows.iter().filter(|m| m.is_read).count() as u64;
                let interactions = rows
                    .into_iter()
                    .filter_map(|m| m.content_text)
                    .filter(|t| !t.is_empty())
                    .collect();
                SenderHistory {
                    interactions,
                    reply_count: replied,
                    total_messages: total,
                    avg_reply_hours: 0.0,
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to load sender history");
                SenderHistory::default()
            }
        }
    }

    async fn thread_activity(&self, state: &MessageState) -> ThreadActivity {
        let repo = MessageRepository::new(&self.db);
        match repo.thread_activity(state.user_id, &state.thread_id).await {
            Ok((total, recent)) => ThreadActivity {
                message_count: total.max(1),
                recent_count: recent,
            },
            Err(e) => {
                warn!(error = %e, "failed to load thread activity");
                ThreadActivity {
                    message_count: 1,
                    recent_count: 0,
                }
            }
        }
    }

    async fn persist(&self, state: &MessageState) {
        let messages = MessageRepository::new(&self.db);
        if let Err(e) = messages.upsert_state(state).await {
            error!(message_id = %state.id, error = %e, "failed to persist message");
            return;
        }

        let contacts = ContactRepository::new(&self.db);
        if let Err(e) = contacts.upsert_from_state(state).await {
            warn!(message_id = %state.id, error = %e, "failed to upsert contact");
        }

        if let Some(cache) = &self.cache {
            let _ = cache.invalidate_feed(&state.user_id.to_string()).await;
            let _ = cache
                .invalidate_thread(state.platform.as_str(), &state.thread_id)
                .await;
        }
    }

    /// Fire-and-forget vector-store embedding.
    fn embed(&self, state: &MessageState) {
        if let Some(vector) = &self.vector {
            let vector = Arc::clone(vector);
            let state = state.clone();
            tokio::spawn(async move {
                if let Err(e) = vector.embed_message(&state).await {
                    warn!(message_id = %state.id, error = %e, "failed to embed message");
                }
            });
        }
    }

    async fn publish(&self, state: &MessageState) {
        if let Some(publisher) = &self.publisher {
            let data = match serde_json::to_value(state) {
                Ok(data) => data,
                Err(e) => {
                    warn!(message_id = %state.id, error = %e, "unserializable message state");
                    return;
                }
            };
            if let Err(e) = publisher
                .publish_to_user(state.user_id, "new_message", data)
                .await
            {
                warn!(message_id = %state.id, error = %e, "failed to publish new_message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::llm::LlmConfig;
    use prism_core::message::{Platform, PriorityLabel, RelationshipType, SenderProfile, Sentiment};
    use prism_db::entities::{contact, message};
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::collections::BTreeMap;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn count_row(n: i64) -> BTreeMap<&'static str, sea_orm::Value> {
        BTreeMap::from([("num_items", sea_orm::Value::BigInt(Some(n)))])
    }

    fn incoming() -> MessageState {
        MessageState::new(
            Uuid::new_v4(),
            Platform::Slack,
            "1714.42",
            "C7",
            SenderProfile {
                id: "U9".into(),
                name: "Priya".into(),
                ..Default::default()
            },
            "need this asap — production is down, critical emergency",
            Utc::now(),
        )
    }

    fn stored(state: &MessageState) -> message::Model {
        message::Model {
            id: state.id,
            user_id: state.user_id,
            platform: state.platform.as_str().to_string(),
            platform_message_id: state.platform_message_id.clone(),
            thread_id: Some(state.thread_id.clone()),
            sender_id: state.sender.id.clone(),
            sender_name: Some(state.sender.name.clone()),
            sender_email: None,
            content_text: Some(state.content_text.clone()),
            timestamp: state.timestamp,
            is_read: false,
            is_done: false,
            snoozed_until: None,
            priority_score: 0.9,
            priority_label: "urgent".to_string(),
            sentiment: "urgent".to_string(),
            ai_context_note: None,
            summary: None,
            classification_reasoning: None,
            is_complaint: false,
            needs_careful_response: true,
            suggested_approach: None,
            suggested_actions: serde_json::json!([]),
            draft_reply: None,
            processed_at: None,
            created_at: Utc::now(),
        }
    }

    fn stored_contact(state: &MessageState) -> contact::Model {
        contact::Model {
            id: Uuid::new_v4(),
            user_id: state.user_id,
            contact_identifier: state.sender.id.clone(),
            platform: state.platform.as_str().to_string(),
            display_name: Some(state.sender.name.clone()),
            relationship: "vip".to_string(),
            is_vip: true,
            reply_rate: 0.9,
            message_count: 1,
            last_interaction: None,
            created_at: Utc::now(),
        }
    }

    /// One agent response body satisfying all three fast agents — each
    /// reads only its own fields.
    fn agent_body() -> serde_json::Value {
        serde_json::json!({
            "content": [{ "type": "text", "text": serde_json::json!({
                "relationship_type": "vip",
                "reply_rate": 0.9,
                "context_summary": "Your on-call SRE",
                "is_likely_important": true,
                "label": "urgent",
                "priority_score": 0.95,
                "time_sensitive": true,
                "reasoning": "production outage",
                "sentiment": "urgent",
                "is_complaint": false,
                "needs_careful_response": true,
                "suggested_approach": "acknowledge immediately",
            }).to_string() }],
        })
    }

    #[tokio::test]
    async fn test_run_merges_ranks_and_persists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(agent_body()))
            .mount(&server)
            .await;

        let state = incoming();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // sender history
            .append_query_results::<message::Model, _, _>([vec![]])
            // thread activity counts (total, recent)
            .append_query_results([vec![count_row(4)], vec![count_row(4)]])
            // message upsert: natural-key lookup misses, insert returns
            .append_query_results::<message::Model, _, _>([vec![]])
            .append_query_results([vec![stored(&state)]])
            // contact upsert: lookup misses, insert returns
            .append_query_results::<contact::Model, _, _>([vec![]])
            .append_query_results([vec![stored_contact(&state)]])
            .into_connection();

        let llm =
            Arc::new(LlmClient::new(LlmConfig::new("k").with_base_url(server.uri())).unwrap());
        let pipeline = EnrichmentPipeline::new(Arc::new(db), llm);

        let enriched = pipeline.run(state).await;

        assert_eq!(enriched.sender.relationship, RelationshipType::Vip);
        assert!(enriched.sender.is_vip);
        assert_eq!(enriched.enrichment.sentiment, Sentiment::Urgent);
        // VIP + urgency keywords + fresh message + active thread
        assert!(enriched.enrichment.priority_score >= 0.85);
        assert_eq!(enriched.enrichment.priority_label, PriorityLabel::Urgent);
        assert!(enriched.enrichment.needs_careful_response);
    }

    #[tokio::test]
    async fn test_run_survives_total_llm_outage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let state = incoming();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results::<message::Model, _, _>([vec![]])
            .append_query_results([vec![count_row(1)], vec![count_row(0)]])
            .append_query_results::<message::Model, _, _>([vec![]])
            .append_query_results([vec![stored(&state)]])
            .append_query_results::<contact::Model, _, _>([vec![]])
            .append_query_results([vec![stored_contact(&state)]])
            .into_connection();

        let llm =
            Arc::new(LlmClient::new(LlmConfig::new("k").with_base_url(server.uri())).unwrap());
        let pipeline = EnrichmentPipeline::new(Arc::new(db), llm);

        let enriched = pipeline.run(state).await;

        // Fallbacks carried the message through; score stays in range
        assert!(enriched.enrichment.priority_score >= 0.0);
        assert!(enriched.enrichment.priority_score <= 1.0);
        assert!(enriched
            .enrichment
            .classification_reasoning
            .contains("fallback"));
        // Keyword fallback still reads the distress signals
        assert_eq!(enriched.enrichment.sentiment, Sentiment::Distressed);
    }
}
