//! Message repository
//!
//! Upserts are keyed by `(user_id, platform, platform_message_id)`:
//! repeated ingests update enrichment fields and `processed_at` in place
//! without creating duplicate rows.

use crate::entities::message;
use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Duration, Utc};
use prism_core::message::MessageState;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

/// Feed queries never return more than this many rows per page.
pub const FEED_LIMIT_CAP: u64 = 100;

/// Optional feed filters.
#[derive(Debug, Clone, Default)]
pub struct FeedFilter {
    pub platform: Option<String>,
    pub priority: Option<String>,
}

/// One page of the ranked feed.
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub messages: Vec<message::Model>,
    pub total: u64,
}

/// Partial update of user-controlled message state.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub is_read: Option<bool>,
    pub is_done: Option<bool>,
    pub snoozed_until: Option<DateTime<Utc>>,
}

impl MessagePatch {
    pub fn is_empty(&self) -> bool {
        self.is_read.is_none() && self.is_done.is_none() && self.snoozed_until.is_none()
    }
}

/// Repository for managing messages
pub struct MessageRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> MessageRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert or update a message by its natural key. On hit only the
    /// enrichment fields and `processed_at` are overwritten — user state
    /// (read/done/snooze) is left alone.
    pub async fn upsert_state(&self, state: &MessageState) -> Result<message::Model> {
        let existing = message::Entity::find()
            .filter(message::Column::UserId.eq(state.user_id))
            .filter(message::Column::Platform.eq(state.platform.as_str()))
            .filter(message::Column::PlatformMessageId.eq(state.platform_message_id.as_str()))
            .one(self.db)
            .await?;

        let now = Utc::now();
        let enrichment = &state.enrichment;

        match existing {
            Some(model) => {
                let mut active: message::ActiveModel = model.into();
                active.priority_score = Set(enrichment.priority_score);
                active.priority_label = Set(enrichment.priority_label.as_str().to_string());
                active.sentiment = Set(enrichment.sentiment.as_str().to_string());
                active.ai_context_note = Set(some_if_filled(&enrichment.context_note));
                active.summary = Set(some_if_filled(&enrichment.summary));
                active.classification_reasoning =
                    Set(some_if_filled(&enrichment.classification_reasoning));
                active.is_complaint = Set(enrichment.is_complaint);
                active.needs_careful_response = Set(enrichment.needs_careful_response);
                active.suggested_approach = Set(some_if_filled(&enrichment.suggested_approach));
                active.suggested_actions = Set(serde_json::json!(enrichment.suggested_actions));
                active.processed_at = Set(Some(now));
                Ok(active.update(self.db).await?)
            }
            None => {
                let active = message::ActiveModel {
                    id: Set(state.id),
                    user_id: Set(state.user_id),
                    platform: Set(state.platform.as_str().to_string()),
                    platform_message_id: Set(state.platform_message_id.clone()),
                    thread_id: Set(some_if_filled(&state.thread_id)),
                    sender_id: Set(state.sender.id.clone()),
                    sender_name: Set(some_if_filled(&state.sender.name)),
                    sender_email: Set(state.sender.email.clone()),
                    content_text: Set(Some(state.content_text.clone())),
                    timestamp: Set(state.timestamp),
                    is_read: Set(state.is_read),
                    is_done: Set(state.is_done),
                    snoozed_until: Set(state.snoozed_until),
                    priority_score: Set(enrichment.priority_score),
                    priority_label: Set(enrichment.priority_label.as_str().to_string()),
                    sentiment: Set(enrichment.sentiment.as_str().to_string()),
                    ai_context_note: Set(some_if_filled(&enrichment.context_note)),
                    summary: Set(some_if_filled(&enrichment.summary)),
                    classification_reasoning: Set(some_if_filled(
                        &enrichment.classification_reasoning,
                    )),
                    is_complaint: Set(enrichment.is_complaint),
                    needs_careful_response: Set(enrichment.needs_careful_response),
                    suggested_approach: Set(some_if_filled(&enrichment.suggested_approach)),
                    suggested_actions: Set(serde_json::json!(enrichment.suggested_actions)),
                    draft_reply: Set(state.draft_reply.clone()),
                    processed_at: Set(Some(now)),
                    created_at: Set(now),
                };
                Ok(active.insert(self.db).await?)
            }
        }
    }

    /// Fetch a message by id, ensuring it belongs to the user.
    pub async fn find_for_user(&self, id: Uuid, user_id: Uuid) -> Result<Option<message::Model>> {
        Ok(message::Entity::find_by_id(id)
            .filter(message::Column::UserId.eq(user_id))
            .one(self.db)
            .await?)
    }

    /// Ranked feed: visible messages ordered by priority then recency.
    pub async fn feed(
        &self,
        user_id: Uuid,
        filter: &FeedFilter,
        offset: u64,
        limit: u64,
    ) -> Result<FeedPage> {
        let limit = limit.min(FEED_LIMIT_CAP);

        let mut query = message::Entity::find()
            .filter(message::Column::UserId.eq(user_id))
            .filter(message::Column::IsDone.eq(false))
            .filter(message::Column::SnoozedUntil.is_null());

        if let Some(platform) = &filter.platform {
            query = query.filter(message::Column::Platform.eq(platform.as_str()));
        }
        if let Some(priority) = &filter.priority {
            query = query.filter(message::Column::PriorityLabel.eq(priority.as_str()));
        }

        let total = query.clone().count(self.db).await?;

        let messages = query
            .order_by_desc(message::Column::PriorityScore)
            .order_by_desc(message::Column::Timestamp)
            .offset(offset)
            .limit(limit)
            .all(self.db)
            .await?;

        Ok(FeedPage { messages, total })
    }

    /// All messages of a thread in chronological order.
    pub async fn thread(
        &self,
        user_id: Uuid,
        platform: &str,
        thread_id: &str,
    ) -> Result<Vec<message::Model>> {
        Ok(message::Entity::find()
            .filter(message::Column::UserId.eq(user_id))
            .filter(message::Column::Platform.eq(platform))
            .filter(message::Column::ThreadId.eq(thread_id))
            .order_by_asc(message::Column::Timestamp)
            .all(self.db)
            .await?)
    }

    /// Apply a user-state patch (read / done / snooze).
    pub async fn update_state(
        &self,
        id: Uuid,
        user_id: Uuid,
        patch: &MessagePatch,
    ) -> Result<message::Model> {
        let model = self
            .find_for_user(id, user_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("message {id}")))?;

        let mut active: message::ActiveModel = model.into();
        if let Some(is_read) = patch.is_read {
            active.is_read = Set(is_read);
        }
        if let Some(is_done) = patch.is_done {
            active.is_done = Set(is_done);
        }
        if let Some(snoozed_until) = patch.snoozed_until {
            active.snoozed_until = Set(Some(snoozed_until));
        }
        Ok(active.update(self.db).await?)
    }

    /// Save a draft reply on the message.
    pub async fn set_draft(&self, id: Uuid, user_id: Uuid, draft: &str) -> Result<message::Model> {
        let model = self
            .find_for_user(id, user_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("message {id}")))?;
        let mut active: message::ActiveModel = model.into();
        active.draft_reply = Set(Some(draft.to_string()));
        Ok(active.update(self.db).await?)
    }

    /// User correction of the classification: override label, score and
    /// reasoning.
    pub async fn reclassify(
        &self,
        id: Uuid,
        user_id: Uuid,
        label: &str,
        score: f64,
        reasoning: &str,
    ) -> Result<message::Model> {
        let model = self
            .find_for_user(id, user_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("message {id}")))?;
        let mut active: message::ActiveModel = model.into();
        active.priority_label = Set(label.to_string());
        active.priority_score = Set(score);
        active.classification_reasoning = Set(Some(reasoning.to_string()));
        Ok(active.update(self.db).await?)
    }

    /// Snoozed messages that are due to resurface.
    pub async fn due_snoozes(&self, now: DateTime<Utc>) -> Result<Vec<message::Model>> {
        Ok(message::Entity::find()
            .filter(message::Column::SnoozedUntil.is_not_null())
            .filter(message::Column::SnoozedUntil.lte(now))
            .filter(message::Column::IsDone.eq(false))
            .all(self.db)
            .await?)
    }

    /// Clear the snooze marker after the reaper resurfaces a message.
    pub async fn clear_snooze(&self, id: Uuid) -> Result<()> {
        let model = message::Entity::find_by_id(id)
            .one(self.db)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("message {id}")))?;
        let mut active: message::ActiveModel = model.into();
        active.snoozed_until = Set(None);
        active.update(self.db).await?;
        Ok(())
    }

    /// Messages eligible for score decay: open, older than the cutoff and
    /// still carrying a meaningful score.
    pub async fn decay_candidates(&self, cutoff: DateTime<Utc>) -> Result<Vec<message::Model>> {
        Ok(message::Entity::find()
            .filter(message::Column::IsDone.eq(false))
            .filter(message::Column::Timestamp.lt(cutoff))
            .filter(message::Column::PriorityScore.gt(0.1))
            .all(self.db)
            .await?)
    }

    /// Write a decayed score back.
    pub async fn set_score(&self, id: Uuid, score: f64) -> Result<()> {
        let model = message::Entity::find_by_id(id)
            .one(self.db)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("message {id}")))?;
        let mut active: message::ActiveModel = model.into();
        active.priority_score = Set(score);
        active.update(self.db).await?;
        Ok(())
    }

    /// Recent messages from one sender, newest first (history window for
    /// the context builder).
    pub async fn sender_history(
        &self,
        user_id: Uuid,
        sender_id: &str,
        platform: &str,
        limit: u64,
    ) -> Result<Vec<message::Model>> {
        Ok(message::Entity::find()
            .filter(message::Column::UserId.eq(user_id))
            .filter(message::Column::SenderId.eq(sender_id))
            .filter(message::Column::Platform.eq(platform))
            .order_by_desc(message::Column::Timestamp)
            .limit(limit)
            .all(self.db)
            .await?)
    }

    /// Thread activity counters for the ranker: total messages and
    /// messages within the last 24 hours.
    pub async fn thread_activity(&self, user_id: Uuid, thread_id: &str) -> Result<(u64, u64)> {
        let base = message::Entity::find()
            .filter(message::Column::UserId.eq(user_id))
            .filter(message::Column::ThreadId.eq(thread_id));

        let total = base.clone().count(self.db).await?;
        let recent = base
            .filter(message::Column::Timestamp.gte(Utc::now() - Duration::hours(24)))
            .count(self.db)
            .await?;

        Ok((total, recent))
    }

    /// Last messages of a thread for draft context, oldest first.
    pub async fn thread_context(
        &self,
        user_id: Uuid,
        platform: &str,
        thread_id: &str,
        limit: u64,
    ) -> Result<Vec<message::Model>> {
        let mut recent = message::Entity::find()
            .filter(message::Column::UserId.eq(user_id))
            .filter(message::Column::Platform.eq(platform))
            .filter(message::Column::ThreadId.eq(thread_id))
            .order_by_desc(message::Column::Timestamp)
            .limit(limit)
            .all(self.db)
            .await?;
        recent.reverse();
        Ok(recent)
    }
}

fn some_if_filled(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::message::{Platform, SenderProfile};
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn stored_model(state: &MessageState) -> message::Model {
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
            priority_score: state.enrichment.priority_score,
            priority_label: state.enrichment.priority_label.as_str().to_string(),
            sentiment: state.enrichment.sentiment.as_str().to_string(),
            ai_context_note: None,
            summary: None,
            classification_reasoning: None,
            is_complaint: false,
            needs_careful_response: false,
            suggested_approach: None,
            suggested_actions: serde_json::json!([]),
            draft_reply: None,
            processed_at: None,
            created_at: Utc::now(),
        }
    }

    fn state() -> MessageState {
        MessageState::new(
            Uuid::new_v4(),
            Platform::Slack,
            "1714.100",
            "C1",
            SenderProfile {
                id: "U1".into(),
                name: "Kai".into(),
                ..Default::default()
            },
            "ship it",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_upsert_inserts_when_absent() {
        let state = state();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // lookup by natural key finds nothing
            .append_query_results::<message::Model, _, _>([vec![]])
            // insert returns the stored row
            .append_query_results([vec![stored_model(&state)]])
            .into_connection();

        let repo = MessageRepository::new(&db);
        let model = repo.upsert_state(&state).await.unwrap();
        assert_eq!(model.platform_message_id, state.platform_message_id);

        let log = db.into_transaction_log();
        let sql = format!("{:?}", log[1]);
        assert!(sql.contains("INSERT"), "expected INSERT, got {sql}");
    }

    #[tokio::test]
    async fn test_upsert_updates_when_present() {
        let state = state();
        let existing = stored_model(&state);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![existing.clone()]])
            .append_query_results([vec![existing]])
            .into_connection();

        let repo = MessageRepository::new(&db);
        repo.upsert_state(&state).await.unwrap();

        let log = db.into_transaction_log();
        let sql = format!("{:?}", log[1]);
        assert!(sql.contains("UPDATE"), "expected UPDATE, got {sql}");
        // User state is never part of the enrichment overwrite
        assert!(!sql.contains("is_read"));
        assert!(!sql.contains("is_done"));
    }

    #[tokio::test]
    async fn test_update_state_missing_message_is_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results::<message::Model, _, _>([vec![]])
            .into_connection();

        let repo = MessageRepository::new(&db);
        let err = repo
            .update_state(
                Uuid::new_v4(),
                Uuid::new_v4(),
                &MessagePatch {
                    is_read: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }

    #[test]
    fn test_patch_emptiness() {
        assert!(MessagePatch::default().is_empty());
        assert!(!MessagePatch {
            is_done: Some(true),
            ..Default::default()
        }
        .is_empty());
    }
}
