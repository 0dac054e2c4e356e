//! Message entity
//!
//! Normalized messages from all platforms, enriched by the agents.
//! `(user_id, platform, platform_message_id)` is unique; the feed index
//! is `(user_id, priority_score DESC, timestamp DESC)`.

use prism_core::message::{
    Enrichment, MessageState, Platform, PriorityLabel, RelationshipType, SenderProfile, Sentiment,
};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,
    pub platform: String,
    pub platform_message_id: String,
    pub thread_id: Option<String>,

    // Sender snapshot
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub sender_email: Option<String>,

    // Content
    pub content_text: Option<String>,
    pub timestamp: DateTimeUtc,

    // User actions
    pub is_read: bool,
    pub is_done: bool,
    pub snoozed_until: Option<DateTimeUtc>,

    // AI enrichment
    pub priority_score: f64,
    pub priority_label: String,
    pub sentiment: String,
    pub ai_context_note: Option<String>,
    pub summary: Option<String>,
    pub classification_reasoning: Option<String>,
    pub is_complaint: bool,
    pub needs_careful_response: bool,
    pub suggested_approach: Option<String>,
    pub suggested_actions: Json,

    // Draft
    pub draft_reply: Option<String>,

    // Timestamps
    pub processed_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Convert a stored row back to the pipeline's message state.
    pub fn to_state(&self) -> MessageState {
        let suggested_actions = self
            .suggested_actions
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        MessageState {
            id: self.id,
            user_id: self.user_id,
            platform: Platform::from_str(&self.platform).unwrap_or(Platform::Gmail),
            platform_message_id: self.platform_message_id.clone(),
            thread_id: self.thread_id.clone().unwrap_or_default(),
            sender: SenderProfile {
                id: self.sender_id.clone(),
                name: self.sender_name.clone().unwrap_or_default(),
                email: self.sender_email.clone(),
                username: None,
                relationship: RelationshipType::Stranger,
                is_vip: false,
                reply_rate: 0.0,
                context_summary: String::new(),
            },
            content_text: self.content_text.clone().unwrap_or_default(),
            timestamp: self.timestamp,
            is_read: self.is_read,
            is_done: self.is_done,
            snoozed_until: self.snoozed_until,
            enrichment: Enrichment {
                priority_score: self.priority_score,
                priority_label: PriorityLabel::from_str(&self.priority_label)
                    .unwrap_or(PriorityLabel::Fyi),
                sentiment: Sentiment::from_str(&self.sentiment).unwrap_or(Sentiment::Neutral),
                summary: self.summary.clone().unwrap_or_default(),
                context_note: self.ai_context_note.clone().unwrap_or_default(),
                suggested_actions,
                is_complaint: self.is_complaint,
                needs_careful_response: self.needs_careful_response,
                suggested_approach: self.suggested_approach.clone().unwrap_or_default(),
                time_sensitive: false,
                classification_reasoning: self.classification_reasoning.clone().unwrap_or_default(),
            },
            draft_reply: self.draft_reply.clone(),
            created_at: Some(self.created_at),
        }
    }
}
