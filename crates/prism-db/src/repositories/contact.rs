//! Contact repository

use crate::entities::contact;
use crate::error::Result;
use chrono::Utc;
use prism_core::message::MessageState;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

/// Repository for the per-user contact graph
pub struct ContactRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> ContactRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(
        &self,
        user_id: Uuid,
        platform: &str,
        contact_identifier: &str,
    ) -> Result<Option<contact::Model>> {
        Ok(contact::Entity::find()
            .filter(contact::Column::UserId.eq(user_id))
            .filter(contact::Column::Platform.eq(platform))
            .filter(contact::Column::ContactIdentifier.eq(contact_identifier))
            .one(self.db)
            .await?)
    }

    /// Upsert the sender of an ingested message: bump the message count,
    /// refresh the relationship snapshot, stamp the interaction time.
    pub async fn upsert_from_state(&self, state: &MessageState) -> Result<contact::Model> {
        let now = Utc::now();
        let existing = self
            .find(state.user_id, state.platform.as_str(), &state.sender.id)
            .await?;

        match existing {
            Some(model) => {
                let message_count = model.message_count;
                let mut active: contact::ActiveModel = model.into();
                active.display_name = Set(Some(state.sender.name.clone()));
                active.relationship = Set(state.sender.relationship.as_str().to_string());
                active.is_vip = Set(state.sender.is_vip);
                active.reply_rate = Set(state.sender.reply_rate);
                active.message_count = Set(message_count + 1);
                active.last_interaction = Set(Some(now));
                Ok(active.update(self.db).await?)
            }
            None => {
                let active = contact::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(state.user_id),
                    contact_identifier: Set(state.sender.id.clone()),
                    platform: Set(state.platform.as_str().to_string()),
                    display_name: Set(Some(state.sender.name.clone())),
                    relationship: Set(state.sender.relationship.as_str().to_string()),
                    is_vip: Set(state.sender.is_vip),
                    reply_rate: Set(state.sender.reply_rate),
                    message_count: Set(1),
                    last_interaction: Set(Some(now)),
                    created_at: Set(now),
                };
                Ok(active.insert(self.db).await?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::message::{Platform, RelationshipType, SenderProfile};
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_upsert_increments_message_count() {
        let user_id = Uuid::new_v4();
        let existing = contact::Model {
            id: Uuid::new_v4(),
            user_id,
            contact_identifier: "U1".to_string(),
            platform: "slack".to_string(),
            display_name: Some("Kai".to_string()),
            relationship: "work_contact".to_string(),
            is_vip: false,
            reply_rate: 0.4,
            message_count: 6,
            last_interaction: None,
            created_at: Utc::now(),
        };
        let mut updated = existing.clone();
        updated.message_count = 7;

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![existing]])
            .append_query_results([vec![updated]])
            .into_connection();

        let mut state = MessageState::new(
            user_id,
            Platform::Slack,
            "1714.1",
            "C1",
            SenderProfile {
                id: "U1".into(),
                name: "Kai".into(),
                relationship: RelationshipType::WorkContact,
                reply_rate: 0.4,
                ..Default::default()
            },
            "hello",
            Utc::now(),
        );
        state.sender.is_vip = false;

        let repo = ContactRepository::new(&db);
        let model = repo.upsert_from_state(&state).await.unwrap();
        assert_eq!(model.message_count, 7);
    }
}
