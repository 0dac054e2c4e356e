//! Platform credential repository
//!
//! Token values passed in and out of this repository are sealed blobs —
//! callers encrypt before storing and decrypt after fetching.

use crate::entities::platform_credential;
use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter, Set,
};
use uuid::Uuid;

/// Fields for connecting or refreshing a platform credential.
#[derive(Debug, Clone, Default)]
pub struct CredentialUpsert {
    /// Sealed access token
    pub access_token: String,
    /// Sealed refresh token
    pub refresh_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub platform_user_id: Option<String>,
    pub scopes: Option<String>,
    pub webhook_id: Option<String>,
}

pub struct CredentialRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> CredentialRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// All connected credentials across the fleet (sync sweep input).
    pub async fn list_all(&self) -> Result<Vec<platform_credential::Model>> {
        Ok(platform_credential::Entity::find().all(self.db).await?)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<platform_credential::Model>> {
        Ok(platform_credential::Entity::find()
            .filter(platform_credential::Column::UserId.eq(user_id))
            .all(self.db)
            .await?)
    }

    pub async fn find(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> Result<Option<platform_credential::Model>> {
        Ok(platform_credential::Entity::find()
            .filter(platform_credential::Column::UserId.eq(user_id))
            .filter(platform_credential::Column::Platform.eq(platform))
            .one(self.db)
            .await?)
    }

    /// Resolve an app-level webhook event (workspace id) to its owning
    /// credential. `platform_user_id` is unique within a platform.
    pub async fn find_by_platform_user(
        &self,
        platform: &str,
        platform_user_id: &str,
    ) -> Result<Option<platform_credential::Model>> {
        Ok(platform_credential::Entity::find()
            .filter(platform_credential::Column::Platform.eq(platform))
            .filter(platform_credential::Column::PlatformUserId.eq(platform_user_id))
            .one(self.db)
            .await?)
    }

    /// Connect a platform or rotate its tokens.
    pub async fn upsert(
        &self,
        user_id: Uuid,
        platform: &str,
        fields: CredentialUpsert,
    ) -> Result<platform_credential::Model> {
        let now = Utc::now();
        match self.find(user_id, platform).await? {
            Some(model) => {
                let mut active: platform_credential::ActiveModel = model.into();
                active.access_token = Set(fields.access_token);
                if fields.refresh_token.is_some() {
                    active.refresh_token = Set(fields.refresh_token);
                }
                active.token_expiry = Set(fields.token_expiry);
                if fields.platform_user_id.is_some() {
                    active.platform_user_id = Set(fields.platform_user_id);
                }
                if fields.scopes.is_some() {
                    active.scopes = Set(fields.scopes);
                }
                if fields.webhook_id.is_some() {
                    active.webhook_id = Set(fields.webhook_id);
                }
                active.updated_at = Set(now);
                Ok(active.update(self.db).await?)
            }
            None => {
                let active = platform_credential::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    platform: Set(platform.to_string()),
                    access_token: Set(fields.access_token),
                    refresh_token: Set(fields.refresh_token),
                    token_expiry: Set(fields.token_expiry),
                    platform_user_id: Set(fields.platform_user_id),
                    scopes: Set(fields.scopes),
                    webhook_id: Set(fields.webhook_id),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                Ok(active.insert(self.db).await?)
            }
        }
    }

    /// Disconnect a platform. Errors when nothing is connected.
    pub async fn delete(&self, user_id: Uuid, platform: &str) -> Result<()> {
        let model = self
            .find(user_id, platform)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("credential for {platform}")))?;
        model.delete(self.db).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_delete_missing_credential_is_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results::<platform_credential::Model, _, _>([vec![]])
            .into_connection();

        let repo = CredentialRepository::new(&db);
        let err = repo.delete(Uuid::new_v4(), "slack").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }
}
