//! Sync state repository
//!
//! Serializes sync runs per `(user_id, platform)`: a worker takes the
//! lease by flipping `status` to `syncing` under a row lock. A lease left
//! behind by a cancelled worker is reclaimed once it is older than the
//! lease window.

use crate::entities::sync_state::{self, STATUS_ERROR, STATUS_IDLE, STATUS_SYNCING};
use crate::error::Result;
use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect, Set,
    TransactionTrait,
};
use uuid::Uuid;

/// A `syncing` row older than this is considered abandoned.
pub const LEASE_SECONDS: i64 = 300;

const ERROR_MESSAGE_LIMIT: usize = 500;

pub struct SyncStateRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> SyncStateRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(&self, user_id: Uuid, platform: &str) -> Result<Option<sync_state::Model>> {
        Ok(sync_state::Entity::find()
            .filter(sync_state::Column::UserId.eq(user_id))
            .filter(sync_state::Column::Platform.eq(platform))
            .one(self.db)
            .await?)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<sync_state::Model>> {
        Ok(sync_state::Entity::find()
            .filter(sync_state::Column::UserId.eq(user_id))
            .all(self.db)
            .await?)
    }

    /// Take the sync lease for `(user_id, platform)`. Returns the row when
    /// the lease was acquired, None when another worker holds a fresh one.
    pub async fn acquire_lease(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> Result<Option<sync_state::Model>> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let existing = sync_state::Entity::find()
            .filter(sync_state::Column::UserId.eq(user_id))
            .filter(sync_state::Column::Platform.eq(platform))
            .lock_exclusive()
            .one(&txn)
            .await?;

        let model = match existing {
            Some(row) => {
                let lease_fresh = now.signed_duration_since(row.updated_at)
                    < Duration::seconds(LEASE_SECONDS);
                if row.status == STATUS_SYNCING && lease_fresh {
                    txn.commit().await?;
                    return Ok(None);
                }
                let mut active: sync_state::ActiveModel = row.into();
                active.status = Set(STATUS_SYNCING.to_string());
                active.updated_at = Set(now);
                active.update(&txn).await?
            }
            None => {
                let active = sync_state::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    platform: Set(platform.to_string()),
                    last_sync_at: Set(None),
                    last_history_id: Set(None),
                    status: Set(STATUS_SYNCING.to_string()),
                    error_message: Set(None),
                    updated_at: Set(now),
                };
                active.insert(&txn).await?
            }
        };

        txn.commit().await?;
        Ok(Some(model))
    }

    /// Release the lease after a successful sync.
    pub async fn mark_idle(
        &self,
        model: sync_state::Model,
        history_id: Option<String>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut active: sync_state::ActiveModel = model.into();
        active.last_sync_at = Set(Some(now));
        active.status = Set(STATUS_IDLE.to_string());
        active.error_message = Set(None);
        if history_id.is_some() {
            active.last_history_id = Set(history_id);
        }
        active.updated_at = Set(now);
        active.update(self.db).await?;
        Ok(())
    }

    /// Release the lease after a failed sync, capturing the error.
    pub async fn mark_error(&self, model: sync_state::Model, error: &str) -> Result<()> {
        let truncated: String = error.chars().take(ERROR_MESSAGE_LIMIT).collect();
        let mut active: sync_state::ActiveModel = model.into();
        active.status = Set(STATUS_ERROR.to_string());
        active.error_message = Set(Some(truncated));
        active.updated_at = Set(Utc::now());
        active.update(self.db).await?;
        Ok(())
    }

    /// Remove sync state on platform disconnect.
    pub async fn delete(&self, user_id: Uuid, platform: &str) -> Result<()> {
        sync_state::Entity::delete_many()
            .filter(sync_state::Column::UserId.eq(user_id))
            .filter(sync_state::Column::Platform.eq(platform))
            .exec(self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn row(status: &str, age_seconds: i64) -> sync_state::Model {
        sync_state::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            platform: "gmail".to_string(),
            last_sync_at: None,
            last_history_id: None,
            status: status.to_string(),
            error_message: None,
            updated_at: Utc::now() - Duration::seconds(age_seconds),
        }
    }

    #[tokio::test]
    async fn test_fresh_syncing_lease_is_not_reacquired() {
        let held = row(STATUS_SYNCING, 10);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![held.clone()]])
            .into_connection();

        let repo = SyncStateRepository::new(&db);
        let lease = repo.acquire_lease(held.user_id, "gmail").await.unwrap();
        assert!(lease.is_none());
    }

    #[tokio::test]
    async fn test_stale_syncing_lease_is_reclaimed() {
        let stale = row(STATUS_SYNCING, LEASE_SECONDS + 60);
        let mut reclaimed = stale.clone();
        reclaimed.updated_at = Utc::now();

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![stale.clone()]])
            .append_query_results([vec![reclaimed]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        let repo = SyncStateRepository::new(&db);
        let lease = repo.acquire_lease(stale.user_id, "gmail").await.unwrap();
        assert!(lease.is_some());
        assert_eq!(lease.unwrap().status, STATUS_SYNCING);
    }

    #[test]
    fn test_error_message_truncation_length() {
        let error = "x".repeat(2000);
        let truncated: String = error.chars().take(ERROR_MESSAGE_LIMIT).collect();
        assert_eq!(truncated.len(), 500);
    }
}
