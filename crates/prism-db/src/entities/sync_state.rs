//! Sync state entity
//!
//! One row per `(user_id, platform)`. `status = syncing` acts as a lease —
//! at most one worker holds it at a time; stale leases are reclaimed after
//! a timeout.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const STATUS_IDLE: &str = "idle";
pub const STATUS_SYNCING: &str = "syncing";
pub const STATUS_ERROR: &str = "error";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_states")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,
    pub platform: String,

    pub last_sync_at: Option<DateTimeUtc>,
    /// Opaque incremental-sync cursor (Gmail history id)
    pub last_history_id: Option<String>,
    pub status: String,
    pub error_message: Option<String>,

    pub updated_at: DateTimeUtc,
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
