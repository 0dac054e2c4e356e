//! Platform credential entity
//!
//! Stores OAuth/bot tokens for each connected platform. Token columns hold
//! AES-256-GCM sealed blobs — plaintext never reaches this table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "platform_credentials")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,
    pub platform: String,

    /// AES-256-GCM sealed
    pub access_token: String,
    /// AES-256-GCM sealed
    pub refresh_token: Option<String>,
    pub token_expiry: Option<DateTimeUtc>,

    /// Workspace / account id on the platform side. Unique within a
    /// platform — webhook events resolve to their owning user through it.
    pub platform_user_id: Option<String>,
    pub scopes: Option<String>,
    pub webhook_id: Option<String>,

    pub created_at: DateTimeUtc,
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
