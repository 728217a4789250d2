//! Message reaction entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Append-only record of a react/unreact event on a message.
///
/// Unique on `(account_id, mid, sender_id, action, reaction, reacted_at)` so a
/// redelivered event is stored once. A missing reaction name is stored as `""`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "message_reactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub account_id: String,

    /// Message the reaction targets
    pub mid: String,

    pub sender_id: String,

    /// `react` or `unreact`
    pub action: String,

    pub reaction: String,

    pub emoji: Option<String>,

    /// Provider timestamp (epoch ms)
    pub reacted_at: i64,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
