//! Conversation entity model
//!
//! One row per `(account_id, participant_id)` pair: the thread between a
//! connected Instagram account and a customer.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "conversations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Connected business account (the webhook entry id)
    pub account_id: String,

    /// The customer on the other side of the thread
    pub participant_id: String,

    /// Inbound messages newer than the read watermark
    pub unread_count: i32,

    pub last_message_mid: Option<String>,

    pub last_message_text: Option<String>,

    /// Provider timestamp (epoch ms) of the newest message
    pub last_message_at: Option<i64>,

    /// Highest read watermark seen (epoch ms)
    pub read_watermark: Option<i64>,

    pub last_read_mid: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::message::Entity")]
    Messages,
}

impl Related<super::message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Messages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
