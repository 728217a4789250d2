//! Message entity model
//!
//! Messages are unique per `(account_id, mid)`; that constraint is what makes
//! redelivered webhook events collapse into a single row.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub conversation_id: Uuid,

    pub account_id: String,

    /// Provider-assigned message id
    pub mid: String,

    pub sender_id: String,

    pub recipient_id: String,

    /// `inbound` (customer to account) or `outbound` (echo of an account message)
    pub direction: String,

    pub text: Option<String>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub attachments: Option<JsonValue>,

    pub reply_to_mid: Option<String>,

    /// Provider timestamp (epoch ms)
    pub sent_at: i64,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::conversation::Entity",
        from = "Column::ConversationId",
        to = "super::conversation::Column::Id"
    )]
    Conversation,
}

impl Related<super::conversation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Conversation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
