//! # Message Repository

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::message::{self, Entity as Message, Model};

pub const DIRECTION_INBOUND: &str = "inbound";
pub const DIRECTION_OUTBOUND: &str = "outbound";

/// Fields of a message as received from the provider.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub account_id: String,
    pub mid: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub direction: &'static str,
    pub text: Option<String>,
    pub attachments: Option<JsonValue>,
    pub reply_to_mid: Option<String>,
    pub sent_at: i64,
}

/// Repository for message database operations
pub struct MessageRepository<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> MessageRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Inserts the message unless `(account_id, mid)` already exists.
    ///
    /// Returns `false` for a duplicate. The unique index decides, so two
    /// concurrent deliveries of the same mid store exactly one row.
    pub async fn insert_if_absent(&self, new_message: NewMessage) -> Result<bool, DbErr> {
        let active = message::ActiveModel {
            id: Set(Uuid::new_v4()),
            conversation_id: Set(new_message.conversation_id),
            account_id: Set(new_message.account_id),
            mid: Set(new_message.mid),
            sender_id: Set(new_message.sender_id),
            recipient_id: Set(new_message.recipient_id),
            direction: Set(new_message.direction.to_string()),
            text: Set(new_message.text),
            attachments: Set(new_message.attachments),
            reply_to_mid: Set(new_message.reply_to_mid),
            sent_at: Set(new_message.sent_at),
            created_at: Set(Utc::now().fixed_offset()),
        };

        let rows = Message::insert(active)
            .on_conflict(
                OnConflict::columns([message::Column::AccountId, message::Column::Mid])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.conn)
            .await?;

        Ok(rows > 0)
    }

    pub async fn find_by_mid(&self, account_id: &str, mid: &str) -> Result<Option<Model>, DbErr> {
        Message::find()
            .filter(message::Column::AccountId.eq(account_id))
            .filter(message::Column::Mid.eq(mid))
            .one(self.conn)
            .await
    }

    /// Counts inbound messages sent after the watermark (all of them when unset).
    pub async fn count_unread(
        &self,
        conversation_id: Uuid,
        watermark: Option<i64>,
    ) -> Result<u64, DbErr> {
        let mut query = Message::find()
            .filter(message::Column::ConversationId.eq(conversation_id))
            .filter(message::Column::Direction.eq(DIRECTION_INBOUND));

        if let Some(watermark) = watermark {
            query = query.filter(message::Column::SentAt.gt(watermark));
        }

        query.count(self.conn).await
    }

    /// Messages of a conversation in provider order.
    pub async fn list_for_conversation(&self, conversation_id: Uuid) -> Result<Vec<Model>, DbErr> {
        Message::find()
            .filter(message::Column::ConversationId.eq(conversation_id))
            .order_by_asc(message::Column::SentAt)
            .order_by_asc(message::Column::Mid)
            .all(self.conn)
            .await
    }
}
