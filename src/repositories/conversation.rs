//! # Conversation Repository
//!
//! Get-or-create and inbox-state updates for conversations. All methods run on
//! any [`ConnectionTrait`], so the ingestion pipeline can call them inside a
//! per-event transaction.

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::models::conversation::{self, Entity as Conversation, Model};

/// Newest-message and read-state changes applied to a conversation row.
#[derive(Debug, Clone, Default)]
pub struct ConversationUpdate {
    pub last_message: Option<LastMessage>,
    pub read: Option<ReadState>,
}

#[derive(Debug, Clone)]
pub struct LastMessage {
    pub mid: String,
    pub text: Option<String>,
    pub sent_at: i64,
}

#[derive(Debug, Clone)]
pub struct ReadState {
    pub watermark: i64,
    pub mid: Option<String>,
}

/// Repository for conversation database operations
pub struct ConversationRepository<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> ConversationRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn find_by_key(
        &self,
        account_id: &str,
        participant_id: &str,
    ) -> Result<Option<Model>, DbErr> {
        Conversation::find()
            .filter(conversation::Column::AccountId.eq(account_id))
            .filter(conversation::Column::ParticipantId.eq(participant_id))
            .one(self.conn)
            .await
    }

    /// Like [`Self::find_by_key`], but holds a row lock until the transaction ends.
    pub async fn find_by_key_for_update(
        &self,
        account_id: &str,
        participant_id: &str,
    ) -> Result<Option<Model>, DbErr> {
        Conversation::find()
            .filter(conversation::Column::AccountId.eq(account_id))
            .filter(conversation::Column::ParticipantId.eq(participant_id))
            .lock_exclusive()
            .one(self.conn)
            .await
    }

    /// Returns the conversation for the pair, creating it if needed.
    ///
    /// The boolean is `true` when this call created the row. Concurrent creators
    /// race on the `(account_id, participant_id)` unique index; the loser's insert
    /// is a no-op and both read back the same row.
    pub async fn get_or_create(
        &self,
        account_id: &str,
        participant_id: &str,
    ) -> Result<(Model, bool), DbErr> {
        if let Some(existing) = self.find_by_key(account_id, participant_id).await? {
            return Ok((existing, false));
        }

        let now = Utc::now().fixed_offset();
        let new_conversation = conversation::ActiveModel {
            id: Set(Uuid::new_v4()),
            account_id: Set(account_id.to_string()),
            participant_id: Set(participant_id.to_string()),
            unread_count: Set(0),
            last_message_mid: Set(None),
            last_message_text: Set(None),
            last_message_at: Set(None),
            read_watermark: Set(None),
            last_read_mid: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let inserted = Conversation::insert(new_conversation)
            .on_conflict(
                OnConflict::columns([
                    conversation::Column::AccountId,
                    conversation::Column::ParticipantId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(self.conn)
            .await?;

        let model = self
            .find_by_key(account_id, participant_id)
            .await?
            .ok_or_else(|| {
                DbErr::RecordNotFound(format!(
                    "conversation {}/{} after insert",
                    account_id, participant_id
                ))
            })?;

        Ok((model, inserted > 0))
    }

    /// Applies the update and stores the recomputed unread count.
    ///
    /// The newest-message fields only move forward in provider time and the
    /// read watermark never decreases, so replays and reordering converge.
    pub async fn apply(
        &self,
        current: Model,
        update: ConversationUpdate,
        unread_count: i32,
    ) -> Result<Model, DbErr> {
        let mut active: conversation::ActiveModel = current.clone().into();

        if let Some(last) = update.last_message
            && current.last_message_at.is_none_or(|at| last.sent_at >= at)
        {
            active.last_message_mid = Set(Some(last.mid));
            active.last_message_text = Set(last.text);
            active.last_message_at = Set(Some(last.sent_at));
        }

        if let Some(read) = update.read
            && current.read_watermark.is_none_or(|w| read.watermark > w)
        {
            active.read_watermark = Set(Some(read.watermark));
            active.last_read_mid = Set(read.mid);
        }

        active.unread_count = Set(unread_count);
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(self.conn).await
    }

    /// Conversations of an account, most recently active first.
    pub async fn list_for_account(&self, account_id: &str) -> Result<Vec<Model>, DbErr> {
        Conversation::find()
            .filter(conversation::Column::AccountId.eq(account_id))
            .order_by_desc(conversation::Column::LastMessageAt)
            .order_by_desc(conversation::Column::Id)
            .all(self.conn)
            .await
    }
}
