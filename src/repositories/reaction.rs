//! # Reaction Repository

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set};
use uuid::Uuid;

use crate::models::message_reaction::{self, Entity as MessageReaction, Model};

#[derive(Debug, Clone)]
pub struct NewReaction {
    pub account_id: String,
    pub mid: String,
    pub sender_id: String,
    pub action: &'static str,
    pub reaction: Option<String>,
    pub emoji: Option<String>,
    pub reacted_at: i64,
}

/// Repository for the append-only reaction log
pub struct ReactionRepository<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> ReactionRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Appends the reaction event; returns `false` if the identical event is already stored.
    pub async fn insert_if_absent(&self, new_reaction: NewReaction) -> Result<bool, DbErr> {
        let active = message_reaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            account_id: Set(new_reaction.account_id),
            mid: Set(new_reaction.mid),
            sender_id: Set(new_reaction.sender_id),
            action: Set(new_reaction.action.to_string()),
            reaction: Set(new_reaction.reaction.unwrap_or_default()),
            emoji: Set(new_reaction.emoji),
            reacted_at: Set(new_reaction.reacted_at),
            created_at: Set(Utc::now().fixed_offset()),
        };

        let rows = MessageReaction::insert(active)
            .on_conflict(
                OnConflict::columns([
                    message_reaction::Column::AccountId,
                    message_reaction::Column::Mid,
                    message_reaction::Column::SenderId,
                    message_reaction::Column::Action,
                    message_reaction::Column::Reaction,
                    message_reaction::Column::ReactedAt,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(self.conn)
            .await?;

        Ok(rows > 0)
    }

    pub async fn list_for_message(&self, account_id: &str, mid: &str) -> Result<Vec<Model>, DbErr> {
        MessageReaction::find()
            .filter(message_reaction::Column::AccountId.eq(account_id))
            .filter(message_reaction::Column::Mid.eq(mid))
            .order_by_asc(message_reaction::Column::ReactedAt)
            .all(self.conn)
            .await
    }
}
