//! # Pending Read Repository
//!
//! Buffer for read receipts whose conversation does not exist yet.

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, ModelTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::models::pending_read::{self, Entity as PendingRead, Model};

/// Repository for buffered read receipts
pub struct PendingReadRepository<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> PendingReadRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn find(
        &self,
        account_id: &str,
        participant_id: &str,
    ) -> Result<Option<Model>, DbErr> {
        PendingRead::find()
            .filter(pending_read::Column::AccountId.eq(account_id))
            .filter(pending_read::Column::ParticipantId.eq(participant_id))
            .one(self.conn)
            .await
    }

    /// Buffers a read, keeping the highest watermark per pair.
    ///
    /// Returns `true` if the buffered watermark advanced.
    pub async fn buffer(
        &self,
        account_id: &str,
        participant_id: &str,
        watermark: i64,
        mid: Option<String>,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();

        if self.find(account_id, participant_id).await?.is_none() {
            let active = pending_read::ActiveModel {
                id: Set(Uuid::new_v4()),
                account_id: Set(account_id.to_string()),
                participant_id: Set(participant_id.to_string()),
                watermark: Set(watermark),
                last_read_mid: Set(mid.clone()),
                created_at: Set(now),
                updated_at: Set(now),
            };

            let rows = PendingRead::insert(active)
                .on_conflict(
                    OnConflict::columns([
                        pending_read::Column::AccountId,
                        pending_read::Column::ParticipantId,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(self.conn)
                .await?;

            if rows > 0 {
                return Ok(true);
            }
        }

        // Lost an insert race or the row already existed.
        let Some(existing) = self.find(account_id, participant_id).await? else {
            return Err(DbErr::RecordNotFound(format!(
                "pending read {}/{}",
                account_id, participant_id
            )));
        };

        if watermark <= existing.watermark {
            return Ok(false);
        }

        let mut active: pending_read::ActiveModel = existing.into();
        active.watermark = Set(watermark);
        active.last_read_mid = Set(mid);
        active.updated_at = Set(now);
        active.update(self.conn).await?;

        Ok(true)
    }

    /// Removes and returns the buffered read for the pair, if any.
    pub async fn take(
        &self,
        account_id: &str,
        participant_id: &str,
    ) -> Result<Option<Model>, DbErr> {
        let Some(pending) = self.find(account_id, participant_id).await? else {
            return Ok(None);
        };

        pending.clone().delete(self.conn).await?;
        Ok(Some(pending))
    }
}
