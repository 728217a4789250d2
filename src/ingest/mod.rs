//! # Webhook Ingestion
//!
//! Turns a verified webhook body into inbox state. Entries and events are
//! handled independently: a malformed entry or a failing event is recorded in
//! the [`BatchSummary`] and the rest of the batch continues. Only loss of the
//! database itself aborts the delivery, so the provider retries it.
//!
//! Every write is idempotent. Messages and reactions are deduplicated by unique
//! indexes, conversation read state only moves forward, and the unread count is
//! recomputed from stored messages, so redelivery and reordering converge on the
//! same state.

pub mod envelope;
pub mod outcome;

use metrics::counter;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, TransactionTrait};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::error::is_storage_unavailable;
use crate::models::conversation;
use crate::repositories::conversation::{ConversationUpdate, LastMessage, ReadState};
use crate::repositories::message::{DIRECTION_INBOUND, DIRECTION_OUTBOUND, NewMessage};
use crate::repositories::reaction::NewReaction;
use crate::repositories::{
    ConversationRepository, MessageRepository, PendingReadRepository, ReactionRepository,
};

pub use envelope::{
    Classification, Entry, EventKind, MessagePayload, MessagingEvent, ReactionPayload,
    ReadPayload, WebhookEnvelope, classify,
};
pub use outcome::{BatchSummary, EventOutcome, EventReport};

/// Errors raised while ingesting a webhook delivery.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },
    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },
    #[error("storage unavailable: {0}")]
    StorageUnavailable(DbErr),
    #[error("storage error: {0}")]
    Storage(DbErr),
}

impl From<DbErr> for IngestError {
    fn from(error: DbErr) -> Self {
        if is_storage_unavailable(&error) {
            IngestError::StorageUnavailable(error)
        } else {
            IngestError::Storage(error)
        }
    }
}

/// Processes webhook envelopes against the inbox tables.
#[derive(Debug, Clone)]
pub struct IngestionPipeline {
    db: DatabaseConnection,
}

impl IngestionPipeline {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Parses and processes a raw (already verified) request body.
    pub async fn ingest_bytes(&self, raw_body: &[u8]) -> Result<BatchSummary, IngestError> {
        let envelope = WebhookEnvelope::from_slice(raw_body)?;
        self.ingest(envelope).await
    }

    /// Processes every entry of the envelope in array order.
    ///
    /// Returns `Err` only for [`IngestError::StorageUnavailable`]; everything
    /// else is reported per entry or per event in the summary.
    #[instrument(skip_all, fields(object = %envelope.object, entries = envelope.entry.len()))]
    pub async fn ingest(&self, envelope: WebhookEnvelope) -> Result<BatchSummary, IngestError> {
        let mut summary = BatchSummary::default();

        if !envelope.is_supported() {
            info!("Ignoring webhook for unsupported object");
            return Ok(summary);
        }

        for raw_entry in envelope.entry {
            let entry = match Entry::from_value(raw_entry) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Rejecting webhook entry");
                    counter!("webhook_entries_rejected_total").increment(1);
                    summary.rejected_entries += 1;
                    continue;
                }
            };

            self.process_entry(entry, &mut summary).await?;
        }

        info!(
            persisted = summary.persisted,
            deduplicated = summary.deduplicated,
            buffered = summary.buffered,
            unknown = summary.unknown,
            failed = summary.failed,
            rejected_entries = summary.rejected_entries,
            "Processed webhook batch"
        );

        Ok(summary)
    }

    async fn process_entry(
        &self,
        entry: Entry,
        summary: &mut BatchSummary,
    ) -> Result<(), IngestError> {
        for (index, raw_event) in entry.messaging.into_iter().enumerate() {
            let mut report = EventReport {
                entry_id: entry.id.clone(),
                index,
                kind: None,
                mid: None,
                outcome: EventOutcome::Unknown,
            };

            let result = self.process_event(&entry.id, raw_event, &mut report).await;
            report.outcome = match result {
                Ok(outcome) => outcome,
                Err(IngestError::StorageUnavailable(e)) => {
                    counter!("webhook_events_total", "outcome" => "storage_unavailable")
                        .increment(1);
                    return Err(IngestError::StorageUnavailable(e));
                }
                Err(e) => {
                    warn!(
                        account_id = %entry.id,
                        index,
                        mid = report.mid.as_deref().unwrap_or(""),
                        error = %e,
                        "Webhook event failed"
                    );
                    EventOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            counter!("webhook_events_total", "outcome" => report.outcome.label()).increment(1);
            summary.record(report);
        }

        Ok(())
    }

    async fn process_event(
        &self,
        account_id: &str,
        raw_event: JsonValue,
        report: &mut EventReport,
    ) -> Result<EventOutcome, IngestError> {
        let event = match classify(raw_event)? {
            Classification::Classified(event) => event,
            Classification::Unknown { present } => {
                debug!(account_id, ?present, "Skipping unrecognized messaging event");
                return Ok(EventOutcome::Unknown);
            }
        };

        report.kind = Some(event.kind.as_str());
        report.mid = event.mid().map(str::to_string);

        match &event.kind {
            EventKind::Message(message) => self.handle_message(account_id, &event, message).await,
            EventKind::Read(read) => self.handle_read(account_id, &event, read).await,
            EventKind::Reaction(reaction) => {
                self.handle_reaction(account_id, &event, reaction).await
            }
        }
    }

    /// Stores a message and refreshes its conversation.
    async fn handle_message(
        &self,
        account_id: &str,
        event: &MessagingEvent,
        message: &MessagePayload,
    ) -> Result<EventOutcome, IngestError> {
        let participant_id = event.participant_id(account_id);
        let outbound = message.is_echo || event.sender_id == account_id;

        let txn = self.db.begin().await?;

        let (conversation, created) = ConversationRepository::new(&txn)
            .get_or_create(account_id, participant_id)
            .await?;

        let inserted = MessageRepository::new(&txn)
            .insert_if_absent(NewMessage {
                conversation_id: conversation.id,
                account_id: account_id.to_string(),
                mid: message.mid.clone(),
                sender_id: event.sender_id.clone(),
                recipient_id: event.recipient_id.clone(),
                direction: if outbound {
                    DIRECTION_OUTBOUND
                } else {
                    DIRECTION_INBOUND
                },
                text: message.text.clone(),
                attachments: message.attachments.clone(),
                reply_to_mid: message.reply_to.as_ref().and_then(|r| r.mid.clone()),
                sent_at: event.timestamp,
            })
            .await?;

        if !inserted {
            txn.rollback().await?;
            debug!(account_id, mid = %message.mid, "Duplicate message");
            return Ok(EventOutcome::Deduplicated);
        }

        let read = PendingReadRepository::new(&txn)
            .take(account_id, participant_id)
            .await?
            .map(|pending| {
                info!(
                    account_id,
                    participant_id,
                    watermark = pending.watermark,
                    "Applying buffered read receipt"
                );
                ReadState {
                    watermark: pending.watermark,
                    mid: pending.last_read_mid,
                }
            });

        let update = ConversationUpdate {
            last_message: Some(LastMessage {
                mid: message.mid.clone(),
                text: message.text.clone(),
                sent_at: event.timestamp,
            }),
            read,
        };
        refresh_conversation(&txn, conversation, update).await?;

        txn.commit().await?;

        if created {
            // A read buffered after our take but before our commit is still pending.
            self.reconcile_pending_read(account_id, participant_id).await?;
        }

        debug!(account_id, participant_id, mid = %message.mid, created, outbound, "Stored message");
        Ok(EventOutcome::Persisted)
    }

    /// Advances a conversation's read watermark, or buffers it if the
    /// conversation has no messages yet.
    async fn handle_read(
        &self,
        account_id: &str,
        event: &MessagingEvent,
        read: &ReadPayload,
    ) -> Result<EventOutcome, IngestError> {
        let participant_id = event.participant_id(account_id);
        let watermark = read.watermark.unwrap_or(event.timestamp);

        let txn = self.db.begin().await?;

        let existing = ConversationRepository::new(&txn)
            .find_by_key(account_id, participant_id)
            .await?;

        let Some(conversation) = existing else {
            let advanced = PendingReadRepository::new(&txn)
                .buffer(account_id, participant_id, watermark, read.mid.clone())
                .await?;
            txn.commit().await?;

            // The conversation may have been created while the buffer was uncommitted.
            if self
                .reconcile_pending_read(account_id, participant_id)
                .await?
            {
                return Ok(EventOutcome::Persisted);
            }

            warn!(
                account_id,
                participant_id,
                watermark,
                "Read receipt for unknown conversation, buffering"
            );
            return Ok(if advanced {
                EventOutcome::Buffered
            } else {
                EventOutcome::Deduplicated
            });
        };

        if conversation.read_watermark.is_some_and(|w| watermark <= w) {
            txn.rollback().await?;
            return Ok(EventOutcome::Deduplicated);
        }

        let update = ConversationUpdate {
            last_message: None,
            read: Some(ReadState {
                watermark,
                mid: read.mid.clone(),
            }),
        };
        refresh_conversation(&txn, conversation, update).await?;

        txn.commit().await?;
        Ok(EventOutcome::Persisted)
    }

    /// Folds a buffered read into its conversation once both exist.
    ///
    /// Returns `true` when a pending read was applied. The conversation row is
    /// locked for the duration, so concurrent callers apply it at most once.
    pub async fn reconcile_pending_read(
        &self,
        account_id: &str,
        participant_id: &str,
    ) -> Result<bool, IngestError> {
        let txn = self.db.begin().await?;

        let Some(conversation) = ConversationRepository::new(&txn)
            .find_by_key_for_update(account_id, participant_id)
            .await?
        else {
            txn.rollback().await?;
            return Ok(false);
        };

        let Some(pending) = PendingReadRepository::new(&txn)
            .take(account_id, participant_id)
            .await?
        else {
            txn.rollback().await?;
            return Ok(false);
        };

        info!(
            account_id,
            participant_id,
            watermark = pending.watermark,
            "Applying buffered read receipt"
        );
        let update = ConversationUpdate {
            last_message: None,
            read: Some(ReadState {
                watermark: pending.watermark,
                mid: pending.last_read_mid,
            }),
        };
        refresh_conversation(&txn, conversation, update).await?;

        txn.commit().await?;
        Ok(true)
    }

    async fn handle_reaction(
        &self,
        account_id: &str,
        event: &MessagingEvent,
        reaction: &ReactionPayload,
    ) -> Result<EventOutcome, IngestError> {
        let inserted = ReactionRepository::new(&self.db)
            .insert_if_absent(NewReaction {
                account_id: account_id.to_string(),
                mid: reaction.mid.clone(),
                sender_id: event.sender_id.clone(),
                action: reaction.action.as_str(),
                reaction: reaction.reaction.clone(),
                emoji: reaction.emoji.clone(),
                reacted_at: event.timestamp,
            })
            .await?;

        Ok(if inserted {
            EventOutcome::Persisted
        } else {
            EventOutcome::Deduplicated
        })
    }
}

/// Applies `update` and recounts unread inbound messages against the resulting watermark.
async fn refresh_conversation<C: ConnectionTrait>(
    conn: &C,
    conversation: conversation::Model,
    update: ConversationUpdate,
) -> Result<conversation::Model, DbErr> {
    let watermark = match (&update.read, conversation.read_watermark) {
        (Some(read), Some(current)) => Some(read.watermark.max(current)),
        (Some(read), None) => Some(read.watermark),
        (None, current) => current,
    };

    let unread = MessageRepository::new(conn)
        .count_unread(conversation.id, watermark)
        .await?;
    let unread = i32::try_from(unread).unwrap_or(i32::MAX);

    ConversationRepository::new(conn)
        .apply(conversation, update, unread)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::init_pool;
    use crate::migrator::MigrationRunner;
    use crate::models::{Message, MessageReaction};
    use sea_orm::{EntityTrait, PaginatorTrait};
    use serde_json::json;
    use std::path::PathBuf;

    async fn setup() -> (DatabaseConnection, IngestionPipeline) {
        let config = AppConfig {
            profile: "test".to_string(),
            database_url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        let db = init_pool(&config).await.expect("Failed to init test DB");

        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
        MigrationRunner::new(db.clone(), dir)
            .run()
            .await
            .expect("Failed to apply migrations");

        (db.clone(), IngestionPipeline::new(db))
    }

    fn envelope(events: JsonValue) -> WebhookEnvelope {
        serde_json::from_value(json!({
            "object": "instagram",
            "entry": [{"id": "A", "time": 1000, "messaging": events}]
        }))
        .unwrap()
    }

    fn inbound(mid: &str, timestamp: i64) -> JsonValue {
        json!({
            "sender": {"id": "S"},
            "recipient": {"id": "A"},
            "timestamp": timestamp,
            "message": {"mid": mid, "text": format!("text {}", mid)}
        })
    }

    fn read(watermark: i64) -> JsonValue {
        json!({
            "sender": {"id": "S"},
            "recipient": {"id": "A"},
            "timestamp": watermark,
            "read": {"watermark": watermark}
        })
    }

    async fn conversation(db: &DatabaseConnection) -> conversation::Model {
        ConversationRepository::new(db)
            .find_by_key("A", "S")
            .await
            .unwrap()
            .expect("conversation should exist")
    }

    #[tokio::test]
    async fn test_message_creates_conversation_and_counts_unread() {
        let (db, pipeline) = setup().await;

        let summary = pipeline
            .ingest(envelope(json!([inbound("M1", 100), inbound("M2", 200)])))
            .await
            .unwrap();

        assert_eq!(summary.persisted, 2);
        let conv = conversation(&db).await;
        assert_eq!(conv.unread_count, 2);
        assert_eq!(conv.last_message_mid.as_deref(), Some("M2"));
        assert_eq!(conv.last_message_at, Some(200));

        let mids: Vec<String> = MessageRepository::new(&db)
            .list_for_conversation(conv.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.mid)
            .collect();
        assert_eq!(mids, vec!["M1", "M2"]);
    }

    #[tokio::test]
    async fn test_each_participant_gets_one_conversation() {
        let (db, pipeline) = setup().await;
        let other = json!({
            "sender": {"id": "T"},
            "recipient": {"id": "A"},
            "timestamp": 300,
            "message": {"mid": "M3", "text": "hello"}
        });

        pipeline
            .ingest(envelope(json!([inbound("M1", 100), other, inbound("M2", 200)])))
            .await
            .unwrap();

        let conversations = ConversationRepository::new(&db)
            .list_for_account("A")
            .await
            .unwrap();
        let participants: Vec<&str> = conversations
            .iter()
            .map(|c| c.participant_id.as_str())
            .collect();
        assert_eq!(participants, vec!["T", "S"]);
        assert!(conversations.iter().all(|c| c.unread_count >= 1));
    }

    #[tokio::test]
    async fn test_redelivery_is_deduplicated() {
        let (db, pipeline) = setup().await;
        let events = json!([inbound("M1", 100)]);

        pipeline.ingest(envelope(events.clone())).await.unwrap();
        let second = pipeline.ingest(envelope(events)).await.unwrap();

        assert_eq!(second.deduplicated, 1);
        assert_eq!(second.persisted, 0);
        assert_eq!(Message::find().count(&db).await.unwrap(), 1);
        assert_eq!(conversation(&db).await.unread_count, 1);
    }

    #[tokio::test]
    async fn test_read_lowers_unread_and_stale_read_is_deduplicated() {
        let (db, pipeline) = setup().await;
        pipeline
            .ingest(envelope(json!([inbound("M1", 100), inbound("M2", 200)])))
            .await
            .unwrap();

        let summary = pipeline.ingest(envelope(json!([read(150)]))).await.unwrap();
        assert_eq!(summary.persisted, 1);
        assert_eq!(conversation(&db).await.unread_count, 1);

        let stale = pipeline.ingest(envelope(json!([read(120)]))).await.unwrap();
        assert_eq!(stale.deduplicated, 1);
        let conv = conversation(&db).await;
        assert_eq!(conv.read_watermark, Some(150));
        assert_eq!(conv.unread_count, 1);
    }

    #[tokio::test]
    async fn test_read_before_message_is_buffered_then_applied() {
        let (db, pipeline) = setup().await;

        let first = pipeline.ingest(envelope(json!([read(500)]))).await.unwrap();
        assert_eq!(first.buffered, 1);
        assert!(
            ConversationRepository::new(&db)
                .find_by_key("A", "S")
                .await
                .unwrap()
                .is_none()
        );

        pipeline
            .ingest(envelope(json!([inbound("M1", 400)])))
            .await
            .unwrap();

        let conv = conversation(&db).await;
        assert_eq!(conv.read_watermark, Some(500));
        assert_eq!(conv.unread_count, 0);
        assert!(
            PendingReadRepository::new(&db)
                .find("A", "S")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_read_buffered_after_conversation_commit_is_reconciled() {
        let (db, pipeline) = setup().await;
        pipeline
            .ingest(envelope(json!([inbound("M1", 100), inbound("M2", 200)])))
            .await
            .unwrap();

        // A read that saw no conversation and committed its buffer afterwards.
        PendingReadRepository::new(&db)
            .buffer("A", "S", 150, Some("M1".to_string()))
            .await
            .unwrap();
        assert_eq!(conversation(&db).await.read_watermark, None);

        assert!(pipeline.reconcile_pending_read("A", "S").await.unwrap());

        let conv = conversation(&db).await;
        assert_eq!(conv.read_watermark, Some(150));
        assert_eq!(conv.last_read_mid.as_deref(), Some("M1"));
        assert_eq!(conv.unread_count, 1);
        assert!(
            PendingReadRepository::new(&db)
                .find("A", "S")
                .await
                .unwrap()
                .is_none()
        );

        assert!(!pipeline.reconcile_pending_read("A", "S").await.unwrap());
        assert_eq!(conversation(&db).await.read_watermark, Some(150));
    }

    #[tokio::test]
    async fn test_reconcile_without_conversation_keeps_buffer() {
        let (db, pipeline) = setup().await;
        pipeline.ingest(envelope(json!([read(500)]))).await.unwrap();

        assert!(!pipeline.reconcile_pending_read("A", "S").await.unwrap());

        let pending = PendingReadRepository::new(&db)
            .find("A", "S")
            .await
            .unwrap()
            .expect("read should stay buffered");
        assert_eq!(pending.watermark, 500);
    }

    #[tokio::test]
    async fn test_echo_is_outbound_and_not_unread() {
        let (db, pipeline) = setup().await;
        let echo = json!({
            "sender": {"id": "A"},
            "recipient": {"id": "S"},
            "timestamp": 300,
            "message": {"mid": "M9", "text": "thanks!", "is_echo": true}
        });

        pipeline.ingest(envelope(json!([echo]))).await.unwrap();

        let conv = conversation(&db).await;
        assert_eq!(conv.unread_count, 0);
        let stored = MessageRepository::new(&db)
            .find_by_mid("A", "M9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.direction, DIRECTION_OUTBOUND);
        assert_eq!(stored.conversation_id, conv.id);
    }

    #[tokio::test]
    async fn test_reactions_are_deduplicated() {
        let (db, pipeline) = setup().await;
        let reaction = json!({
            "sender": {"id": "S"},
            "recipient": {"id": "A"},
            "timestamp": 700,
            "reaction": {"mid": "M1", "action": "react", "reaction": "love", "emoji": "\u{2764}"}
        });

        let summary = pipeline
            .ingest(envelope(json!([reaction.clone(), reaction])))
            .await
            .unwrap();

        assert_eq!(summary.persisted, 1);
        assert_eq!(summary.deduplicated, 1);
        assert_eq!(MessageReaction::find().count(&db).await.unwrap(), 1);

        let stored = ReactionRepository::new(&db)
            .list_for_message("A", "M1")
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender_id, "S");
        assert_eq!(stored[0].reaction, "love");
        assert_eq!(stored[0].reacted_at, 700);
    }

    #[tokio::test]
    async fn test_bad_events_do_not_abort_siblings() {
        let (db, pipeline) = setup().await;
        let events = json!([
            {"sender": {"id": "S"}, "recipient": {"id": "A"}, "timestamp": 1, "postback": {}},
            {"recipient": {"id": "A"}, "timestamp": 2, "message": {"mid": "MX"}},
            inbound("M1", 100)
        ]);

        let summary = pipeline.ingest(envelope(events)).await.unwrap();

        assert_eq!(summary.unknown, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.persisted, 1);
        assert_eq!(summary.total_events(), 3);
        assert_eq!(Message::find().count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_rejected_alone() {
        let (_db, pipeline) = setup().await;
        let envelope: WebhookEnvelope = serde_json::from_value(json!({
            "object": "instagram",
            "entry": [
                {"time": 1, "messaging": [inbound("M0", 1)]},
                {"id": "A", "time": 1000, "messaging": [inbound("M1", 100)]}
            ]
        }))
        .unwrap();

        let summary = pipeline.ingest(envelope).await.unwrap();

        assert_eq!(summary.rejected_entries, 1);
        assert_eq!(summary.persisted, 1);
    }

    #[tokio::test]
    async fn test_unsupported_object_is_ignored() {
        let (_db, pipeline) = setup().await;
        let summary = pipeline
            .ingest_bytes(br#"{"object":"whatsapp_business_account","entry":[{"id":"A","messaging":[]}]}"#)
            .await
            .unwrap();

        assert_eq!(summary.total_events(), 0);
        assert_eq!(summary.rejected_entries, 0);
    }

    #[tokio::test]
    async fn test_closed_pool_is_storage_unavailable() {
        let (db, pipeline) = setup().await;
        db.close().await.unwrap();

        let result = pipeline.ingest(envelope(json!([inbound("M1", 100)]))).await;

        assert!(matches!(result, Err(IngestError::StorageUnavailable(_))));
    }

    #[test]
    fn test_dropped_connection_maps_to_storage_unavailable() {
        use sea_orm::{RuntimeErr, sqlx};

        let dropped = DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Io(
            std::io::Error::from(std::io::ErrorKind::BrokenPipe),
        )));
        assert!(matches!(
            IngestError::from(dropped),
            IngestError::StorageUnavailable(_)
        ));

        let constraint = DbErr::Custom("check constraint failed".to_string());
        assert!(matches!(
            IngestError::from(constraint),
            IngestError::Storage(_)
        ));
    }
}
