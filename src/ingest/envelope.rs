//! Webhook payload shapes and event classification.
//!
//! The envelope is parsed leniently: entries and events stay as raw JSON until
//! each is decoded on its own, so one malformed item cannot poison the batch.
//! A decoded event is a [`MessagingEvent`] whose [`EventKind`] holds exactly one
//! of message, read or reaction.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::IngestError;

/// Envelope `object` values this service consumes.
pub const SUPPORTED_OBJECTS: &[&str] = &["instagram", "page"];

/// Top-level webhook payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<JsonValue>,
}

impl WebhookEnvelope {
    /// Parses the raw request body.
    pub fn from_slice(raw_body: &[u8]) -> Result<Self, IngestError> {
        serde_json::from_slice(raw_body).map_err(|e| IngestError::MalformedEnvelope {
            reason: format!("body is not a webhook envelope: {}", e),
        })
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_OBJECTS.contains(&self.object.as_str())
    }
}

/// Provider ids are strings, but some senders emit them as numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ProviderId {
    Text(String),
    Number(u64),
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        match id {
            ProviderId::Text(text) => text,
            ProviderId::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    id: Option<ProviderId>,
    time: Option<i64>,
    messaging: Option<Vec<JsonValue>>,
}

/// One entry per connected account.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: String,
    pub time: Option<i64>,
    pub messaging: Vec<JsonValue>,
}

impl Entry {
    /// Decodes an entry; a missing `id` or `messaging` array rejects it.
    pub fn from_value(value: JsonValue) -> Result<Self, IngestError> {
        let raw: RawEntry =
            serde_json::from_value(value).map_err(|e| IngestError::MalformedEnvelope {
                reason: format!("entry is not an object of the expected shape: {}", e),
            })?;

        let id: String = raw
            .id
            .map(String::from)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| IngestError::MalformedEnvelope {
                reason: "entry is missing 'id'".to_string(),
            })?;

        let messaging = raw.messaging.ok_or_else(|| IngestError::MalformedEnvelope {
            reason: format!("entry {} is missing 'messaging'", id),
        })?;

        Ok(Self {
            id,
            time: raw.time,
            messaging,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Party {
    id: ProviderId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplyTo {
    pub mid: Option<String>,
}

/// `message` sub-field.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    pub mid: String,
    pub text: Option<String>,
    pub attachments: Option<JsonValue>,
    #[serde(default)]
    pub is_echo: bool,
    pub reply_to: Option<ReplyTo>,
}

/// `read` sub-field.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadPayload {
    pub mid: Option<String>,
    pub watermark: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    React,
    Unreact,
}

impl ReactionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ReactionAction::React => "react",
            ReactionAction::Unreact => "unreact",
        }
    }
}

/// `reaction` sub-field.
#[derive(Debug, Clone, Deserialize)]
pub struct ReactionPayload {
    pub mid: String,
    pub action: ReactionAction,
    pub reaction: Option<String>,
    pub emoji: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessagingEvent {
    sender: Option<Party>,
    recipient: Option<Party>,
    timestamp: Option<i64>,
    message: Option<MessagePayload>,
    read: Option<ReadPayload>,
    reaction: Option<ReactionPayload>,
}

/// The single populated sub-field of an event.
#[derive(Debug, Clone)]
pub enum EventKind {
    Message(MessagePayload),
    Read(ReadPayload),
    Reaction(ReactionPayload),
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message(_) => "message",
            EventKind::Read(_) => "read",
            EventKind::Reaction(_) => "reaction",
        }
    }
}

/// A classified messaging event.
#[derive(Debug, Clone)]
pub struct MessagingEvent {
    pub sender_id: String,
    pub recipient_id: String,
    /// Provider timestamp (epoch ms)
    pub timestamp: i64,
    pub kind: EventKind,
}

impl MessagingEvent {
    /// The customer side of the event relative to the connected account.
    pub fn participant_id(&self, account_id: &str) -> &str {
        if self.sender_id == account_id {
            &self.recipient_id
        } else {
            &self.sender_id
        }
    }

    /// Provider message id the event refers to, if any.
    pub fn mid(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Message(message) => Some(&message.mid),
            EventKind::Read(read) => read.mid.as_deref(),
            EventKind::Reaction(reaction) => Some(&reaction.mid),
        }
    }
}

/// Result of inspecting an event's sub-fields.
#[derive(Debug, Clone)]
pub enum Classification {
    Classified(MessagingEvent),
    /// Zero or several of `message`, `read`, `reaction` were present.
    Unknown { present: Vec<&'static str> },
}

/// Decodes and classifies a raw messaging event.
///
/// Errors are reserved for events that cannot be decoded at all (missing
/// sender, recipient or timestamp, or a sub-field of the wrong shape).
pub fn classify(value: JsonValue) -> Result<Classification, IngestError> {
    let raw: RawMessagingEvent =
        serde_json::from_value(value).map_err(|e| IngestError::MalformedEvent {
            reason: e.to_string(),
        })?;

    let mut present = Vec::new();
    if raw.message.is_some() {
        present.push("message");
    }
    if raw.read.is_some() {
        present.push("read");
    }
    if raw.reaction.is_some() {
        present.push("reaction");
    }

    let kind = match (raw.message, raw.read, raw.reaction) {
        (Some(message), None, None) => EventKind::Message(message),
        (None, Some(read), None) => EventKind::Read(read),
        (None, None, Some(reaction)) => EventKind::Reaction(reaction),
        _ => return Ok(Classification::Unknown { present }),
    };

    let missing = |field: &str| IngestError::MalformedEvent {
        reason: format!("event is missing '{}'", field),
    };
    let sender_id: String = raw.sender.ok_or_else(|| missing("sender"))?.id.into();
    let recipient_id: String = raw.recipient.ok_or_else(|| missing("recipient"))?.id.into();
    let timestamp = raw.timestamp.ok_or_else(|| missing("timestamp"))?;

    Ok(Classification::Classified(MessagingEvent {
        sender_id,
        recipient_id,
        timestamp,
        kind,
    }))
}
