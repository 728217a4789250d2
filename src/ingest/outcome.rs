//! Per-event outcomes and the batch summary returned for one webhook delivery.

use serde::Serialize;

/// What happened to a single messaging event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    /// Stored, or changed inbox state.
    Persisted,
    /// Already applied earlier; no state changed.
    Deduplicated,
    /// A read for a conversation that does not exist yet, held until it does.
    Buffered,
    /// Not a message, read or reaction (or more than one of them).
    Unknown,
    /// Rejected on its own; the rest of the batch continued.
    Failed { reason: String },
}

impl EventOutcome {
    /// Label used for the `webhook_events_total` metric.
    pub fn label(&self) -> &'static str {
        match self {
            EventOutcome::Persisted => "persisted",
            EventOutcome::Deduplicated => "deduplicated",
            EventOutcome::Buffered => "buffered",
            EventOutcome::Unknown => "unknown",
            EventOutcome::Failed { .. } => "failed",
        }
    }
}

/// One line of the summary.
#[derive(Debug, Clone, Serialize)]
pub struct EventReport {
    pub entry_id: String,
    /// Position in the entry's `messaging` array
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(flatten)]
    pub outcome: EventOutcome,
}

/// Tally of a processed envelope.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub persisted: usize,
    pub deduplicated: usize,
    pub buffered: usize,
    pub unknown: usize,
    pub failed: usize,
    /// Entries dropped before their events were read
    pub rejected_entries: usize,
    pub events: Vec<EventReport>,
}

impl BatchSummary {
    pub fn record(&mut self, report: EventReport) {
        match report.outcome {
            EventOutcome::Persisted => self.persisted += 1,
            EventOutcome::Deduplicated => self.deduplicated += 1,
            EventOutcome::Buffered => self.buffered += 1,
            EventOutcome::Unknown => self.unknown += 1,
            EventOutcome::Failed { .. } => self.failed += 1,
        }
        self.events.push(report);
    }

    pub fn total_events(&self) -> usize {
        self.events.len()
    }
}
