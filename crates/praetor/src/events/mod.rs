//! Structured events extracted from console output.
//!
//! Events are published on a [`tokio::sync::broadcast`] channel. The
//! [`EventJournal`] keeps a bounded history so late callers can poll.

pub mod activity;
pub mod chat;
pub mod extractor;
pub mod journal;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

pub use activity::{ActivityDeduper, ActivityKind, parse_activity};
pub use chat::{ChatLine, SERVER_IDENTITY, is_mention, parse_chat};
pub use extractor::{EventExtractor, ExtractorConfig, SessionState};
pub use journal::EventJournal;

/// Broadcast channel capacity; slow subscribers see `Lagged` beyond this.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatEvent {
    pub at: DateTime<Utc>,
    pub player: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEvent {
    pub at: DateTime<Utc>,
    pub kind: ActivityKind,
    pub player: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    pub at: DateTime<Utc>,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Any recognized chat line.
    Chat(ChatEvent),
    /// A chat line that addresses the bot. Always preceded by the matching `Chat`.
    Mention(ChatEvent),
    Activity(ActivityEvent),
    Error(ErrorEvent),
}

/// Fan-out point for extracted events.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
    journal: EventJournal,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            journal: EventJournal::default(),
        }
    }

    /// Record in the journal and notify subscribers. Having no subscribers is fine.
    pub fn publish(&self, event: ServerEvent) {
        self.journal.record(&event);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    pub fn journal(&self) -> &EventJournal {
        &self.journal
    }
}
