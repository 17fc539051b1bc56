use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::journey::EndReason;

/// Why a state's playback loop finished on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionCause {
    RepetitionsReached,
    NoClipsAvailable,
    /// Every clip failed in a row.
    AllClipsUnplayable,
}

/// Every observable step of a journey produces an Event.
/// The host renders them; the CLI prints them as JSON lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JourneyEvent {
    JourneyStarted {
        journey_id: Uuid,
        scene_name: String,
        state_count: usize,
        at: DateTime<Utc>,
    },
    StateEntered {
        index: usize,
        state: String,
        at: DateTime<Utc>,
    },
    ClipStarted {
        state: String,
        clip: String,
        /// 1-based repetition this clip counts toward.
        repetition: u32,
        at: DateTime<Utc>,
    },
    ClipSkipped {
        state: String,
        clip: String,
        reason: String,
        at: DateTime<Utc>,
    },
    StateCompleted {
        state: String,
        repetitions: u32,
        cause: CompletionCause,
        at: DateTime<Utc>,
    },
    /// A command arrived while a transition was in flight and was dropped.
    CommandDebounced {
        command: String,
        at: DateTime<Utc>,
    },
    JourneyEnded {
        journey_id: Uuid,
        reason: EndReason,
        debrief_id: Option<String>,
        state_count: usize,
        at: DateTime<Utc>,
    },
}

/// Optional outlet for journey events. Sending never blocks or fails.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<JourneyEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<JourneyEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: JourneyEvent) {
        if let Some(tx) = &self.tx {
            // The host may have stopped listening; that is fine.
            let _ = tx.send(event);
        }
    }
}
