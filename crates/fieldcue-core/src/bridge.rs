//! Peripheral button events to journey commands.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::journey::{JourneyCommand, JourneyHandle};

/// Gestures the peripheral reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeripheralSignal {
    SinglePress,
    DoublePress,
    LongPress,
}

impl PeripheralSignal {
    pub fn command(self) -> JourneyCommand {
        match self {
            PeripheralSignal::SinglePress => JourneyCommand::Advance { steps: 1 },
            PeripheralSignal::DoublePress => JourneyCommand::Advance { steps: 2 },
            PeripheralSignal::LongPress => JourneyCommand::Abort,
        }
    }
}

impl FromStr for PeripheralSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single_press" | "single" | "s" => Ok(PeripheralSignal::SinglePress),
            "double_press" | "double" | "d" => Ok(PeripheralSignal::DoublePress),
            "long_press" | "long" | "l" => Ok(PeripheralSignal::LongPress),
            other => Err(format!("unknown peripheral event '{other}'")),
        }
    }
}

/// Event as delivered by the peripheral integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_name: String,
    pub timestamp: DateTime<Utc>,
}

impl RawEvent {
    pub fn now(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Forwards peripheral events to a running journey.
///
/// Events stamped before the bridge started listening are stale, e.g.
/// presses buffered by the peripheral while no journey was running.
pub struct EventBridge {
    handle: JourneyHandle,
    listening_since: DateTime<Utc>,
}

impl EventBridge {
    pub fn new(handle: JourneyHandle) -> Self {
        Self::with_listening_since(handle, Utc::now())
    }

    pub fn with_listening_since(handle: JourneyHandle, listening_since: DateTime<Utc>) -> Self {
        Self {
            handle,
            listening_since,
        }
    }

    pub fn listening_since(&self) -> DateTime<Utc> {
        self.listening_since
    }

    /// Map an event to a command, or `None` if it is stale or unknown.
    pub fn translate(&self, event: &RawEvent) -> Option<JourneyCommand> {
        if event.timestamp < self.listening_since {
            debug!(
                event = %event.event_name,
                timestamp = %event.timestamp,
                "dropping event from before the bridge started"
            );
            return None;
        }
        match event.event_name.parse::<PeripheralSignal>() {
            Ok(signal) => Some(signal.command()),
            Err(e) => {
                debug!(error = %e, "ignoring event");
                None
            }
        }
    }

    /// Translate and forward one event. Returns whether a command was sent.
    pub fn dispatch(&self, event: &RawEvent) -> bool {
        match self.translate(event) {
            Some(command) => self.handle.send(command),
            None => false,
        }
    }

    /// Forward events until the source closes or the journey ends.
    pub async fn pump(self, mut events: mpsc::Receiver<RawEvent>) {
        while let Some(event) = events.recv().await {
            if self.handle.is_closed() {
                break;
            }
            self.dispatch(&event);
        }
        debug!("event bridge stopped");
    }
}
