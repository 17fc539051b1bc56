//! Timing records produced by a journey.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::StateName;
use super::debrief::DebriefLog;

/// Time spent in one state, finalized when the state is exited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLog {
    pub state_name: StateName,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// `end_time - start_time` in milliseconds.
    pub duration_ms: i64,
}

impl StateLog {
    pub fn new(state_name: StateName, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            state_name,
            start_time,
            end_time,
            duration_ms: (end_time - start_time).num_milliseconds(),
        }
    }
}

/// How a journey stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    /// Advanced past the last state.
    Completed,
    /// Stopped by a long press.
    Aborted,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Completed => "completed",
            EndReason::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(EndReason::Completed),
            "aborted" => Some(EndReason::Aborted),
            _ => None,
        }
    }
}

/// A finished journey as handed to the recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journey {
    pub id: Uuid,
    pub scene_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub end_reason: EndReason,
    pub state_logs: Vec<StateLog>,
    #[serde(default)]
    pub debrief_log: Option<DebriefLog>,
}

impl Journey {
    /// Sum of the per-state durations.
    pub fn logged_ms(&self) -> i64 {
        self.state_logs.iter().map(|l| l.duration_ms).sum()
    }
}

/// One row of a journey listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneySummary {
    pub id: Uuid,
    pub scene_name: String,
    pub start_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub end_reason: EndReason,
    pub state_count: usize,
    pub has_debrief: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn state_log_duration_is_exact_difference() {
        let start = Utc::now();
        let end = start + Duration::milliseconds(2_345);
        let log = StateLog::new("Active".into(), start, end);
        assert_eq!(log.duration_ms, 2_345);
    }

    #[test]
    fn end_reason_round_trips_through_str() {
        for reason in [EndReason::Completed, EndReason::Aborted] {
            assert_eq!(EndReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(EndReason::parse("crashed"), None);
    }
}
