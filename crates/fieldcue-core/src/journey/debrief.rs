//! Debrief questionnaires filled in after a journey ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::config::DebriefId;
use super::machine::Termination;
use super::record::{Journey, StateLog};
use crate::error::{RecorderError, ValidationError};
use crate::storage::JourneyRecorder;

/// Answer format of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    #[default]
    Text,
    /// Integer between the question's `min` and `max`, inclusive.
    Scale,
    YesNo,
}

const DEFAULT_SCALE: (i32, i32) = (1, 5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebriefQuestion {
    pub id: String,
    pub prompt: String,
    #[serde(default)]
    pub kind: QuestionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i32>,
}

impl DebriefQuestion {
    /// Validate a raw answer and return its stored form.
    pub fn normalize(&self, raw: &str) -> Result<String, String> {
        let raw = raw.trim();
        match self.kind {
            QuestionKind::Text => Ok(raw.to_string()),
            QuestionKind::Scale => {
                let min = self.min.unwrap_or(DEFAULT_SCALE.0);
                let max = self.max.unwrap_or(DEFAULT_SCALE.1);
                let n: i32 = raw
                    .parse()
                    .map_err(|_| format!("'{raw}' is not a number"))?;
                if n < min || n > max {
                    return Err(format!("{n} is outside {min}..={max}"));
                }
                Ok(n.to_string())
            }
            QuestionKind::YesNo => match raw.to_ascii_lowercase().as_str() {
                "y" | "yes" | "true" => Ok("yes".into()),
                "n" | "no" | "false" => Ok("no".into()),
                _ => Err(format!("'{raw}' is not yes or no")),
            },
        }
    }
}

/// A questionnaire that can be attached to one or more states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebriefForm {
    pub id: DebriefId,
    pub title: String,
    #[serde(default)]
    pub questions: Vec<DebriefQuestion>,
}

impl DebriefForm {
    /// Pair raw answers with the form's questions.
    ///
    /// # Errors
    /// Fails when the answer count differs from the question count or an
    /// answer does not fit its question kind.
    pub fn answer(&self, raw: &[String]) -> Result<DebriefLog, ValidationError> {
        if raw.len() != self.questions.len() {
            return Err(ValidationError::InvalidValue {
                field: format!("debrief.{}", self.id),
                message: format!(
                    "expected {} answers, got {}",
                    self.questions.len(),
                    raw.len()
                ),
            });
        }
        let answers = self
            .questions
            .iter()
            .zip(raw)
            .map(|(q, a)| {
                q.normalize(a)
                    .map(|answer| DebriefAnswer {
                        question_id: q.id.clone(),
                        prompt: q.prompt.clone(),
                        answer,
                    })
                    .map_err(|message| ValidationError::InvalidValue {
                        field: format!("debrief.{}.{}", self.id, q.id),
                        message,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DebriefLog {
            debrief_id: self.id.clone(),
            answers,
            completed_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebriefAnswer {
    pub question_id: String,
    pub prompt: String,
    pub answer: String,
}

/// Responses attached to a persisted journey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebriefLog {
    pub debrief_id: DebriefId,
    pub answers: Vec<DebriefAnswer>,
    pub completed_at: DateTime<Utc>,
}

/// Host route to the debrief screen.
///
/// Carries the finished journey until the user submits or dismisses the
/// form. Both consume the route, so the journey is recorded once. A route
/// dropped without either logs a warning.
#[derive(Debug)]
#[must_use = "the journey is only recorded by `submit` or `dismiss`"]
pub struct DebriefRoute {
    debrief_id: DebriefId,
    termination: Termination,
    pending: PendingRecord,
}

/// Warns on drop while the journey is still unrecorded.
#[derive(Debug)]
struct PendingRecord {
    journey_id: Uuid,
    armed: bool,
}

impl Drop for PendingRecord {
    fn drop(&mut self) {
        if self.armed {
            warn!(journey_id = %self.journey_id, "debrief route dropped, journey not recorded");
        }
    }
}

impl DebriefRoute {
    pub(crate) fn new(debrief_id: DebriefId, termination: Termination) -> Self {
        Self {
            pending: PendingRecord {
                journey_id: termination.journey_id,
                armed: true,
            },
            debrief_id,
            termination,
        }
    }

    pub fn debrief_id(&self) -> &DebriefId {
        &self.debrief_id
    }

    pub fn journey_id(&self) -> Uuid {
        self.termination.journey_id
    }

    pub fn journey_start(&self) -> DateTime<Utc> {
        self.termination.start_time
    }

    pub fn state_logs(&self) -> &[StateLog] {
        &self.termination.state_logs
    }

    /// Record the journey with the user's answers.
    pub fn submit(
        self,
        log: DebriefLog,
        recorder: &dyn JourneyRecorder,
    ) -> Result<Journey, RecorderError> {
        self.record(Some(log), recorder)
    }

    /// Record the journey without answers.
    pub fn dismiss(self, recorder: &dyn JourneyRecorder) -> Result<Journey, RecorderError> {
        self.record(None, recorder)
    }

    fn record(
        self,
        log: Option<DebriefLog>,
        recorder: &dyn JourneyRecorder,
    ) -> Result<Journey, RecorderError> {
        let DebriefRoute {
            termination,
            mut pending,
            ..
        } = self;
        pending.armed = false;
        let journey = termination.into_journey(log);
        match recorder.persist(&journey) {
            Ok(()) => Ok(journey),
            Err(e) => {
                warn!(journey_id = %journey.id, error = %e, "failed to record debriefed journey");
                Err(e)
            }
        }
    }
}
