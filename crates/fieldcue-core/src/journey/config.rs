//! Immutable per-journey configuration snapshot.
//!
//! A `JourneyConfig` is built once when a journey starts (usually from a
//! scene in [`crate::storage::Config`]) and never observed again for edits.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub type StateName = String;
pub type ClipId = String;
pub type DebriefId = String;

/// Order in which clips of a state are picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// The order the clips were assigned in.
    #[default]
    SequentialSelected,
    /// Case-insensitive by clip name.
    Alphabetical,
    /// Uniform draw with replacement.
    Random,
}

/// How many clips a state plays before it completes on its own.
///
/// Serialized as a positive integer or the string `"unbounded"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RepetitionsRepr", into = "RepetitionsRepr")]
pub enum Repetitions {
    Count(u32),
    Unbounded,
}

impl Repetitions {
    /// True once `played` clips satisfy the cap.
    pub fn is_reached(&self, played: u32) -> bool {
        match self {
            Repetitions::Count(cap) => played >= *cap,
            Repetitions::Unbounded => false,
        }
    }
}

impl Default for Repetitions {
    fn default() -> Self {
        Repetitions::Count(1)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RepetitionsRepr {
    Count(u32),
    Keyword(String),
}

impl TryFrom<RepetitionsRepr> for Repetitions {
    type Error = String;

    fn try_from(repr: RepetitionsRepr) -> Result<Self, Self::Error> {
        match repr {
            RepetitionsRepr::Count(0) => Err("repetitions must be at least 1".into()),
            RepetitionsRepr::Count(n) => Ok(Repetitions::Count(n)),
            RepetitionsRepr::Keyword(k) if k.trim().eq_ignore_ascii_case("unbounded") => {
                Ok(Repetitions::Unbounded)
            }
            // Quoted counts, as written by the dot-path setter or by hand.
            RepetitionsRepr::Keyword(k) => match k.trim().parse::<u32>() {
                Ok(n) => Repetitions::try_from(RepetitionsRepr::Count(n)),
                Err(_) => Err(format!("unknown repetitions value '{k}'")),
            },
        }
    }
}

impl From<Repetitions> for RepetitionsRepr {
    fn from(r: Repetitions) -> Self {
        match r {
            Repetitions::Count(n) => RepetitionsRepr::Count(n),
            Repetitions::Unbounded => RepetitionsRepr::Keyword("unbounded".into()),
        }
    }
}

/// Clips and playback policy for one state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioAssignment {
    #[serde(default)]
    pub clips: Vec<ClipId>,
    #[serde(default)]
    pub mode: PlaybackMode,
    #[serde(default)]
    pub repetitions: Repetitions,
}

/// Everything the state machine needs to run one journey.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JourneyConfig {
    pub scene_name: String,
    /// Traversal order. Names are unique.
    pub states: Vec<StateName>,
    #[serde(default)]
    pub interval_ms: HashMap<StateName, u64>,
    #[serde(default)]
    pub audio_assignment: HashMap<StateName, AudioAssignment>,
    #[serde(default)]
    pub debrief_assignment: HashMap<StateName, DebriefId>,
}

impl JourneyConfig {
    pub fn new(scene_name: impl Into<String>, states: Vec<StateName>) -> Self {
        Self {
            scene_name: scene_name.into(),
            states,
            ..Self::default()
        }
    }

    pub fn with_interval(mut self, state: &str, interval_ms: u64) -> Self {
        self.interval_ms.insert(state.to_string(), interval_ms);
        self
    }

    pub fn with_audio(mut self, state: &str, assignment: AudioAssignment) -> Self {
        self.audio_assignment.insert(state.to_string(), assignment);
        self
    }

    pub fn with_debrief(mut self, state: &str, debrief: impl Into<DebriefId>) -> Self {
        self.debrief_assignment
            .insert(state.to_string(), debrief.into());
        self
    }

    /// Reject configurations the state machine cannot run.
    ///
    /// # Errors
    /// Returns the first problem found: an empty state list, a duplicate
    /// name, a zero repetition count, or a per-state setting for a state
    /// that is not part of the sequence.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.states.is_empty() {
            return Err(ValidationError::EmptyCollection("states".into()));
        }

        let mut seen = HashSet::new();
        for state in &self.states {
            if state.trim().is_empty() {
                return Err(ValidationError::InvalidValue {
                    field: "states".into(),
                    message: "state names must not be blank".into(),
                });
            }
            if !seen.insert(state.as_str()) {
                return Err(ValidationError::DuplicateState(state.clone()));
            }
        }

        let check_known = |setting: &str, state: &String| {
            if seen.contains(state.as_str()) {
                Ok(())
            } else {
                Err(ValidationError::UnknownState {
                    setting: setting.into(),
                    state: state.clone(),
                })
            }
        };
        for state in self.interval_ms.keys() {
            check_known("interval_ms", state)?;
        }
        for (state, assignment) in &self.audio_assignment {
            check_known("audio_assignment", state)?;
            if assignment.repetitions == Repetitions::Count(0) {
                return Err(ValidationError::InvalidValue {
                    field: format!("audio_assignment.{state}.repetitions"),
                    message: "must be at least 1".into(),
                });
            }
        }
        for state in self.debrief_assignment.keys() {
            check_known("debrief_assignment", state)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Delay between repetitions; zero when unset.
    pub fn interval_for(&self, state: &str) -> Duration {
        Duration::from_millis(self.interval_ms.get(state).copied().unwrap_or(0))
    }

    /// Audio policy for a state; an empty assignment when unset.
    pub fn assignment_for(&self, state: &str) -> AudioAssignment {
        self.audio_assignment.get(state).cloned().unwrap_or_default()
    }

    /// Debrief covering the state at `index`.
    ///
    /// Scans backward from `index` to 0; the first state with a debrief
    /// wins, so an early assignment covers later states that have none.
    pub fn debrief_for(&self, index: usize) -> Option<&DebriefId> {
        if self.states.is_empty() {
            return None;
        }
        let start = index.min(self.states.len() - 1);
        self.states[..=start]
            .iter()
            .rev()
            .find_map(|state| {
                self.debrief_assignment
                    .get(state)
                    .filter(|id| !id.trim().is_empty())
            })
    }
}
