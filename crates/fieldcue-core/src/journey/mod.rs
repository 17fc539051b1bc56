//! Journeys: an ordered walk through a scene's states.

mod clock;
mod config;
mod debrief;
mod machine;
mod record;
mod runner;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AudioAssignment, ClipId, DebriefId, JourneyConfig, PlaybackMode, Repetitions, StateName,
};
pub use debrief::{
    DebriefAnswer, DebriefForm, DebriefLog, DebriefQuestion, DebriefRoute, QuestionKind,
};
pub use machine::{JourneyMachine, Phase, Termination, Transition};
pub use record::{EndReason, Journey, JourneySummary, StateLog};
pub use runner::{HostRoute, JourneyCommand, JourneyHandle, JourneyRunner, JourneyServices};
