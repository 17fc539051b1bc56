//! # Fieldcue Core Library
//!
//! Core logic for fieldcue, a field-training aid that walks a trainee
//! through an ordered sequence of states and plays recorded audio cues
//! while each state is active. All operations are available through the
//! standalone CLI binary, which is a thin host over this library.
//!
//! ## Architecture
//!
//! - **Journey**: a pure state machine ([`JourneyMachine`]) driven by an async
//!   actor ([`JourneyRunner`]) that owns the current state's playback loop
//! - **Playback**: clip resolution, a serialized audio session, and a
//!   cancellable per-state loop
//! - **Bridge**: maps peripheral button gestures to journey commands
//! - **Storage**: SQLite journey records and TOML-based configuration
//!
//! ## Key Components
//!
//! - [`JourneyRunner`]: runs one journey and returns a [`HostRoute`]
//! - [`ClipResolver`]: picks the next clip for a state
//! - [`SqliteJourneyStore`]: journey persistence
//! - [`Config`]: scenes, debrief forms and playback defaults

pub mod bridge;
pub mod error;
pub mod events;
pub mod journey;
pub mod playback;
pub mod storage;

pub use bridge::{EventBridge, PeripheralSignal, RawEvent};
pub use error::{
    ConfigError, CoreError, DatabaseError, PlaybackError, RecorderError, ResolveError,
    ValidationError,
};
pub use events::{CompletionCause, EventSink, JourneyEvent};
pub use journey::{
    DebriefForm, DebriefLog, DebriefRoute, EndReason, HostRoute, Journey, JourneyCommand,
    JourneyConfig, JourneyHandle, JourneyMachine, JourneyRunner, JourneyServices, PlaybackMode,
    Repetitions, StateLog,
};
pub use playback::{
    AudioOutput, AudioSession, ClipResolver, ClipStore, DirectoryClipStore, SimulatedOutput,
};
#[cfg(feature = "rodio")]
pub use playback::RodioOutput;
pub use storage::{Config, JourneyRecorder, SceneConfig, SqliteJourneyStore};
