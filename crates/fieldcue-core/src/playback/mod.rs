mod clips;
mod driver;
mod output;
mod resolver;
#[cfg(feature = "rodio")]
mod rodio_output;
mod session;
mod state_loop;

pub use clips::{ClipStore, DirectoryClipStore};
pub use driver::PlaybackDriver;
pub use output::{AudioOutput, ClipSource, PlaybackHandle, SimulatedOutput};
pub use resolver::ClipResolver;
#[cfg(feature = "rodio")]
pub use rodio_output::RodioOutput;
pub use session::{AudioSession, SessionLease};
pub use state_loop::{
    run_state_loop, spawn_state_loop, LoopExit, LoopReport, PlaybackLoopHandle, StateCompletion,
    StateLoopSpec,
};
