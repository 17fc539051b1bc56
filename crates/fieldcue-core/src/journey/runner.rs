//! Async driver for one journey.
//!
//! The runner owns the [`JourneyMachine`] and the playback loop of the
//! current state. Commands and loop completions are handled one at a time
//! on a single task, so a state change always finishes tearing down the
//! old loop before anything else is looked at.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::config::{JourneyConfig, StateName};
use super::debrief::DebriefRoute;
use super::machine::{JourneyMachine, Termination, Transition};
use super::record::Journey;
use crate::error::ValidationError;
use crate::events::{EventSink, JourneyEvent};
use crate::playback::{
    spawn_state_loop, AudioOutput, AudioSession, ClipStore, PlaybackLoopHandle, StateCompletion,
    StateLoopSpec,
};
use crate::storage::JourneyRecorder;

/// A request from the host or the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JourneyCommand {
    Advance { steps: usize },
    Abort,
}

impl fmt::Display for JourneyCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JourneyCommand::Advance { steps } => write!(f, "advance({steps})"),
            JourneyCommand::Abort => write!(f, "abort"),
        }
    }
}

/// Cloneable sender for journey commands.
#[derive(Debug, Clone)]
pub struct JourneyHandle {
    tx: mpsc::UnboundedSender<JourneyCommand>,
}

impl JourneyHandle {
    #[cfg(test)]
    pub(crate) fn from_sender(tx: mpsc::UnboundedSender<JourneyCommand>) -> Self {
        Self { tx }
    }

    /// Queue a command. Returns false once the journey has ended.
    pub fn send(&self, command: JourneyCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn advance(&self, steps: usize) -> bool {
        self.send(JourneyCommand::Advance { steps })
    }

    pub fn abort(&self) -> bool {
        self.send(JourneyCommand::Abort)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Where the host goes once the journey has ended.
#[derive(Debug)]
pub enum HostRoute {
    /// Show the debrief form; the journey is recorded on submit or dismiss.
    Debrief(DebriefRoute),
    /// Back to idle. The journey has already been handed to the recorder;
    /// `recorded` is false if that failed.
    Idle { journey: Journey, recorded: bool },
}

/// Collaborators a journey needs.
#[derive(Clone)]
pub struct JourneyServices {
    pub session: AudioSession,
    pub clips: Arc<dyn ClipStore>,
    pub recorder: Arc<dyn JourneyRecorder>,
    pub clock: Arc<dyn Clock>,
    pub events: EventSink,
    /// Seed for random playback; fresh entropy when `None`.
    pub seed: Option<u64>,
}

impl JourneyServices {
    pub fn new(
        output: Arc<dyn AudioOutput>,
        clips: Arc<dyn ClipStore>,
        recorder: Arc<dyn JourneyRecorder>,
    ) -> Self {
        Self {
            session: AudioSession::new(output),
            clips,
            recorder,
            clock: Arc::new(SystemClock),
            events: EventSink::disabled(),
            seed: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

pub struct JourneyRunner {
    machine: JourneyMachine,
    first: Option<Transition>,
    services: JourneyServices,
    commands: mpsc::UnboundedReceiver<JourneyCommand>,
    completions_tx: mpsc::UnboundedSender<StateCompletion>,
    completions_rx: mpsc::UnboundedReceiver<StateCompletion>,
    generation: u64,
    current: Option<PlaybackLoopHandle>,
}

impl JourneyRunner {
    /// Prepare a journey at its first state. Nothing plays until
    /// [`run`](Self::run) is awaited.
    ///
    /// # Errors
    /// Refuses a configuration that fails validation.
    pub fn new(
        config: JourneyConfig,
        services: JourneyServices,
    ) -> Result<(Self, JourneyHandle), ValidationError> {
        let (machine, first) = JourneyMachine::start(Arc::new(config), services.clock.clone())?;
        let (tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let runner = Self {
            machine,
            first: Some(first),
            services,
            commands,
            completions_tx,
            completions_rx,
            generation: 0,
            current: None,
        };
        Ok((runner, JourneyHandle { tx }))
    }

    pub fn journey_id(&self) -> Uuid {
        self.machine.journey_id()
    }

    /// Drive the journey until it terminates.
    ///
    /// Dropping every [`JourneyHandle`] counts as an abort.
    pub async fn run(mut self) -> HostRoute {
        let config = self.machine.config().clone();
        info!(
            journey_id = %self.machine.journey_id(),
            scene = %config.scene_name,
            states = config.len(),
            "journey started"
        );
        self.services.events.emit(JourneyEvent::JourneyStarted {
            journey_id: self.machine.journey_id(),
            scene_name: config.scene_name.clone(),
            state_count: config.len(),
            at: self.machine.start_time(),
        });

        let mut next = self.first.take();
        loop {
            match next.take() {
                Some(Transition::Enter { index, state }) => self.enter(index, state).await,
                Some(Transition::Terminate(termination)) => {
                    return self.terminate(termination).await;
                }
                None => {}
            }

            next = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => {
                        info!(journey_id = %self.machine.journey_id(), "command channel closed, aborting");
                        self.apply(JourneyCommand::Abort)
                    }
                },
                Some(done) = self.completions_rx.recv() => self.on_completion(done),
            };
        }
    }

    fn apply(&mut self, command: JourneyCommand) -> Option<Transition> {
        let transition = match command {
            JourneyCommand::Advance { steps } => self.machine.advance(steps),
            JourneyCommand::Abort => self.machine.abort(),
        };
        if transition.is_none() {
            debug!(%command, phase = ?self.machine.phase(), "command dropped");
            self.services.events.emit(JourneyEvent::CommandDebounced {
                command: command.to_string(),
                at: self.services.clock.now(),
            });
        }
        transition
    }

    fn on_completion(&mut self, done: StateCompletion) -> Option<Transition> {
        if done.generation != self.generation {
            debug!(
                generation = done.generation,
                current = self.generation,
                "ignoring completion from a replaced loop"
            );
            return None;
        }
        info!(
            state = %self.machine.current_state(),
            cause = ?done.cause,
            "state finished on its own"
        );
        self.machine.advance(1)
    }

    /// Commands that queued up while a transition was being applied.
    fn drain_queued(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            let _ = self.apply(command);
        }
    }

    async fn stop_current(&mut self) {
        if let Some(handle) = self.current.take() {
            let generation = handle.generation();
            if let Some(report) = handle.shutdown().await {
                debug!(
                    generation,
                    state = %report.state,
                    repetitions = report.repetitions,
                    exit = ?report.exit,
                    "playback loop stopped"
                );
            }
        }
    }

    async fn enter(&mut self, index: usize, state: StateName) {
        self.stop_current().await;
        self.drain_queued();

        let config = self.machine.config().clone();
        let assignment = config.assignment_for(&state);
        let clips = if assignment.clips.is_empty() {
            self.services.clips.clips_for(&state)
        } else {
            assignment.clips
        };

        self.generation += 1;
        let spec = StateLoopSpec {
            state: state.clone(),
            clips,
            mode: assignment.mode,
            repetitions: assignment.repetitions,
            interval: config.interval_for(&state),
            generation: self.generation,
            seed: self.services.seed.map(|s| s.wrapping_add(self.generation)),
        };
        info!(
            journey_id = %self.machine.journey_id(),
            index,
            state = %state,
            clips = spec.clips.len(),
            generation = self.generation,
            "entering state"
        );
        self.services.events.emit(JourneyEvent::StateEntered {
            index,
            state,
            at: self.services.clock.now(),
        });

        self.current = Some(spawn_state_loop(
            spec,
            self.services.session.clone(),
            self.services.clips.clone(),
            self.completions_tx.clone(),
            self.services.events.clone(),
            self.services.clock.clone(),
        ));
        self.machine.settle();
    }

    async fn terminate(mut self, termination: Termination) -> HostRoute {
        self.stop_current().await;
        self.drain_queued();
        self.machine.finish();

        info!(
            journey_id = %termination.journey_id,
            reason = termination.reason.as_str(),
            states = termination.state_logs.len(),
            debrief = termination.debrief_id.as_deref().unwrap_or("-"),
            "journey ended"
        );
        self.services.events.emit(JourneyEvent::JourneyEnded {
            journey_id: termination.journey_id,
            reason: termination.reason,
            debrief_id: termination.debrief_id.clone(),
            state_count: termination.state_logs.len(),
            at: termination.end_time,
        });

        match termination.debrief_id.clone() {
            Some(debrief_id) => HostRoute::Debrief(DebriefRoute::new(debrief_id, termination)),
            None => {
                let journey = termination.into_journey(None);
                let recorded = match self.services.recorder.persist(&journey) {
                    Ok(()) => true,
                    Err(e) => {
                        error!(journey_id = %journey.id, error = %e, "failed to record journey");
                        false
                    }
                };
                HostRoute::Idle { journey, recorded }
            }
        }
    }
}
