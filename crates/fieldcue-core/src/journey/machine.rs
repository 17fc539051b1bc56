//! Journey state machine.
//!
//! Pure bookkeeping: which state is current, when it was entered, and the
//! append-only list of finalized state logs. It owns no tasks; the async
//! [`JourneyRunner`](super::JourneyRunner) drives it and performs the
//! teardown/startup work each [`Transition`] asks for.
//!
//! ## Phases
//!
//! ```text
//! Transitioning -> Running -> Transitioning -> Running -> ... -> Terminating -> Terminated
//! ```
//!
//! Every accepted command moves the machine out of `Running`. Until the
//! driver calls [`settle`](JourneyMachine::settle) (or
//! [`finish`](JourneyMachine::finish)) further commands are dropped; this
//! is the debounce for presses that arrive while a transition is in flight.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::clock::Clock;
use super::config::{DebriefId, JourneyConfig, StateName};
use super::debrief::DebriefLog;
use super::record::{EndReason, Journey, StateLog};
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Running,
    /// A state change was accepted and is being applied.
    Transitioning,
    /// The journey is ending; playback is being torn down.
    Terminating,
    Terminated,
}

/// Work the driver must perform after an accepted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Stop the current state's playback and start `state`.
    Enter { index: usize, state: StateName },
    /// Stop playback and route the host.
    Terminate(Termination),
}

/// Snapshot of a journey at the moment it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    pub journey_id: Uuid,
    pub scene_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reason: EndReason,
    /// Index of the last state that was running.
    pub last_index: usize,
    pub debrief_id: Option<DebriefId>,
    pub state_logs: Vec<StateLog>,
}

impl Termination {
    /// Build the persisted record, optionally carrying debrief answers.
    pub fn into_journey(self, debrief_log: Option<DebriefLog>) -> Journey {
        Journey {
            id: self.journey_id,
            scene_name: self.scene_name,
            start_time: self.start_time,
            end_time: self.end_time,
            duration_ms: (self.end_time - self.start_time).num_milliseconds(),
            end_reason: self.reason,
            state_logs: self.state_logs,
            debrief_log,
        }
    }
}

pub struct JourneyMachine {
    config: Arc<JourneyConfig>,
    clock: Arc<dyn Clock>,
    journey_id: Uuid,
    start_time: DateTime<Utc>,
    current_index: usize,
    entered_at: DateTime<Utc>,
    state_logs: Vec<StateLog>,
    phase: Phase,
}

impl JourneyMachine {
    /// Start a journey at index 0.
    ///
    /// The machine begins in `Transitioning` and the returned transition
    /// enters the first state; call [`settle`](Self::settle) once its
    /// playback is running.
    ///
    /// # Errors
    /// Refuses to start on a configuration that fails validation.
    pub fn start(
        config: Arc<JourneyConfig>,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, Transition), ValidationError> {
        config.validate()?;
        let now = clock.now();
        let first = config.states[0].clone();
        let machine = Self {
            config,
            clock,
            journey_id: Uuid::new_v4(),
            start_time: now,
            current_index: 0,
            entered_at: now,
            state_logs: Vec::new(),
            phase: Phase::Transitioning,
        };
        Ok((
            machine,
            Transition::Enter {
                index: 0,
                state: first,
            },
        ))
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn journey_id(&self) -> Uuid {
        self.journey_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_state(&self) -> &StateName {
        &self.config.states[self.current_index]
    }

    pub fn state_logs(&self) -> &[StateLog] {
        &self.state_logs
    }

    pub fn config(&self) -> &Arc<JourneyConfig> {
        &self.config
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Move forward by `steps` states.
    ///
    /// The overflow check uses the raw sum: reaching or passing the end
    /// terminates the journey, even from a double press on the
    /// second-to-last state. Returns `None` when the command is dropped.
    pub fn advance(&mut self, steps: usize) -> Option<Transition> {
        if self.phase != Phase::Running || steps == 0 {
            return None;
        }
        let now = self.clock.now();
        self.close_current(now);

        let len = self.config.len();
        let target = self.current_index.saturating_add(steps);
        if target >= len {
            return Some(self.terminate(EndReason::Completed, now));
        }

        self.current_index = target % len;
        self.entered_at = now;
        self.phase = Phase::Transitioning;
        Some(Transition::Enter {
            index: self.current_index,
            state: self.config.states[self.current_index].clone(),
        })
    }

    /// End the journey from the current state.
    pub fn abort(&mut self) -> Option<Transition> {
        if self.phase != Phase::Running {
            return None;
        }
        let now = self.clock.now();
        self.close_current(now);
        Some(self.terminate(EndReason::Aborted, now))
    }

    /// The entered state is live; accept commands again.
    pub fn settle(&mut self) {
        if self.phase == Phase::Transitioning {
            self.phase = Phase::Running;
        }
    }

    /// Routing is done; the machine accepts nothing further.
    pub fn finish(&mut self) {
        if self.phase == Phase::Terminating {
            self.phase = Phase::Terminated;
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn close_current(&mut self, now: DateTime<Utc>) {
        let state = self.config.states[self.current_index].clone();
        self.state_logs
            .push(StateLog::new(state, self.entered_at, now));
    }

    fn terminate(&mut self, reason: EndReason, now: DateTime<Utc>) -> Transition {
        self.phase = Phase::Terminating;
        Transition::Terminate(Termination {
            journey_id: self.journey_id,
            scene_name: self.config.scene_name.clone(),
            start_time: self.start_time,
            end_time: now,
            reason,
            last_index: self.current_index,
            debrief_id: self.config.debrief_for(self.current_index).cloned(),
            state_logs: self.state_logs.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journey::clock::ManualClock;

    fn machine(states: &[&str]) -> (JourneyMachine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = JourneyConfig::new("Test", states.iter().map(|s| s.to_string()).collect());
        let (mut m, first) = JourneyMachine::start(Arc::new(config), clock.clone()).unwrap();
        assert_eq!(
            first,
            Transition::Enter {
                index: 0,
                state: states[0].to_string()
            }
        );
        m.settle();
        (m, clock)
    }

    #[test]
    fn refuses_empty_config() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let result = JourneyMachine::start(Arc::new(JourneyConfig::new("x", vec![])), clock);
        assert!(result.is_err());
    }

    #[test]
    fn advance_enters_next_state() {
        let (mut m, _) = machine(&["A", "B", "C"]);
        let t = m.advance(1).unwrap();
        assert_eq!(
            t,
            Transition::Enter {
                index: 1,
                state: "B".into()
            }
        );
        assert_eq!(m.phase(), Phase::Transitioning);
        assert_eq!(m.state_logs().len(), 1);
    }

    #[test]
    fn commands_while_transitioning_are_dropped() {
        let (mut m, _) = machine(&["A", "B", "C"]);
        assert!(m.advance(1).is_some());
        assert!(m.advance(1).is_none());
        assert!(m.abort().is_none());
        assert_eq!(m.state_logs().len(), 1);
        m.settle();
        assert!(m.advance(1).is_some());
    }

    #[test]
    fn double_press_from_second_to_last_terminates() {
        let (mut m, _) = machine(&["A", "B", "C"]);
        m.advance(1);
        m.settle();
        match m.advance(2) {
            Some(Transition::Terminate(t)) => {
                assert_eq!(t.reason, EndReason::Completed);
                assert_eq!(t.last_index, 1);
                assert_eq!(t.state_logs.len(), 2);
            }
            other => panic!("expected termination, got {other:?}"),
        }
        assert_eq!(m.phase(), Phase::Terminating);
    }

    #[test]
    fn double_press_inside_bounds_skips_a_state() {
        let (mut m, _) = machine(&["A", "B", "C", "D"]);
        let t = m.advance(2).unwrap();
        assert_eq!(
            t,
            Transition::Enter {
                index: 2,
                state: "C".into()
            }
        );
    }

    #[test]
    fn abort_uses_current_index_for_debrief() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = JourneyConfig::new("T", vec!["A".into(), "B".into(), "C".into()])
            .with_debrief("B", "mid");
        let (mut m, _) = JourneyMachine::start(Arc::new(config), clock).unwrap();
        m.settle();
        match m.abort() {
            Some(Transition::Terminate(t)) => {
                assert_eq!(t.reason, EndReason::Aborted);
                assert_eq!(t.debrief_id, None);
            }
            other => panic!("expected termination, got {other:?}"),
        }
    }

    #[test]
    fn zero_steps_is_ignored() {
        let (mut m, _) = machine(&["A", "B"]);
        assert!(m.advance(0).is_none());
        assert_eq!(m.phase(), Phase::Running);
        assert!(m.state_logs().is_empty());
    }

    #[test]
    fn logs_chain_without_gaps() {
        let (mut m, clock) = machine(&["A", "B", "C"]);
        for _ in 0..2 {
            clock.advance_ms(1_250);
            m.advance(1);
            m.settle();
        }
        clock.advance_ms(400);
        let Some(Transition::Terminate(t)) = m.advance(1) else {
            panic!("expected termination");
        };
        for pair in t.state_logs.windows(2) {
            assert_eq!(pair[0].end_time, pair[1].start_time);
        }
        let journey = t.into_journey(None);
        assert_eq!(journey.duration_ms, journey.logged_ms());
        assert_eq!(journey.duration_ms, 2_900);
    }

    #[test]
    fn finish_moves_to_terminated() {
        let (mut m, _) = machine(&["A"]);
        m.abort();
        m.finish();
        assert_eq!(m.phase(), Phase::Terminated);
        assert!(m.advance(1).is_none());
    }
}
