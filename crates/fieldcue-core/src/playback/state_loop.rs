//! Per-state playback loop.
//!
//! One loop runs per state entry:
//!
//! ```text
//! Idle -> Selecting -> Playing -> Waiting(interval) -> Selecting -> ... -> Completed
//! ```
//!
//! The loop suspends in exactly two places, the clip wait and the interval
//! sleep, and both race the loop's cancellation token. A completion is
//! reported to the journey at most once and never after cancellation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::clips::ClipStore;
use super::driver::PlaybackDriver;
use super::resolver::ClipResolver;
use super::session::AudioSession;
use crate::error::ResolveError;
use crate::events::{CompletionCause, EventSink, JourneyEvent};
use crate::journey::{ClipId, Clock, PlaybackMode, Repetitions, StateName};

/// Immutable inputs of one state entry.
#[derive(Debug, Clone)]
pub struct StateLoopSpec {
    pub state: StateName,
    pub clips: Vec<ClipId>,
    pub mode: PlaybackMode,
    pub repetitions: Repetitions,
    pub interval: Duration,
    /// Tags the completion so the journey can ignore stale loops.
    pub generation: u64,
    /// Fixed seed for random mode.
    pub seed: Option<u64>,
}

/// Completion notice sent to the journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateCompletion {
    pub generation: u64,
    pub cause: CompletionCause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Completed(CompletionCause),
    Cancelled,
}

/// What a loop did before it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopReport {
    pub state: StateName,
    pub repetitions: u32,
    pub exit: LoopExit,
}

/// Owner's side of a running loop.
pub struct PlaybackLoopHandle {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<LoopReport>,
}

impl PlaybackLoopHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancel the loop and wait until it has released the audio session.
    pub async fn shutdown(self) -> Option<LoopReport> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the loop to end on its own.
    pub async fn join(self) -> Option<LoopReport> {
        match self.task.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(generation = self.generation, error = %e, "playback loop task failed");
                None
            }
        }
    }
}

/// Spawn the playback loop for one state entry.
///
/// The loop first waits for the audio session; it starts selecting clips
/// only once the previous holder has let go.
pub fn spawn_state_loop(
    spec: StateLoopSpec,
    session: AudioSession,
    clips: Arc<dyn ClipStore>,
    completions: mpsc::UnboundedSender<StateCompletion>,
    events: EventSink,
    clock: Arc<dyn Clock>,
) -> PlaybackLoopHandle {
    let cancel = CancellationToken::new();
    let generation = spec.generation;
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let lease = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return LoopReport {
                    state: spec.state.clone(),
                    repetitions: 0,
                    exit: LoopExit::Cancelled,
                };
            }
            lease = session.acquire() => lease,
        };
        let mut driver = PlaybackDriver::new(lease, clips);
        let report = run_state_loop(&spec, &mut driver, &token, &events, clock.as_ref()).await;
        drop(driver);

        if let LoopExit::Completed(cause) = report.exit {
            events.emit(JourneyEvent::StateCompleted {
                state: spec.state.clone(),
                repetitions: report.repetitions,
                cause,
                at: clock.now(),
            });
            if !token.is_cancelled() {
                let _ = completions.send(StateCompletion {
                    generation: spec.generation,
                    cause,
                });
            }
        }
        report
    });

    PlaybackLoopHandle {
        generation,
        cancel,
        task,
    }
}

/// Drive one state until its cap, an empty clip list, or cancellation.
pub async fn run_state_loop(
    spec: &StateLoopSpec,
    driver: &mut PlaybackDriver,
    cancel: &CancellationToken,
    events: &EventSink,
    clock: &dyn Clock,
) -> LoopReport {
    let state = spec.state.as_str();
    let mut resolver = match spec.seed {
        Some(seed) => ClipResolver::with_seed(spec.clips.clone(), spec.mode, seed),
        None => ClipResolver::new(spec.clips.clone(), spec.mode),
    };
    let distinct = resolver.ordered().iter().collect::<HashSet<_>>().len();
    let mut repetitions: u32 = 0;
    // Clips that failed since the last successful play.
    let mut failed: HashSet<ClipId> = HashSet::new();

    let report = |repetitions, exit| LoopReport {
        state: spec.state.clone(),
        repetitions,
        exit,
    };

    loop {
        if cancel.is_cancelled() {
            return report(repetitions, LoopExit::Cancelled);
        }
        if spec.repetitions.is_reached(repetitions) {
            info!(state, repetitions, "state repetitions reached");
            return report(
                repetitions,
                LoopExit::Completed(CompletionCause::RepetitionsReached),
            );
        }

        let clip = match resolver.next() {
            Ok(clip) => clip,
            Err(ResolveError::NoClipsAvailable) => {
                info!(state, "no clips for state, completing immediately");
                return report(
                    repetitions,
                    LoopExit::Completed(CompletionCause::NoClipsAvailable),
                );
            }
        };

        events.emit(JourneyEvent::ClipStarted {
            state: spec.state.clone(),
            clip: clip.clone(),
            repetition: repetitions + 1,
            at: clock.now(),
        });

        match driver.play(state, &clip, cancel).await {
            Ok(()) => {
                repetitions += 1;
                failed.clear();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return report(repetitions, LoopExit::Cancelled);
                    }
                    _ = tokio::time::sleep(spec.interval) => {}
                }
            }
            Err(e) if e.is_skippable() => {
                failed.insert(clip.clone());
                warn!(state, clip = %clip, error = %e, failed = failed.len(), "skipping clip");
                events.emit(JourneyEvent::ClipSkipped {
                    state: spec.state.clone(),
                    clip: clip.clone(),
                    reason: e.to_string(),
                    at: clock.now(),
                });
                if failed.len() >= distinct {
                    warn!(state, "every clip failed, completing state");
                    return report(
                        repetitions,
                        LoopExit::Completed(CompletionCause::AllClipsUnplayable),
                    );
                }
                debug!(state, "retrying with next clip");
            }
            Err(_) => {
                return report(repetitions, LoopExit::Cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::output::SimulatedOutput;
    use crate::journey::{ManualClock, SystemClock};
    use crate::playback::DirectoryClipStore;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn wall_clock() -> Arc<dyn Clock> {
        Arc::new(SystemClock)
    }

    struct Fixture {
        _dir: TempDir,
        store: Arc<dyn ClipStore>,
        output: Arc<SimulatedOutput>,
        session: AudioSession,
    }

    fn fixture(files: &[&str], clip_ms: u64) -> Fixture {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("Active");
        std::fs::create_dir_all(&state_dir).unwrap();
        for f in files {
            std::fs::write(state_dir.join(f), b"").unwrap();
        }
        let output = Arc::new(SimulatedOutput::new(Duration::from_millis(clip_ms)));
        Fixture {
            store: Arc::new(DirectoryClipStore::new(dir.path())),
            session: AudioSession::new(output.clone()),
            output,
            _dir: dir,
        }
    }

    fn spec(clips: &[&str], mode: PlaybackMode, reps: Repetitions, interval_ms: u64) -> StateLoopSpec {
        StateLoopSpec {
            state: "Active".into(),
            clips: clips.iter().map(|s| s.to_string()).collect(),
            mode,
            repetitions: reps,
            interval: Duration::from_millis(interval_ms),
            generation: 1,
            seed: Some(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_visits_in_order_until_cap() {
        let fx = fixture(&["c0.mp3", "c1.mp3", "c2.mp3"], 100);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_state_loop(
            spec(
                &["c0.mp3", "c1.mp3", "c2.mp3"],
                PlaybackMode::SequentialSelected,
                Repetitions::Count(5),
                50,
            ),
            fx.session.clone(),
            fx.store.clone(),
            tx,
            EventSink::disabled(),
            wall_clock(),
        );
        let report = handle.join().await.unwrap();
        assert_eq!(report.repetitions, 5);
        assert_eq!(
            report.exit,
            LoopExit::Completed(CompletionCause::RepetitionsReached)
        );
        assert_eq!(
            fx.output.played(),
            ["c0.mp3", "c1.mp3", "c2.mp3", "c0.mp3", "c1.mp3"]
        );
        let done = rx.recv().await.unwrap();
        assert_eq!(done.generation, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_clip_list_completes_without_playing() {
        let fx = fixture(&[], 100);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_state_loop(
            spec(&[], PlaybackMode::SequentialSelected, Repetitions::Count(3), 0),
            fx.session.clone(),
            fx.store.clone(),
            tx,
            EventSink::disabled(),
            wall_clock(),
        );
        let report = handle.join().await.unwrap();
        assert_eq!(
            report.exit,
            LoopExit::Completed(CompletionCause::NoClipsAvailable)
        );
        assert!(fx.output.played().is_empty());
        assert_eq!(
            rx.recv().await.unwrap().cause,
            CompletionCause::NoClipsAvailable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_clips_are_skipped_without_counting() {
        let fx = fixture(&["here.mp3"], 100);
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = spawn_state_loop(
            spec(
                &["gone.mp3", "here.mp3"],
                PlaybackMode::SequentialSelected,
                Repetitions::Count(2),
                0,
            ),
            fx.session.clone(),
            fx.store.clone(),
            tx,
            EventSink::disabled(),
            wall_clock(),
        );
        let report = handle.join().await.unwrap();
        assert_eq!(report.repetitions, 2);
        assert_eq!(fx.output.played(), ["here.mp3", "here.mp3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn all_missing_completes_instead_of_spinning() {
        let fx = fixture(&[], 100);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_state_loop(
            spec(
                &["a.mp3", "b.mp3"],
                PlaybackMode::SequentialSelected,
                Repetitions::Unbounded,
                0,
            ),
            fx.session.clone(),
            fx.store.clone(),
            tx,
            EventSink::disabled(),
            wall_clock(),
        );
        let report = handle.join().await.unwrap();
        assert_eq!(report.repetitions, 0);
        assert_eq!(
            report.exit,
            LoopExit::Completed(CompletionCause::AllClipsUnplayable)
        );
        assert_eq!(
            rx.recv().await.unwrap().cause,
            CompletionCause::AllClipsUnplayable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn start_failures_count_as_skips() {
        let fx = fixture(&["bad.mp3", "good.mp3"], 10);
        fx.output.fail_on("bad.mp3");
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = spawn_state_loop(
            spec(
                &["bad.mp3", "good.mp3"],
                PlaybackMode::SequentialSelected,
                Repetitions::Count(1),
                0,
            ),
            fx.session.clone(),
            fx.store.clone(),
            tx,
            EventSink::disabled(),
            wall_clock(),
        );
        let report = handle.join().await.unwrap();
        assert_eq!(report.repetitions, 1);
        assert_eq!(fx.output.played(), ["good.mp3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_interval_stops_without_extra_repetition() {
        let fx = fixture(&["a.mp3"], 200);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_state_loop(
            spec(&["a.mp3"], PlaybackMode::SequentialSelected, Repetitions::Unbounded, 1_000),
            fx.session.clone(),
            fx.store.clone(),
            tx,
            EventSink::disabled(),
            wall_clock(),
        );

        // Two clips (0-200, 1200-1400), then 500ms into the second wait.
        tokio::time::sleep(Duration::from_millis(1_900)).await;
        let report = handle.shutdown().await.unwrap();
        assert_eq!(report.exit, LoopExit::Cancelled);
        assert_eq!(report.repetitions, 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fx.output.played().len(), 2);
        assert!(rx.try_recv().is_err());
        assert!(!fx.session.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_clip_stops_player() {
        let fx = fixture(&["a.mp3"], 5_000);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_state_loop(
            spec(&["a.mp3"], PlaybackMode::SequentialSelected, Repetitions::Count(1), 0),
            fx.session.clone(),
            fx.store.clone(),
            tx,
            EventSink::disabled(),
            wall_clock(),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        let report = handle.shutdown().await.unwrap();
        assert_eq!(report.repetitions, 0);
        assert_eq!(fx.output.playing(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn next_loop_waits_for_session_release() {
        let fx = fixture(&["a.mp3"], 1_000);
        let (tx, _rx) = mpsc::unbounded_channel();
        let first = spawn_state_loop(
            spec(&["a.mp3"], PlaybackMode::SequentialSelected, Repetitions::Unbounded, 0),
            fx.session.clone(),
            fx.store.clone(),
            tx.clone(),
            EventSink::disabled(),
            wall_clock(),
        );
        tokio::time::sleep(Duration::from_millis(300)).await;
        first.shutdown().await;

        let mut next_spec = spec(&["a.mp3"], PlaybackMode::SequentialSelected, Repetitions::Count(2), 0);
        next_spec.generation = 2;
        let second = spawn_state_loop(
            next_spec,
            fx.session.clone(),
            fx.store.clone(),
            tx,
            EventSink::disabled(),
            wall_clock(),
        );
        second.join().await.unwrap();
        assert_eq!(fx.output.peak_concurrency(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn random_mode_keeps_retrying_while_a_clip_is_playable() {
        let fx = fixture(&["here.mp3"], 10);
        let (tx, _rx) = mpsc::unbounded_channel();
        for seed in 0..50 {
            let mut state = spec(
                &["gone.mp3", "here.mp3"],
                PlaybackMode::Random,
                Repetitions::Count(10),
                0,
            );
            state.seed = Some(seed);
            let handle = spawn_state_loop(
                state,
                fx.session.clone(),
                fx.store.clone(),
                tx.clone(),
                EventSink::disabled(),
                wall_clock(),
            );
            let report = handle.join().await.unwrap();
            assert_eq!(report.repetitions, 10, "seed {seed}");
            assert_eq!(
                report.exit,
                LoopExit::Completed(CompletionCause::RepetitionsReached),
                "seed {seed}"
            );
        }
        assert!(fx.output.played().iter().all(|c| c == "here.mp3"));
    }

    #[tokio::test(start_paused = true)]
    async fn random_mode_gives_up_once_every_clip_failed() {
        let fx = fixture(&[], 10);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_state_loop(
            spec(
                &["a.mp3", "b.mp3", "c.mp3"],
                PlaybackMode::Random,
                Repetitions::Unbounded,
                0,
            ),
            fx.session.clone(),
            fx.store.clone(),
            tx,
            EventSink::disabled(),
            wall_clock(),
        );
        let report = handle.join().await.unwrap();
        assert_eq!(
            report.exit,
            LoopExit::Completed(CompletionCause::AllClipsUnplayable)
        );
        assert_eq!(
            rx.recv().await.unwrap().cause,
            CompletionCause::AllClipsUnplayable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn loop_events_use_the_journey_clock() {
        let fx = fixture(&["a.mp3"], 10);
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(at));
        let (tx, _rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let handle = spawn_state_loop(
            spec(
                &["gone.mp3", "a.mp3"],
                PlaybackMode::SequentialSelected,
                Repetitions::Count(1),
                0,
            ),
            fx.session.clone(),
            fx.store.clone(),
            tx,
            EventSink::new(event_tx),
            clock,
        );
        handle.join().await.unwrap();

        let mut stamps = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            match event {
                JourneyEvent::ClipStarted { at, .. }
                | JourneyEvent::ClipSkipped { at, .. }
                | JourneyEvent::StateCompleted { at, .. } => stamps.push(at),
                other => panic!("unexpected event {other:?}"),
            }
        }
        // started + skipped for gone.mp3, started for a.mp3, completed
        assert_eq!(stamps.len(), 4);
        assert!(stamps.iter().all(|s| *s == at));
    }
}
