//! End-to-end journeys: runner, playback loops, bridge and recorder together.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fieldcue_core::journey::{AudioAssignment, ManualClock};
use fieldcue_core::{
    DirectoryClipStore, EndReason, EventBridge, EventSink, HostRoute, JourneyConfig,
    JourneyEvent, JourneyRecorder, JourneyRunner, JourneyServices, PlaybackMode, RawEvent,
    Repetitions, SimulatedOutput, SqliteJourneyStore,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

const STATES: [&str; 4] = ["Active", "Spotted", "Proximity", "Trigger"];

struct Harness {
    _dir: TempDir,
    output: Arc<SimulatedOutput>,
    store: Arc<SqliteJourneyStore>,
    clock: Arc<ManualClock>,
    services: JourneyServices,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    for state in STATES {
        let state_dir = dir.path().join(state);
        std::fs::create_dir_all(&state_dir).unwrap();
        for clip in ["b.mp3", "a.mp3"] {
            std::fs::write(state_dir.join(clip), b"").unwrap();
        }
    }
    let output = Arc::new(SimulatedOutput::new(Duration::from_millis(200)));
    let store = Arc::new(SqliteJourneyStore::open_memory().unwrap());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let services = JourneyServices::new(
        output.clone(),
        Arc::new(DirectoryClipStore::new(dir.path())),
        store.clone(),
    )
    .with_clock(clock.clone())
    .with_seed(11);
    Harness {
        _dir: dir,
        output,
        store,
        clock,
        services,
    }
}

fn scene() -> JourneyConfig {
    let mut config = JourneyConfig::new("patrol", STATES.iter().map(|s| s.to_string()).collect());
    for state in STATES {
        config = config.with_interval(state, 2_000).with_audio(
            state,
            AudioAssignment {
                clips: Vec::new(),
                mode: PlaybackMode::Alphabetical,
                repetitions: Repetitions::Unbounded,
            },
        );
    }
    config
}

async fn pause() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn n_single_presses_produce_n_logs_and_one_route() {
    let h = harness();
    let (runner, handle) = JourneyRunner::new(scene(), h.services.clone()).unwrap();
    let task = tokio::spawn(runner.run());

    for _ in 0..STATES.len() {
        pause().await;
        h.clock.advance_ms(1_000);
        assert!(handle.advance(1));
    }

    let HostRoute::Idle { journey, recorded } = task.await.unwrap() else {
        panic!("expected idle route");
    };
    assert!(recorded);
    assert_eq!(journey.end_reason, EndReason::Completed);
    assert_eq!(journey.state_logs.len(), STATES.len());
    assert_eq!(journey.duration_ms, 4_000);
    assert_eq!(journey.logged_ms(), journey.duration_ms);
    for pair in journey.state_logs.windows(2) {
        assert_eq!(pair[0].end_time, pair[1].start_time);
    }

    // The journey is gone: the handle reports it.
    pause().await;
    assert!(!handle.advance(1));
    assert_eq!(h.store.list(10).unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn abort_at_index_k_keeps_k_plus_one_logs() {
    for k in 0..STATES.len() {
        let h = harness();
        let (runner, handle) = JourneyRunner::new(scene(), h.services.clone()).unwrap();
        let task = tokio::spawn(runner.run());

        for _ in 0..k {
            pause().await;
            handle.advance(1);
        }
        pause().await;
        handle.abort();

        let HostRoute::Idle { journey, .. } = task.await.unwrap() else {
            panic!("expected idle route");
        };
        assert_eq!(journey.end_reason, EndReason::Aborted);
        assert_eq!(journey.state_logs.len(), k + 1);
        assert_eq!(journey.state_logs[k].state_name, STATES[k]);
        assert_eq!(h.output.playing(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn early_debrief_covers_later_states() {
    let h = harness();
    let config = scene().with_debrief("Active", "D1");
    let (runner, handle) = JourneyRunner::new(config, h.services.clone()).unwrap();
    let task = tokio::spawn(runner.run());

    for _ in 0..3 {
        pause().await;
        handle.advance(1);
    }
    pause().await;
    handle.abort();

    let HostRoute::Debrief(route) = task.await.unwrap() else {
        panic!("expected debrief route");
    };
    assert_eq!(route.debrief_id(), "D1");
    assert_eq!(route.state_logs().len(), 4);
    assert!(h.store.get(route.journey_id()).unwrap().is_none());

    let form = fieldcue_core::DebriefForm {
        id: "D1".into(),
        title: "Debrief".into(),
        questions: Vec::new(),
    };
    let log = form.answer(&[]).unwrap();
    let journey = route.submit(log, h.store.as_ref()).unwrap();

    let stored = h.store.get(journey.id).unwrap().unwrap();
    assert_eq!(stored.debrief_log.map(|d| d.debrief_id).as_deref(), Some("D1"));
    assert!(matches!(
        h.store.persist(&journey),
        Err(fieldcue_core::RecorderError::AlreadyRecorded(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn double_press_from_second_to_last_terminates() {
    let h = harness();
    let (runner, handle) = JourneyRunner::new(scene(), h.services.clone()).unwrap();
    let task = tokio::spawn(runner.run());

    for _ in 0..2 {
        pause().await;
        handle.advance(1);
    }
    pause().await;
    handle.advance(2);

    let HostRoute::Idle { journey, .. } = task.await.unwrap() else {
        panic!("expected idle route");
    };
    assert_eq!(journey.end_reason, EndReason::Completed);
    let names: Vec<_> = journey.state_logs.iter().map(|l| l.state_name.as_str()).collect();
    assert_eq!(names, ["Active", "Spotted", "Proximity"]);
}

#[tokio::test(start_paused = true)]
async fn unassigned_states_play_every_recorded_clip() {
    let h = harness();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let services = h.services.clone().with_events(EventSink::new(tx));
    let (runner, handle) = JourneyRunner::new(scene(), services).unwrap();
    let task = tokio::spawn(runner.run());

    // Two clips of 200ms separated by a 2s interval.
    tokio::time::sleep(Duration::from_millis(2_300)).await;
    handle.abort();
    task.await.unwrap();

    assert_eq!(h.output.played(), ["a.mp3", "b.mp3"]);
    assert_eq!(h.output.peak_concurrency(), 1);

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(match event {
            JourneyEvent::JourneyStarted { .. } => "started",
            JourneyEvent::StateEntered { .. } => "entered",
            JourneyEvent::ClipStarted { .. } => "clip",
            JourneyEvent::JourneyEnded { .. } => "ended",
            _ => "other",
        });
    }
    assert_eq!(kinds, ["started", "entered", "clip", "clip", "ended"]);
}

#[tokio::test(start_paused = true)]
async fn bridge_drops_stale_presses() {
    let h = harness();
    let (runner, handle) = JourneyRunner::new(scene(), h.services.clone()).unwrap();
    let task = tokio::spawn(runner.run());

    let listening_since = Utc::now();
    let bridge = EventBridge::with_listening_since(handle, listening_since);
    let (ev_tx, ev_rx) = mpsc::channel(16);
    let pump = tokio::spawn(bridge.pump(ev_rx));

    ev_tx
        .send(RawEvent {
            event_name: "long_press".into(),
            timestamp: listening_since - chrono::Duration::seconds(3),
        })
        .await
        .unwrap();
    pause().await;
    ev_tx.send(RawEvent::now("single_press")).await.unwrap();
    pause().await;
    ev_tx.send(RawEvent::now("long_press")).await.unwrap();
    drop(ev_tx);

    let HostRoute::Idle { journey, .. } = task.await.unwrap() else {
        panic!("expected idle route");
    };
    pump.await.unwrap();
    assert_eq!(journey.end_reason, EndReason::Aborted);
    assert_eq!(journey.state_logs.len(), 2);
}
