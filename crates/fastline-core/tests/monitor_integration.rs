//! Integration tests for milestone evaluation on top of a live engine.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};

use fastline_core::{
    spawn_monitor, Clock, CompletionTier, Connectivity, EndReason, EngineDeps, EngineEvent,
    EngineSettings, FastMonitor, HistoryService, LocalSessionStore, ManualClock, MilestoneEvent,
    MilestoneTracker, MonitorSettings, NoopHistory, Phase, RecordingBridge, RecordingNotifier,
    SessionEngine, StoreHistory,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 1, 19, 0, 0).unwrap()
}

fn engine(store: &LocalSessionStore, clock: Arc<ManualClock>, connectivity: &Connectivity) -> SessionEngine {
    let engine = SessionEngine::new(
        "u1",
        EngineDeps {
            store: Arc::new(store.clone()),
            bridge: Arc::new(RecordingBridge::new()),
            history: Arc::new(NoopHistory),
            clock,
            connectivity: connectivity.subscribe(),
        },
        EngineSettings::default(),
    );
    engine.attach().unwrap();
    engine
}

fn count(events: &[MilestoneEvent], pred: impl Fn(&MilestoneEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

#[tokio::test]
async fn test_start_24h_fires_six_hour_phase_then_goal_once() {
    let store = LocalSessionStore::new();
    let clock = Arc::new(ManualClock::new(t0()));
    let connectivity = Connectivity::new(true);
    let engine = engine(&store, clock.clone(), &connectivity);
    let notifier = Arc::new(RecordingNotifier::new());
    let mut monitor = FastMonitor::new(
        MilestoneTracker::default(),
        notifier.clone(),
        MonitorSettings::default(),
    );

    engine.start(24).await.unwrap();
    assert!(monitor
        .observe(engine.current_session().as_ref(), clock.now())
        .is_empty());

    // One tick per simulated minute up to 6h.
    for _ in 0..360 {
        clock.advance(Duration::minutes(1));
        monitor.observe(engine.current_session().as_ref(), clock.now());
    }
    assert_eq!(
        notifier.events(),
        vec![MilestoneEvent::PhaseReached {
            hours: 6,
            phase: Phase::for_hours(6)
        }]
    );

    for _ in 0..(19 * 60) {
        clock.advance(Duration::minutes(1));
        monitor.observe(engine.current_session().as_ref(), clock.now());
    }
    let events = notifier.events();
    assert_eq!(
        count(&events, |e| matches!(e, MilestoneEvent::GoalReached { target_hours: 24, .. })),
        1
    );
    let phases: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            MilestoneEvent::PhaseReached { hours, .. } => Some(*hours),
            _ => None,
        })
        .collect();
    assert_eq!(phases, vec![6, 12, 16, 18, 24]);

    let ended = EngineEvent::SessionEnded {
        session: engine.stop().await.unwrap(),
        reason: EndReason::Local,
        at: clock.now(),
    };
    let fired = monitor.on_engine_event(&ended);
    assert!(matches!(
        fired.as_slice(),
        [MilestoneEvent::FastCompleted {
            tier: CompletionTier::Full,
            target_hours: 24,
            ..
        }]
    ));
    // Same end delivered twice: nothing new.
    assert!(monitor.on_engine_event(&ended).is_empty());
}

#[tokio::test]
async fn test_relaunch_mid_fast_does_not_replay_milestones() {
    let store = LocalSessionStore::new();
    let clock = Arc::new(ManualClock::new(t0()));
    let connectivity = Connectivity::new(true);

    let first = engine(&store, clock.clone(), &connectivity);
    first.start(16).await.unwrap();
    first.detach();
    drop(first);

    // App comes back 13 hours later.
    clock.advance(Duration::hours(13));
    let relaunched = engine(&store, clock.clone(), &connectivity);
    let notifier = Arc::new(RecordingNotifier::new());
    let mut monitor = FastMonitor::new(
        MilestoneTracker::default(),
        notifier.clone(),
        MonitorSettings::default(),
    );

    assert!(monitor
        .observe(relaunched.current_session().as_ref(), clock.now())
        .is_empty());
    clock.advance(Duration::hours(3));
    let fired = monitor.observe(relaunched.current_session().as_ref(), clock.now());

    assert_eq!(count(&fired, |e| matches!(e, MilestoneEvent::PhaseReached { hours: 16, .. })), 1);
    assert_eq!(count(&fired, |e| matches!(e, MilestoneEvent::GoalReached { .. })), 1);
    assert_eq!(count(&notifier.events(), |e| matches!(e, MilestoneEvent::PhaseReached { hours: 6, .. })), 0);
}

#[tokio::test]
async fn test_personal_record_from_history() {
    let store = LocalSessionStore::new();
    let clock = Arc::new(ManualClock::new(t0()));
    let connectivity = Connectivity::new(true);
    let history = StoreHistory::new(store.clone());

    let engine = engine(&store, clock.clone(), &connectivity);
    engine.start(16).await.unwrap();
    clock.advance(Duration::hours(18));
    engine.stop().await.unwrap();

    let record = history.personal_record_hours("u1").await.unwrap();
    assert_eq!(record, 18.0);

    clock.advance(Duration::hours(6));
    engine.start(24).await.unwrap();
    let notifier = Arc::new(RecordingNotifier::new());
    let mut monitor = FastMonitor::new(
        MilestoneTracker::default(),
        notifier.clone(),
        MonitorSettings::default(),
    );
    monitor.set_previous_record(record);
    monitor.observe(engine.current_session().as_ref(), clock.now());

    clock.advance(Duration::hours(18));
    let fired = monitor.observe(engine.current_session().as_ref(), clock.now());
    assert_eq!(count(&fired, |e| matches!(e, MilestoneEvent::PersonalRecord { .. })), 0);
    clock.advance(Duration::minutes(1));
    let fired = monitor.observe(engine.current_session().as_ref(), clock.now());
    assert_eq!(count(&fired, |e| matches!(e, MilestoneEvent::PersonalRecord { .. })), 1);
}

#[tokio::test]
async fn test_spawned_monitor_dispatches_to_notifier() {
    let store = LocalSessionStore::new();
    let clock = Arc::new(ManualClock::new(t0()));
    let connectivity = Connectivity::new(true);
    let engine = engine(&store, clock.clone(), &connectivity);
    let notifier = Arc::new(RecordingNotifier::new());

    // Wide window: the first tick may land after the clock jump and must
    // still treat the fast as new.
    let settings = MonitorSettings {
        tick_interval: StdDuration::from_millis(5),
        new_session_window: StdDuration::from_secs(7 * 3600),
    };
    let monitor = FastMonitor::new(MilestoneTracker::default(), notifier.clone(), settings);
    let handle = spawn_monitor(engine.clone(), monitor, Arc::new(NoopHistory), clock.clone());

    engine.start(16).await.unwrap();
    clock.advance(Duration::hours(6) + Duration::minutes(1));

    let phase = tokio::time::timeout(StdDuration::from_secs(5), async {
        loop {
            if let Some(event) = notifier
                .events()
                .into_iter()
                .find(|e| matches!(e, MilestoneEvent::PhaseReached { .. }))
            {
                break event;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(
        phase,
        MilestoneEvent::PhaseReached {
            hours: 6,
            phase: Phase::for_hours(6)
        }
    );
    handle.abort();
}
