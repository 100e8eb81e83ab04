//! Integration tests for the session engine.
//!
//! Drives the engine against the in-process store with a manual clock and a
//! recording sleeper, including pushes that originate from "another device"
//! writing to the same store.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::broadcast;

use fastline_core::{
    BridgeEvent, BridgeStatus, Clock, Connectivity, EndReason, EngineDeps, EngineError,
    EngineEvent, EngineSettings, ErrorKind, FastState, LocalSessionStore, ManualClock, NoopHistory,
    RecordingBridge, RecordingSleeper, RecoveryAction, RemoteCode, RetryConfig, RetryPolicy,
    Session, SessionEngine, SessionPatch, SessionStatus, SessionStore, Sleeper, StoreError, StoreOp,
};

type Hook = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Records waits like [`RecordingSleeper`] and runs a one-shot hook inside
/// the first backoff, i.e. while an operation is between attempts.
struct HookSleeper {
    waits: Arc<RecordingSleeper>,
    hook: Mutex<Option<Hook>>,
}

impl HookSleeper {
    fn during_first_backoff(&self, hook: impl Future<Output = ()> + Send + 'static) {
        let hook: Hook = Box::pin(hook);
        *self.hook.lock().unwrap() = Some(hook);
    }
}

#[async_trait]
impl Sleeper for HookSleeper {
    async fn sleep(&self, duration: StdDuration) {
        self.waits.sleep(duration).await;
        let hook = self.hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook.await;
        }
    }
}

struct Harness {
    engine: SessionEngine,
    store: LocalSessionStore,
    clock: Arc<ManualClock>,
    connectivity: Connectivity,
    bridge: Arc<RecordingBridge>,
    sleeper: Arc<RecordingSleeper>,
    hooks: Arc<HookSleeper>,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 20, 0, 0).unwrap()
}

fn harness() -> Harness {
    let store = LocalSessionStore::new();
    let clock = Arc::new(ManualClock::new(t0()));
    let connectivity = Connectivity::new(true);
    let bridge = Arc::new(RecordingBridge::new());
    let sleeper = Arc::new(RecordingSleeper::new());
    let hooks = Arc::new(HookSleeper {
        waits: sleeper.clone(),
        hook: Mutex::new(None),
    });
    let retry = RetryPolicy::for_store(RetryConfig::default()).with_sleeper(hooks.clone());

    let engine = SessionEngine::with_retry(
        "u1",
        EngineDeps {
            store: Arc::new(store.clone()),
            bridge: bridge.clone(),
            history: Arc::new(NoopHistory),
            clock: clock.clone(),
            connectivity: connectivity.subscribe(),
        },
        EngineSettings::default(),
        retry,
    );

    Harness {
        engine,
        store,
        clock,
        connectivity,
        bridge,
        sleeper,
        hooks,
    }
}

fn attached() -> Harness {
    let h = harness();
    h.engine.attach().unwrap();
    h
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_start_creates_active_session() {
    let h = attached();
    let mut events = h.engine.subscribe();

    let id = h.engine.start(24).await.unwrap();

    let stored = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Active);
    assert_eq!(stored.planned_duration_hours, 24);
    assert_eq!(stored.start_time, t0());
    assert_eq!(h.engine.state(), FastState::Active);
    assert_eq!(h.engine.current_session().unwrap().id.as_deref(), Some(id.as_str()));

    let events = drain(&mut events);
    let started = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::SessionStarted { .. }))
        .count();
    assert_eq!(started, 1);
    assert!(!events
        .iter()
        .any(|e| matches!(e, EngineEvent::SessionAdopted { .. })));
    assert_eq!(h.bridge.started().len(), 1);
}

#[tokio::test]
async fn test_start_get_round_trip_for_every_planned_duration() {
    for hours in 1..=168 {
        let h = attached();
        let id = h.engine.start(hours).await.unwrap();
        let stored = h.store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.planned_duration_hours, hours);
        assert_eq!(stored.status, SessionStatus::Active);
    }
}

#[tokio::test]
async fn test_start_rejects_out_of_range_hours() {
    let h = attached();
    for hours in [0, 169, 1000] {
        let err = h.engine.start(hours).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)), "{hours}: {err:?}");
    }
    assert_eq!(h.store.call_count(StoreOp::Create), 0);
}

#[tokio::test]
async fn test_second_start_is_invalid_state_without_store_access() {
    let h = attached();
    h.engine.start(16).await.unwrap();
    let queries = h.store.call_count(StoreOp::Query);

    h.store.inject_failures(
        StoreOp::Query,
        5,
        StoreError::remote(RemoteCode::Unavailable, "down"),
    );
    let err = h.engine.start(16).await.unwrap_err();

    assert!(matches!(err, EngineError::InvalidState(_)));
    assert_eq!(h.store.call_count(StoreOp::Query), queries);
    assert_eq!(h.store.call_count(StoreOp::Create), 1);
}

#[tokio::test]
async fn test_start_adopts_fast_from_other_device() {
    // Not attached: the push has not arrived yet.
    let h = harness();
    let other = Session::begin("u1", 36, t0() - Duration::hours(3)).unwrap();
    h.store.create(&other).await.unwrap();
    let mut events = h.engine.subscribe();

    let err = h.engine.start(16).await.unwrap_err();

    assert!(matches!(err, EngineError::InvalidState(_)));
    assert_eq!(h.store.call_count(StoreOp::Create), 1);
    assert_eq!(h.engine.current_session().unwrap().planned_duration_hours, 36);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::SessionAdopted { .. })));
}

#[tokio::test]
async fn test_start_offline_is_rejected_before_any_write() {
    let h = attached();
    h.connectivity.set_online(false);

    let err = h.engine.start(16).await.unwrap_err();

    assert_eq!(err, EngineError::Offline);
    assert_eq!(err.classification().kind, ErrorKind::Network);
    assert_eq!(h.store.call_count(StoreOp::Query), 0);
    assert_eq!(h.store.call_count(StoreOp::Create), 0);
}

#[tokio::test]
async fn test_start_retries_transient_create_failures() {
    let h = attached();
    h.store.inject_failures(
        StoreOp::Create,
        2,
        StoreError::Transport("connection reset".into()),
    );

    h.engine.start(16).await.unwrap();

    assert_eq!(h.store.call_count(StoreOp::Create), 3);
    assert_eq!(
        h.sleeper.waits(),
        vec![StdDuration::from_millis(500), StdDuration::from_millis(1000)]
    );
}

#[tokio::test]
async fn test_permission_denied_is_not_retried() {
    let h = attached();
    h.store.inject_failures(
        StoreOp::Create,
        1,
        StoreError::remote(RemoteCode::PermissionDenied, "rules"),
    );

    let err = h.engine.start(16).await.unwrap_err();

    assert_eq!(h.store.call_count(StoreOp::Create), 1);
    assert!(h.sleeper.waits().is_empty());
    let classified = err.classification();
    assert_eq!(classified.kind, ErrorKind::RemoteStore);
    assert!(!classified.recoverable);
    assert_eq!(h.engine.state(), FastState::NoSession);

    // The in-flight marker is released: a later start works.
    h.engine.start(16).await.unwrap();
}

#[tokio::test]
async fn test_stop_records_duration_round_trip() {
    let h = attached();
    let id = h.engine.start(16).await.unwrap();
    h.clock.advance(Duration::minutes(16 * 60 + 30));
    let mut events = h.engine.subscribe();

    let ended = h.engine.stop().await.unwrap();

    assert_eq!(ended.status, SessionStatus::Completed);
    assert_eq!(ended.actual_duration_hours, Some(16.5));
    let stored = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.end_time, Some(t0() + Duration::minutes(990)));
    assert_eq!(stored.actual_duration_hours, Some(16.5));
    assert!(stored.end_time.unwrap() >= stored.start_time);

    assert_eq!(h.engine.state(), FastState::NoSession);
    assert_eq!(h.engine.elapsed_seconds(), 0);
    let events = drain(&mut events);
    let ends: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::SessionEnded { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect();
    assert_eq!(ends, vec![EndReason::Local]);
    assert_eq!(h.bridge.stopped(), vec!["u1".to_string()]);
}

#[tokio::test]
async fn test_stop_early_writes_stopped_early() {
    let h = attached();
    let id = h.engine.start(72).await.unwrap();
    h.clock.advance(Duration::hours(20));

    let ended = h.engine.stop_early().await.unwrap();

    assert_eq!(ended.status, SessionStatus::StoppedEarly);
    let stored = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::StoppedEarly);
    assert_eq!(stored.actual_duration_hours, Some(20.0));
}

#[tokio::test]
async fn test_pause_freezes_elapsed_and_resume_continues() {
    let h = attached();
    let id = h.engine.start(16).await.unwrap();

    h.clock.advance(Duration::hours(2));
    h.engine.pause().await.unwrap();
    assert_eq!(h.engine.state(), FastState::Paused);
    assert_eq!(h.engine.elapsed_seconds(), 2 * 3600);

    h.clock.advance(Duration::minutes(30));
    assert_eq!(h.engine.elapsed_seconds(), 2 * 3600);
    assert!(matches!(h.engine.pause().await, Err(EngineError::InvalidState(_))));

    h.engine.resume().await.unwrap();
    assert_eq!(h.engine.state(), FastState::Active);
    h.clock.advance(Duration::hours(1));
    assert_eq!(h.engine.elapsed_seconds(), 3 * 3600);

    let stored = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.paused_ms, 30 * 60 * 1000);
    assert!(stored.paused_at.is_none());

    // Recorded duration stays wall-clock; the pause is kept alongside it.
    let ended = h.engine.stop().await.unwrap();
    assert_eq!(ended.actual_duration_hours, Some(3.5));
    assert_eq!(ended.paused_ms, 30 * 60 * 1000);
}

#[tokio::test]
async fn test_stop_while_paused_counts_open_pause() {
    let h = attached();
    h.engine.start(16).await.unwrap();
    h.clock.advance(Duration::hours(1));
    h.engine.pause().await.unwrap();
    h.clock.advance(Duration::minutes(15));

    let ended = h.engine.stop().await.unwrap();

    assert_eq!(ended.paused_ms, 15 * 60 * 1000);
    assert!(ended.paused_at.is_none());
}

#[tokio::test]
async fn test_no_session_push_means_ended_elsewhere() {
    let h = attached();
    let id = h.engine.start(16).await.unwrap();
    h.clock.advance(Duration::hours(5));
    let mut events = h.engine.subscribe();

    // Another device ends the fast.
    let end = h.clock.now();
    h.store
        .update(
            &id,
            &SessionPatch::finish(SessionStatus::Completed, end, 5.0, 0),
        )
        .await
        .unwrap();

    assert_eq!(h.engine.state(), FastState::NoSession);
    assert_eq!(h.engine.elapsed_seconds(), 0);
    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::SessionEnded {
            reason: EndReason::EndedElsewhere,
            ..
        }
    )));
    assert_eq!(h.engine.bridge_status(), BridgeStatus::Idle);

    // Local stop now has nothing to act on.
    assert!(matches!(h.engine.stop().await, Err(EngineError::InvalidState(_))));
}

#[tokio::test]
async fn test_remote_pause_is_applied_from_push() {
    let h = attached();
    let id = h.engine.start(16).await.unwrap();
    h.clock.advance(Duration::hours(1));

    h.store
        .update(&id, &SessionPatch::pause(h.clock.now()))
        .await
        .unwrap();

    assert_eq!(h.engine.state(), FastState::Paused);
    h.clock.advance(Duration::hours(1));
    assert_eq!(h.engine.elapsed_seconds(), 3600);
}

#[tokio::test]
async fn test_add_water_accumulates() {
    let h = attached();
    let id = h.engine.start(16).await.unwrap();

    h.engine.add_water(250, None).await.unwrap();
    h.clock.advance(Duration::minutes(10));
    h.engine
        .add_water(500, Some("sparkling".into()))
        .await
        .unwrap();

    assert_eq!(h.engine.water_total_ml(), 750);
    let stored = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.water_log.len(), 2);
    assert_eq!(stored.water_log[1].note.as_deref(), Some("sparkling"));
    assert!(stored.water_log[0].timestamp <= stored.water_log[1].timestamp);
}

#[tokio::test]
async fn test_add_water_failure_rolls_back_optimistic_total() {
    let h = attached();
    h.engine.start(16).await.unwrap();
    h.engine.add_water(500, None).await.unwrap();
    let before = h.engine.water_total_ml();
    let mut events = h.engine.subscribe();

    h.store.inject_failures(
        StoreOp::Update,
        3,
        StoreError::remote(RemoteCode::Unavailable, "backend down"),
    );
    let err = h.engine.add_water(250, None).await.unwrap_err();

    assert_eq!(h.engine.water_total_ml(), before);
    let classified = err.classification();
    assert_eq!(classified.kind, ErrorKind::RemoteStore);
    assert!(classified.recoverable);
    assert_eq!(classified.action, RecoveryAction::Retry);

    let rolled_back: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::WaterRolledBack {
                amount_ml,
                total_ml,
                ..
            } => Some((amount_ml, total_ml)),
            _ => None,
        })
        .collect();
    assert_eq!(rolled_back, vec![(250, before)]);
}

#[tokio::test]
async fn test_add_water_rejects_bad_amounts() {
    let h = attached();
    h.engine.start(16).await.unwrap();
    for amount in [0, 5001] {
        let err = h.engine.add_water(amount, None).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert_eq!(err.classification().action, RecoveryAction::CorrectInput);
    }
    assert_eq!(h.engine.water_total_ml(), 0);
}

#[tokio::test]
async fn test_add_water_offline_is_rejected() {
    let h = attached();
    h.engine.start(16).await.unwrap();
    h.connectivity.set_online(false);

    assert_eq!(
        h.engine.add_water(250, None).await.unwrap_err(),
        EngineError::Offline
    );
    assert_eq!(h.engine.water_total_ml(), 0);
}

#[tokio::test]
async fn test_attach_adopts_open_session() {
    let h = harness();
    let existing = Session::begin("u1", 48, t0() - Duration::hours(30)).unwrap();
    h.store.create(&existing).await.unwrap();
    let mut events = h.engine.subscribe();

    h.engine.attach().unwrap();

    assert_eq!(h.engine.state(), FastState::Active);
    assert_eq!(h.engine.elapsed_seconds(), 30 * 3600);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::SessionAdopted { .. })));

    h.engine.detach();
    assert_eq!(h.store.subscriber_count(), 0);
}

#[tokio::test]
async fn test_refused_bridge_degrades_but_fast_continues() {
    let h = attached();
    h.bridge.set_accepting(false);
    let mut events = h.engine.subscribe();

    let id = h.engine.start(16).await.unwrap();

    assert_eq!(h.engine.state(), FastState::Active);
    assert_eq!(
        h.engine.bridge_status(),
        BridgeStatus::Degraded { session_id: id }
    );
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::BridgeDegraded { .. })));
}

#[tokio::test]
async fn test_external_stop_ends_fast_with_background_reason() {
    let h = attached();
    let id = h.engine.start(16).await.unwrap();
    h.clock.advance(Duration::hours(17));
    let mut events = h.engine.subscribe();

    h.engine
        .handle_bridge_event(BridgeEvent::StoppedFromExternalAction {
            user_id: "u1".into(),
        })
        .await
        .unwrap();

    let stored = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.actual_duration_hours, Some(17.0));
    assert_eq!(h.engine.state(), FastState::NoSession);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        EngineEvent::SessionEnded {
            reason: EndReason::Background,
            ..
        }
    )));
}

#[tokio::test]
async fn test_external_stop_after_background_wrote_end() {
    let h = harness();
    let existing = Session::begin("u1", 16, t0()).unwrap();
    let id = h.store.create(&existing).await.unwrap();
    h.engine.refresh().await.unwrap();
    assert_eq!(h.engine.state(), FastState::Active);

    // Background wrote the end; no subscription delivered it.
    h.store
        .update(
            &id,
            &SessionPatch::finish(SessionStatus::Completed, t0() + Duration::hours(16), 16.0, 0),
        )
        .await
        .unwrap();
    let mut events = h.engine.subscribe();

    h.engine
        .handle_bridge_event(BridgeEvent::StoppedFromExternalAction {
            user_id: "u1".into(),
        })
        .await
        .unwrap();

    assert_eq!(h.engine.state(), FastState::NoSession);
    let ended = drain(&mut events)
        .into_iter()
        .find_map(|e| match e {
            EngineEvent::SessionEnded {
                session,
                reason: EndReason::Background,
                ..
            } => Some(session),
            _ => None,
        })
        .unwrap();
    assert_eq!(ended.actual_duration_hours, Some(16.0));
}

#[tokio::test]
async fn test_reconnect_refreshes_from_store() {
    let h = harness();
    let watcher = h.engine.spawn_connectivity_watch();
    let mut events = h.engine.subscribe();

    h.connectivity.set_online(false);
    let other = Session::begin("u1", 20, t0()).unwrap();
    h.store.create(&other).await.unwrap();
    h.connectivity.set_online(true);

    let adopted = tokio::time::timeout(StdDuration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(EngineEvent::SessionAdopted { session, .. }) => break session,
                Ok(_) => continue,
                Err(err) => panic!("event stream failed: {err}"),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(adopted.planned_duration_hours, 20);
    assert_eq!(h.engine.state(), FastState::Active);
    watcher.abort();
}

#[tokio::test]
async fn test_stop_while_start_retries_is_invalid_state() {
    let h = attached();
    h.store.inject_failures(
        StoreOp::Create,
        1,
        StoreError::Transport("connection reset".into()),
    );
    let outcome = Arc::new(Mutex::new(None));
    let (engine, seen) = (h.engine.clone(), outcome.clone());
    h.hooks.during_first_backoff(async move {
        let result = engine.stop().await;
        *seen.lock().unwrap() = Some(result);
    });

    let id = h.engine.start(16).await.unwrap();

    let stop = outcome.lock().unwrap().take().expect("stop ran during backoff");
    assert!(matches!(stop, Err(EngineError::InvalidState(_))), "{stop:?}");
    assert_eq!(h.engine.state(), FastState::Active);
    assert_eq!(h.engine.current_session().unwrap().id.as_deref(), Some(id.as_str()));
    assert_eq!(h.store.call_count(StoreOp::Update), 0);
}

#[tokio::test]
async fn test_fast_ended_elsewhere_while_stop_retries() {
    let h = attached();
    h.engine.start(16).await.unwrap();
    let mut events = h.engine.subscribe();
    h.store.inject_failures(StoreOp::Update, 3, StoreError::Transport("reset".into()));
    let engine = h.engine.clone();
    h.hooks.during_first_backoff(async move { engine.apply_push(None) });

    let err = h.engine.stop().await.unwrap_err();

    assert!(matches!(err, EngineError::Store(StoreError::Transport(_))), "{err:?}");
    assert_eq!(h.engine.state(), FastState::NoSession);
    let events = drain(&mut events);
    assert!(
        matches!(
            events.as_slice(),
            [EngineEvent::SessionEnded {
                reason: EndReason::EndedElsewhere,
                ..
            }]
        ),
        "{events:?}"
    );
    assert_eq!(h.bridge.stopped(), vec!["u1".to_string()]);
    assert_eq!(h.engine.bridge_status(), BridgeStatus::Idle);
}

#[tokio::test]
async fn test_stop_echo_is_not_reported_as_ended_elsewhere() {
    let h = attached();
    h.engine.start(16).await.unwrap();
    let mut events = h.engine.subscribe();

    h.engine.stop().await.unwrap();

    let events = drain(&mut events);
    assert!(
        matches!(
            events.as_slice(),
            [EngineEvent::SessionEnded {
                reason: EndReason::Local,
                ..
            }]
        ),
        "{events:?}"
    );
}

#[tokio::test]
async fn test_fast_from_other_device_during_create_is_adopted() {
    let h = attached();
    h.store.inject_failures(
        StoreOp::Create,
        1,
        StoreError::Transport("connection reset".into()),
    );
    let mut events = h.engine.subscribe();
    let store = h.store.clone();
    h.hooks.during_first_backoff(async move {
        let theirs = Session::begin("u1", 20, t0() + Duration::minutes(1)).unwrap();
        store.create(&theirs).await.unwrap();
    });

    let ours = h.engine.start(16).await.unwrap();

    let held = h.engine.current_session().unwrap();
    assert_ne!(held.id.as_deref(), Some(ours.as_str()));
    assert_eq!(held.planned_duration_hours, 20);

    let events = drain(&mut events);
    assert!(!events
        .iter()
        .any(|e| matches!(e, EngineEvent::SessionStarted { .. })));
    let adopted: Vec<&Session> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::SessionAdopted { session, .. } => Some(session),
            _ => None,
        })
        .collect();
    assert_eq!(adopted.len(), 1);
    assert_eq!(adopted[0].id, held.id);
    match h.engine.bridge_status() {
        BridgeStatus::Running { session_id, .. } => assert_eq!(Some(session_id), held.id),
        other => panic!("bridge not tracking the held fast: {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_start_announces_fast_pushed_meanwhile() {
    let h = attached();
    h.store.inject_failures(
        StoreOp::Create,
        1,
        StoreError::Transport("connection reset".into()),
    );
    let mut events = h.engine.subscribe();
    let store = h.store.clone();
    h.hooks.during_first_backoff(async move {
        let theirs = Session::begin("u1", 20, t0()).unwrap();
        store.create(&theirs).await.unwrap();
        // Our remaining attempts fail too.
        store.inject_failures(
            StoreOp::Create,
            2,
            StoreError::Transport("connection reset".into()),
        );
    });

    let err = h.engine.start(16).await.unwrap_err();

    assert!(matches!(err, EngineError::Store(StoreError::Transport(_))), "{err:?}");
    let held = h.engine.current_session().unwrap();
    assert_eq!(held.planned_duration_hours, 20);
    let events = drain(&mut events);
    assert!(
        matches!(events.as_slice(), [EngineEvent::SessionAdopted { session, .. }] if session.id == held.id),
        "{events:?}"
    );
}

#[tokio::test]
async fn test_bridge_liveness_follows_heartbeats() {
    let h = attached();
    let timeout = Duration::seconds(90);
    let id = h.engine.start(16).await.unwrap();
    assert!(h.engine.bridge_alive(timeout));

    h.clock.advance(Duration::minutes(2));
    assert!(!h.engine.bridge_alive(timeout));

    h.engine
        .handle_bridge_event(BridgeEvent::Heartbeat {
            session_id: id,
            elapsed_seconds: 120,
        })
        .await
        .unwrap();
    assert!(h.engine.bridge_alive(timeout));

    h.engine.stop().await.unwrap();
    assert!(!h.engine.bridge_alive(timeout));
}
