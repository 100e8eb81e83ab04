//! Fast monitor: turns engine state into milestone notifications.
//!
//! Ticks once per interval while a fast is active and evaluates phase, goal
//! and personal-record milestones. Completion tiers are evaluated when the
//! engine reports the fast ended.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::{Clock, ElapsedTracker};
use crate::engine::SessionEngine;
use crate::events::EngineEvent;
use crate::history::HistoryService;
use crate::milestones::{MilestoneEvent, MilestoneTracker};
use crate::notify::Notifier;
use crate::session::{Session, SessionStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub tick_interval: Duration,
    /// A fast first seen with less elapsed time than this counts as new and
    /// gets fresh milestone state; older ones are picked up silently.
    pub new_session_window: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            new_session_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Observed {
    id: Option<String>,
    start_time: DateTime<Utc>,
}

impl Observed {
    fn of(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            start_time: session.start_time,
        }
    }
}

pub struct FastMonitor {
    tracker: MilestoneTracker,
    elapsed: ElapsedTracker,
    notifier: Arc<dyn Notifier>,
    settings: MonitorSettings,
    observed: Option<Observed>,
    last_ended: Option<Observed>,
    previous_record_hours: f64,
}

impl FastMonitor {
    pub fn new(tracker: MilestoneTracker, notifier: Arc<dyn Notifier>, settings: MonitorSettings) -> Self {
        Self {
            tracker,
            elapsed: ElapsedTracker::new(),
            notifier,
            settings,
            observed: None,
            last_ended: None,
            previous_record_hours: 0.0,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn tracker(&self) -> &MilestoneTracker {
        &self.tracker
    }

    pub fn set_previous_record(&mut self, hours: f64) {
        self.previous_record_hours = hours.max(0.0);
    }

    /// Evaluate the current session at `now`. Returns what was dispatched.
    pub fn observe(&mut self, session: Option<&Session>, now: DateTime<Utc>) -> Vec<MilestoneEvent> {
        let Some(session) = session else {
            if self.observed.take().is_some() {
                debug!("no open fast; monitor idle");
            }
            self.elapsed.elapsed_seconds(None, now);
            return Vec::new();
        };

        let seconds = self.elapsed.elapsed_seconds(Some(session), now);
        let hours = seconds as f64 / 3600.0;

        let observed = Observed::of(session);
        if self.observed.as_ref() != Some(&observed) {
            self.begin_tracking(session, seconds, hours);
            self.observed = Some(observed);
        }

        if session.status != SessionStatus::Active {
            return Vec::new();
        }

        let mut fired = self.tracker.on_elapsed_hours_changed(hours);
        fired.extend(
            self.tracker
                .check_goal_completion(session.planned_duration_hours, hours),
        );
        fired.extend(
            self.tracker
                .check_personal_record(hours, self.previous_record_hours),
        );
        self.dispatch(&fired);
        fired
    }

    /// React to engine lifecycle events. Only a finished fast produces
    /// milestones here.
    pub fn on_engine_event(&mut self, event: &EngineEvent) -> Vec<MilestoneEvent> {
        let EngineEvent::SessionEnded { session, reason, .. } = event else {
            return Vec::new();
        };

        let ended = Observed::of(session);
        if self.last_ended.as_ref() == Some(&ended) {
            return Vec::new();
        }
        // A fast that started and ended between ticks was never tracked.
        if self.observed.as_ref() != Some(&ended) {
            self.tracker.reset();
        }
        self.observed = None;
        self.last_ended = Some(ended);

        let Some(actual_hours) = session.actual_duration_hours else {
            debug!(?reason, "fast ended without a final duration; no completion check");
            return Vec::new();
        };
        let fired: Vec<MilestoneEvent> = self
            .tracker
            .check_fast_completion(actual_hours, session.planned_duration_hours)
            .into_iter()
            .collect();
        self.dispatch(&fired);
        fired
    }

    fn begin_tracking(&mut self, session: &Session, seconds: u64, hours: f64) {
        self.tracker.set_planned_hours(session.planned_duration_hours);
        if seconds <= self.settings.new_session_window.as_secs() {
            info!(session_id = ?session.id, "tracking new fast");
            self.tracker.reset();
        } else {
            info!(
                session_id = ?session.id,
                elapsed_hours = hours,
                "picking up fast in progress; earlier milestones are not replayed"
            );
            self.tracker.prime(
                hours,
                session.planned_duration_hours,
                self.previous_record_hours,
            );
        }
    }

    fn dispatch(&self, events: &[MilestoneEvent]) {
        for event in events {
            self.notifier.schedule_or_send(event);
        }
    }
}

/// Run the monitor against `engine` until the task is aborted.
pub fn spawn_monitor(
    engine: SessionEngine,
    mut monitor: FastMonitor,
    history: Arc<dyn HistoryService>,
    clock: Arc<dyn Clock>,
) -> JoinHandle<()> {
    let mut events = engine.subscribe();
    let tick_interval = monitor.settings().tick_interval;

    tokio::spawn(async move {
        refresh_record(&mut monitor, history.as_ref(), engine.user_id()).await;

        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let session = engine.current_session();
                    monitor.observe(session.as_ref(), clock.now());
                }
                received = events.recv() => match received {
                    Ok(event) => {
                        if matches!(
                            event,
                            EngineEvent::SessionStarted { .. } | EngineEvent::SessionAdopted { .. }
                        ) {
                            refresh_record(&mut monitor, history.as_ref(), engine.user_id()).await;
                        }
                        monitor.on_engine_event(&event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "monitor lagged behind engine events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("fast monitor stopped");
    })
}

async fn refresh_record(monitor: &mut FastMonitor, history: &dyn HistoryService, user_id: &str) {
    match history.personal_record_hours(user_id).await {
        Ok(hours) => monitor.set_previous_record(hours),
        Err(err) => warn!(user_id, error = %err, "could not load personal record"),
    }
}
