//! Elapsed-time clock.
//!
//! Elapsed time is always derived from the stored `start_time` and the wall
//! clock, never accumulated tick by tick, so it stays correct across app
//! suspension, device sleep and reloads.
//!
//! ```text
//! elapsed = floor((now - start_time - paused) / 1000)     while active
//! elapsed = same, evaluated at paused_at                   while paused
//! ```

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::session::{Session, SessionStatus};

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Whole seconds of fasting time in `session` as of `now`.
///
/// Paused time is excluded; while paused the value is frozen at `paused_at`.
/// A wall clock behind `start_time` yields 0.
pub fn elapsed_seconds(session: &Session, now: DateTime<Utc>) -> u64 {
    let reference = match session.status {
        SessionStatus::Active => now,
        SessionStatus::Paused => session.paused_at.unwrap_or(now),
        SessionStatus::Completed | SessionStatus::StoppedEarly => session.end_time.unwrap_or(now),
    };
    let ms = (reference - session.start_time).num_milliseconds()
        - session.paused_duration(reference).num_milliseconds();
    (ms.max(0) / 1000) as u64
}

pub fn elapsed_hours(session: &Session, now: DateTime<Utc>) -> f64 {
    elapsed_seconds(session, now) as f64 / 3600.0
}

/// Per-session monotonic view over [`elapsed_seconds`].
///
/// If the wall clock steps backwards the last reported value is held instead
/// of going down. A different session starts from scratch.
#[derive(Debug, Default)]
pub struct ElapsedTracker {
    key: Option<(Option<String>, DateTime<Utc>)>,
    last: u64,
}

impl ElapsedTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed_seconds(&mut self, session: Option<&Session>, now: DateTime<Utc>) -> u64 {
        let Some(session) = session else {
            self.key = None;
            self.last = 0;
            return 0;
        };

        let key = (session.id.clone(), session.start_time);
        if self.key.as_ref() != Some(&key) {
            self.key = Some(key);
            self.last = 0;
        }

        let current = elapsed_seconds(session, now);
        if current < self.last {
            warn!(
                reported = current,
                held = self.last,
                "wall clock moved backwards; holding elapsed time"
            );
            return self.last;
        }
        self.last = current;
        current
    }
}
