//! Session ("fast") record and partial updates.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const MIN_PLANNED_HOURS: u32 = 1;
pub const MAX_PLANNED_HOURS: u32 = 168;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    StoppedEarly,
    Completed,
}

impl SessionStatus {
    /// `active` or `paused`: the fast is still open.
    pub fn is_open(self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Paused)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_open()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterEntry {
    pub timestamp: DateTime<Utc>,
    pub amount_ml: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Assigned by the store; `None` until the first successful write.
    #[serde(default)]
    pub id: Option<String>,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub planned_duration_hours: u32,
    #[serde(default)]
    pub actual_duration_hours: Option<f64>,
    pub status: SessionStatus,
    #[serde(default)]
    pub water_log: Vec<WaterEntry>,
    /// Start of the current pause window; only set while paused.
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    /// Milliseconds spent in finished pause windows.
    #[serde(default)]
    pub paused_ms: i64,
}

impl Session {
    /// New, not yet persisted, active session.
    pub fn begin(
        user_id: impl Into<String>,
        planned_duration_hours: u32,
        start_time: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        validate_planned_hours(planned_duration_hours)?;
        Ok(Self {
            id: None,
            user_id: user_id.into(),
            start_time,
            end_time: None,
            planned_duration_hours,
            actual_duration_hours: None,
            status: SessionStatus::Active,
            water_log: Vec::new(),
            paused_at: None,
            paused_ms: 0,
        })
    }

    pub fn total_water_ml(&self) -> u64 {
        self.water_log.iter().map(|e| u64::from(e.amount_ml)).sum()
    }

    /// Pause time including a still-open pause window ending at `now`.
    pub fn paused_duration(&self, now: DateTime<Utc>) -> Duration {
        let open = match (self.status, self.paused_at) {
            (SessionStatus::Paused, Some(at)) => (now - at).max(Duration::zero()),
            _ => Duration::zero(),
        };
        Duration::milliseconds(self.paused_ms) + open
    }

    /// Same logical session as `other`: same id, or same owner and start.
    pub fn same_fast(&self, other: &Session) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.user_id == other.user_id && self.start_time == other.start_time,
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: &SessionPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(end_time) = patch.end_time {
            self.end_time = Some(end_time);
        }
        if let Some(actual) = patch.actual_duration_hours {
            self.actual_duration_hours = Some(actual);
        }
        if let Some(ref water_log) = patch.water_log {
            self.water_log = water_log.clone();
        }
        if let Some(paused_at) = patch.paused_at {
            self.paused_at = paused_at;
        }
        if let Some(paused_ms) = patch.paused_ms {
            self.paused_ms = paused_ms;
        }
    }
}

pub fn validate_planned_hours(hours: u32) -> Result<(), ValidationError> {
    if (MIN_PLANNED_HOURS..=MAX_PLANNED_HOURS).contains(&hours) {
        Ok(())
    } else {
        Err(ValidationError::PlannedHoursOutOfRange { hours })
    }
}

/// Hours between two instants, millisecond precision.
pub fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 3_600_000.0
}

/// Partial field update sent to the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub end_time: Option<DateTime<Utc>>,
    pub actual_duration_hours: Option<f64>,
    pub water_log: Option<Vec<WaterEntry>>,
    /// `Some(None)` clears the field.
    pub paused_at: Option<Option<DateTime<Utc>>>,
    pub paused_ms: Option<i64>,
}

impl SessionPatch {
    pub fn pause(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(SessionStatus::Paused),
            paused_at: Some(Some(at)),
            ..Self::default()
        }
    }

    pub fn resume(paused_ms: i64) -> Self {
        Self {
            status: Some(SessionStatus::Active),
            paused_at: Some(None),
            paused_ms: Some(paused_ms),
            ..Self::default()
        }
    }

    pub fn finish(
        status: SessionStatus,
        end_time: DateTime<Utc>,
        actual_duration_hours: f64,
        paused_ms: i64,
    ) -> Self {
        Self {
            status: Some(status),
            end_time: Some(end_time),
            actual_duration_hours: Some(actual_duration_hours),
            paused_at: Some(None),
            paused_ms: Some(paused_ms),
            ..Self::default()
        }
    }

    pub fn water(water_log: Vec<WaterEntry>) -> Self {
        Self {
            water_log: Some(water_log),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn begin_validates_planned_hours() {
        assert!(Session::begin("u1", 0, t0()).is_err());
        assert!(Session::begin("u1", 169, t0()).is_err());
        let s = Session::begin("u1", 168, t0()).unwrap();
        assert_eq!(s.status, SessionStatus::Active);
        assert!(s.id.is_none());
    }

    #[test]
    fn apply_patch_clears_pause() {
        let mut s = Session::begin("u1", 16, t0()).unwrap();
        s.apply(&SessionPatch::pause(t0() + Duration::hours(1)));
        assert_eq!(s.status, SessionStatus::Paused);
        assert!(s.paused_at.is_some());

        s.apply(&SessionPatch::resume(60_000));
        assert_eq!(s.status, SessionStatus::Active);
        assert!(s.paused_at.is_none());
        assert_eq!(s.paused_ms, 60_000);
    }

    #[test]
    fn paused_duration_includes_open_window() {
        let mut s = Session::begin("u1", 16, t0()).unwrap();
        s.paused_ms = 1_000;
        s.apply(&SessionPatch::pause(t0() + Duration::hours(2)));
        let now = t0() + Duration::hours(2) + Duration::seconds(30);
        assert_eq!(s.paused_duration(now), Duration::milliseconds(31_000));
    }

    #[test]
    fn hours_between_is_fractional() {
        let end = t0() + Duration::minutes(90);
        assert!((hours_between(t0(), end) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&SessionStatus::StoppedEarly).unwrap();
        assert_eq!(json, "\"stopped_early\"");
        assert!(SessionStatus::Paused.is_open());
        assert!(SessionStatus::Completed.is_terminal());
    }
}
