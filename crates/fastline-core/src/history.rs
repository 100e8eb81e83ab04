//! Fasting history collaborator: personal records and streaks.
//!
//! The dashboard owns history; the engine only asks for the previous record
//! when a fast begins and pokes `recompute` after one ends.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StoreError;
use crate::session::{LocalSessionStore, Session, SessionStatus};

#[async_trait]
pub trait HistoryService: Send + Sync {
    /// Longest finished fast for the user, in hours. 0 when there is none.
    async fn personal_record_hours(&self, user_id: &str) -> Result<f64, StoreError>;

    /// Rebuild streak/history aggregates after a fast ended.
    async fn recompute(&self, user_id: &str) -> Result<(), StoreError>;
}

/// History collaborator that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHistory;

#[async_trait]
impl HistoryService for NoopHistory {
    async fn personal_record_hours(&self, _user_id: &str) -> Result<f64, StoreError> {
        Ok(0.0)
    }

    async fn recompute(&self, _user_id: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub total_fasts: usize,
    pub completed_fasts: usize,
    pub longest_hours: f64,
    /// Consecutive days, ending on the latest completed fast, with at least
    /// one completed fast.
    pub current_streak_days: u32,
}

impl HistorySummary {
    pub fn from_sessions(sessions: &[Session]) -> Self {
        let finished: Vec<&Session> = sessions.iter().filter(|s| s.status.is_terminal()).collect();
        let longest_hours = finished
            .iter()
            .filter_map(|s| s.actual_duration_hours)
            .fold(0.0, f64::max);

        let completed_days: BTreeSet<NaiveDate> = finished
            .iter()
            .filter(|s| s.status == SessionStatus::Completed)
            .filter_map(|s| s.end_time.map(|t| t.date_naive()))
            .collect();

        let mut current_streak_days = 0;
        if let Some(&latest) = completed_days.iter().next_back() {
            let mut day = latest;
            while completed_days.contains(&day) {
                current_streak_days += 1;
                day -= Duration::days(1);
            }
        }

        Self {
            total_fasts: finished.len(),
            completed_fasts: finished
                .iter()
                .filter(|s| s.status == SessionStatus::Completed)
                .count(),
            longest_hours,
            current_streak_days,
        }
    }
}

/// History derived from a [`LocalSessionStore`].
pub struct StoreHistory {
    store: LocalSessionStore,
    last_summary: Mutex<Option<HistorySummary>>,
}

impl StoreHistory {
    pub fn new(store: LocalSessionStore) -> Self {
        Self {
            store,
            last_summary: Mutex::new(None),
        }
    }

    pub fn summary(&self, user_id: &str) -> HistorySummary {
        HistorySummary::from_sessions(&self.store.sessions_for(user_id))
    }

    /// Summary from the most recent `recompute`.
    pub fn last_summary(&self) -> Option<HistorySummary> {
        self.last_summary
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl HistoryService for StoreHistory {
    async fn personal_record_hours(&self, user_id: &str) -> Result<f64, StoreError> {
        Ok(self.summary(user_id).longest_hours)
    }

    async fn recompute(&self, user_id: &str) -> Result<(), StoreError> {
        let summary = self.summary(user_id);
        info!(
            user_id,
            completed = summary.completed_fasts,
            streak_days = summary.current_streak_days,
            "history recomputed"
        );
        *self.last_summary.lock().unwrap_or_else(|p| p.into_inner()) = Some(summary);
        Ok(())
    }
}
