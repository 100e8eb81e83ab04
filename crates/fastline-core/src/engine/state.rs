use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bridge::BridgeStatus;
use crate::session::{Session, SessionStatus};

/// Coarse engine state derived from the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FastState {
    NoSession,
    Active,
    Paused,
}

impl FastState {
    pub fn of(session: Option<&Session>) -> Self {
        match session.map(|s| s.status) {
            Some(SessionStatus::Active) => FastState::Active,
            Some(SessionStatus::Paused) => FastState::Paused,
            _ => FastState::NoSession,
        }
    }
}

/// Point-in-time view for rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub user_id: String,
    pub state: FastState,
    pub session: Option<Session>,
    pub elapsed_seconds: u64,
    /// Confirmed water plus amounts still being written.
    pub water_total_ml: u64,
    pub pending_water_ml: u64,
    pub online: bool,
    pub bridge: BridgeStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingOp {
    Starting,
    Stopping,
}

#[derive(Debug, Default)]
pub(crate) struct Shared {
    /// Always `None` or an open (`active|paused`) session.
    pub current: Option<Session>,
    pub pending: Option<PendingOp>,
    pub optimistic_water_ml: u64,
    /// Bumped on every push. Local writes compare it to decide whether their
    /// result is still the freshest thing they know.
    pub push_seq: u64,
    /// Open fast that a push removed while our stop was still being written.
    pub vanished_while_stopping: Option<Session>,
}

impl Shared {
    pub fn water_total_ml(&self) -> u64 {
        self.current.as_ref().map_or(0, Session::total_water_ml) + self.optimistic_water_ml
    }
}

pub(crate) fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the in-flight start/stop marker, also when the operation future is
/// dropped mid-way.
pub(crate) struct PendingGuard<'a> {
    shared: &'a Mutex<Shared>,
}

impl<'a> PendingGuard<'a> {
    pub fn new(shared: &'a Mutex<Shared>) -> Self {
        Self { shared }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.shared).pending = None;
    }
}

/// Withdraws an optimistic water amount when released.
pub(crate) struct OptimisticWater<'a> {
    shared: &'a Mutex<Shared>,
    amount_ml: u64,
}

impl<'a> OptimisticWater<'a> {
    pub fn new(shared: &'a Mutex<Shared>, amount_ml: u64) -> Self {
        Self { shared, amount_ml }
    }
}

impl Drop for OptimisticWater<'_> {
    fn drop(&mut self) {
        let mut shared = lock(self.shared);
        shared.optimistic_water_ml = shared.optimistic_water_ml.saturating_sub(self.amount_ml);
    }
}
