use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Why a fast stopped being the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// `stop` / `stop_early` on this device.
    Local,
    /// The push subscription reported no open session.
    EndedElsewhere,
    /// Ended through the background bridge.
    Background,
}

/// Every state change in the engine produces an Event.
/// The UI renders from snapshots; the fast monitor and hosts subscribe to these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    SessionStarted {
        session: Session,
        at: DateTime<Utc>,
    },
    /// An open fast appeared through the subscription or a refresh
    /// (app relaunch, another device).
    SessionAdopted {
        session: Session,
        at: DateTime<Utc>,
    },
    /// Remote change to the current fast.
    SessionUpdated {
        session: Session,
        at: DateTime<Utc>,
    },
    SessionPaused {
        session: Session,
        at: DateTime<Utc>,
    },
    SessionResumed {
        session: Session,
        at: DateTime<Utc>,
    },
    /// `session` is the final record for local and background ends, and the
    /// last known local view when the fast ended elsewhere.
    SessionEnded {
        session: Session,
        reason: EndReason,
        at: DateTime<Utc>,
    },
    WaterLogged {
        session_id: String,
        amount_ml: u32,
        total_ml: u64,
        at: DateTime<Utc>,
    },
    /// The optimistic amount was withdrawn after a failed write.
    WaterRolledBack {
        session_id: String,
        amount_ml: u32,
        total_ml: u64,
        at: DateTime<Utc>,
    },
    ConnectivityChanged {
        online: bool,
        at: DateTime<Utc>,
    },
    /// Background bridge refused the session; timing is foreground-only.
    BridgeDegraded {
        session_id: String,
        at: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// The session carried by lifecycle events.
    pub fn session(&self) -> Option<&Session> {
        match self {
            EngineEvent::SessionStarted { session, .. }
            | EngineEvent::SessionAdopted { session, .. }
            | EngineEvent::SessionUpdated { session, .. }
            | EngineEvent::SessionPaused { session, .. }
            | EngineEvent::SessionResumed { session, .. }
            | EngineEvent::SessionEnded { session, .. } => Some(session),
            _ => None,
        }
    }
}
