//! Background persistence bridge.
//!
//! The host (service worker, OS background task) keeps a timer alive while
//! the foreground UI is suspended. The core only starts and stops it and
//! listens to what it reports back; the bridge keeps its own timer state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::session::Session;

/// What the host needs to keep timing a fast on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_id: String,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    pub planned_duration_hours: u32,
}

impl SessionDescriptor {
    /// `None` for sessions the store has not assigned an id yet.
    pub fn from_session(session: &Session) -> Option<Self> {
        Some(Self {
            session_id: session.id.clone()?,
            user_id: session.user_id.clone(),
            start_time: session.start_time,
            planned_duration_hours: session.planned_duration_hours,
        })
    }
}

/// Events the host delivers asynchronously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    Started {
        session_id: String,
    },
    Stopped {
        user_id: String,
    },
    /// The fast was ended from outside the app, e.g. a notification action.
    StoppedFromExternalAction {
        user_id: String,
    },
    Heartbeat {
        session_id: String,
        elapsed_seconds: u64,
    },
}

pub trait BackgroundBridge: Send + Sync {
    /// Returns whether the host accepted the request.
    fn start(&self, descriptor: &SessionDescriptor) -> bool;
    fn stop(&self, user_id: &str) -> bool;
}

/// Host without background execution. Every start is refused, which the
/// link reports as degraded foreground-only timing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForegroundOnlyBridge;

impl BackgroundBridge for ForegroundOnlyBridge {
    fn start(&self, _descriptor: &SessionDescriptor) -> bool {
        false
    }

    fn stop(&self, _user_id: &str) -> bool {
        true
    }
}

/// Bridge that records calls; `set_accepting(false)` makes starts fail.
#[derive(Debug)]
pub struct RecordingBridge {
    accepting: AtomicBool,
    started: Mutex<Vec<SessionDescriptor>>,
    stopped: Mutex<Vec<String>>,
}

impl Default for RecordingBridge {
    fn default() -> Self {
        Self {
            accepting: AtomicBool::new(true),
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn started(&self) -> Vec<SessionDescriptor> {
        self.started.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl BackgroundBridge for RecordingBridge {
    fn start(&self, descriptor: &SessionDescriptor) -> bool {
        self.started
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(descriptor.clone());
        self.accepting.load(Ordering::SeqCst)
    }

    fn stop(&self, user_id: &str) -> bool {
        self.stopped
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(user_id.to_string());
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BridgeStatus {
    Idle,
    /// Start requested and accepted; `confirmed` once the host says so.
    Running {
        session_id: String,
        since: DateTime<Utc>,
        confirmed: bool,
    },
    /// Host refused; timing is foreground-only for this session.
    Degraded {
        session_id: String,
    },
}

/// What the engine has to do after a bridge event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSignal {
    None,
    /// Background ended the fast; the engine must align with the store.
    ExternalStop,
}

#[derive(Debug)]
struct LinkState {
    status: BridgeStatus,
    last_heartbeat: Option<DateTime<Utc>>,
    background_elapsed_seconds: Option<u64>,
}

/// Core-side adapter around the host bridge.
pub struct BackgroundLink {
    bridge: Arc<dyn BackgroundBridge>,
    state: Mutex<LinkState>,
}

impl BackgroundLink {
    pub fn new(bridge: Arc<dyn BackgroundBridge>) -> Self {
        Self {
            bridge,
            state: Mutex::new(LinkState {
                status: BridgeStatus::Idle,
                last_heartbeat: None,
                background_elapsed_seconds: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Ask the host to track `session`. A refusal is not an error: the fast
    /// continues with foreground-only timing.
    pub fn start(&self, session: &Session, now: DateTime<Utc>) -> bool {
        let Some(descriptor) = SessionDescriptor::from_session(session) else {
            warn!("cannot start background tracking for a session without id");
            return false;
        };
        let accepted = self.bridge.start(&descriptor);
        let mut state = self.state();
        state.last_heartbeat = None;
        state.background_elapsed_seconds = None;
        if accepted {
            info!(session_id = %descriptor.session_id, "background tracking started");
            state.status = BridgeStatus::Running {
                session_id: descriptor.session_id,
                since: now,
                confirmed: false,
            };
        } else {
            info!(session_id = %descriptor.session_id, "background bridge refused start");
            state.status = BridgeStatus::Degraded {
                session_id: descriptor.session_id,
            };
        }
        accepted
    }

    pub fn stop(&self, user_id: &str) -> bool {
        let accepted = self.bridge.stop(user_id);
        if !accepted {
            warn!(user_id, "background bridge refused stop");
        }
        let mut state = self.state();
        state.status = BridgeStatus::Idle;
        state.last_heartbeat = None;
        state.background_elapsed_seconds = None;
        accepted
    }

    pub fn handle_event(&self, event: &BridgeEvent, now: DateTime<Utc>) -> LinkSignal {
        let mut state = self.state();
        match event {
            BridgeEvent::Started { session_id } => {
                let since = match &state.status {
                    BridgeStatus::Running { session_id: current, since, .. } if current == session_id => *since,
                    _ => now,
                };
                state.status = BridgeStatus::Running {
                    session_id: session_id.clone(),
                    since,
                    confirmed: true,
                };
                state.last_heartbeat = Some(now);
                LinkSignal::None
            }
            BridgeEvent::Heartbeat {
                session_id,
                elapsed_seconds,
            } => {
                match &state.status {
                    BridgeStatus::Running { session_id: current, .. } if current == session_id => {
                        state.last_heartbeat = Some(now);
                        state.background_elapsed_seconds = Some(*elapsed_seconds);
                    }
                    other => debug!(?other, session_id, "ignoring heartbeat for untracked session"),
                }
                LinkSignal::None
            }
            BridgeEvent::Stopped { user_id } => {
                debug!(user_id, "background tracking stopped");
                state.status = BridgeStatus::Idle;
                state.last_heartbeat = None;
                LinkSignal::None
            }
            BridgeEvent::StoppedFromExternalAction { user_id } => {
                info!(user_id, "fast ended from background action");
                state.status = BridgeStatus::Idle;
                state.last_heartbeat = None;
                LinkSignal::ExternalStop
            }
        }
    }

    pub fn status(&self) -> BridgeStatus {
        self.state().status.clone()
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.state().last_heartbeat
    }

    /// Elapsed seconds last reported by the host, if any.
    pub fn background_elapsed_seconds(&self) -> Option<u64> {
        self.state().background_elapsed_seconds
    }

    /// Running and heard from within `timeout` (counting from the start
    /// request until the first heartbeat arrives).
    pub fn is_alive(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let state = self.state();
        match &state.status {
            BridgeStatus::Running { since, .. } => {
                let last = state.last_heartbeat.unwrap_or(*since);
                now - last <= timeout
            }
            BridgeStatus::Idle | BridgeStatus::Degraded { .. } => false,
        }
    }
}
