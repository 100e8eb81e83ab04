//! Client-side state machine for one user's fast.
//!
//! Local operations write through the [`SessionStore`] (with retry) and the
//! push subscription is the source of truth for what other devices did.
//! Shared state sits behind a `std::sync::Mutex` that is never held across an
//! `.await`; the store may deliver pushes synchronously from inside a write.
//!
//! ```text
//! NoSession --start--> Active --pause--> Paused --resume--> Active
//!     ^                  |                 |
//!     +----stop/stop_early/ended elsewhere-+
//! ```

mod state;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::{BackgroundBridge, BackgroundLink, BridgeEvent, BridgeStatus, LinkSignal};
use crate::clock::{self, Clock};
use crate::error::{EngineError, RemoteCode, StoreError, ValidationError};
use crate::events::{EndReason, EngineEvent};
use crate::history::HistoryService;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::session::{
    hours_between, validate_planned_hours, PushCallback, Session, SessionPatch, SessionStatus,
    SessionStore, Subscription, WaterEntry,
};

pub use state::{EngineSnapshot, FastState};
use state::{OptimisticWater, PendingGuard, PendingOp, Shared};

const EVENT_CAPACITY: usize = 64;
const MAX_WATER_NOTE_CHARS: usize = 280;

/// Collaborators the engine talks to.
pub struct EngineDeps {
    pub store: Arc<dyn SessionStore>,
    pub bridge: Arc<dyn BackgroundBridge>,
    pub history: Arc<dyn HistoryService>,
    pub clock: Arc<dyn Clock>,
    pub connectivity: watch::Receiver<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub retry: RetryConfig,
    /// Attempt budget for session creation.
    pub start_max_attempts: u32,
    pub max_water_entry_ml: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            start_max_attempts: 3,
            max_water_entry_ml: 5000,
        }
    }
}

struct Inner {
    user_id: String,
    store: Arc<dyn SessionStore>,
    history: Arc<dyn HistoryService>,
    clock: Arc<dyn Clock>,
    connectivity: watch::Receiver<bool>,
    settings: EngineSettings,
    retry: RetryPolicy<StoreError>,
    link: BackgroundLink,
    shared: Mutex<Shared>,
    events: broadcast::Sender<EngineEvent>,
    subscription: Mutex<Option<Subscription>>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionEngine {
    inner: Arc<Inner>,
}

impl fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEngine")
            .field("user_id", &self.inner.user_id)
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl SessionEngine {
    pub fn new(user_id: impl Into<String>, deps: EngineDeps, settings: EngineSettings) -> Self {
        let retry = RetryPolicy::for_store(settings.retry.clone());
        Self::with_retry(user_id, deps, settings, retry)
    }

    /// Like [`SessionEngine::new`] with an explicit retry policy.
    pub fn with_retry(
        user_id: impl Into<String>,
        deps: EngineDeps,
        settings: EngineSettings,
        retry: RetryPolicy<StoreError>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                user_id: user_id.into(),
                store: deps.store,
                history: deps.history,
                clock: deps.clock,
                connectivity: deps.connectivity,
                settings,
                retry,
                link: BackgroundLink::new(deps.bridge),
                shared: Mutex::new(Shared::default()),
                events,
                subscription: Mutex::new(None),
            }),
        }
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        state::lock(&self.inner.shared)
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    fn emit(&self, event: EngineEvent) {
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }

    fn ensure_online(&self) -> Result<(), EngineError> {
        if *self.inner.connectivity.borrow() {
            Ok(())
        } else {
            Err(EngineError::Offline)
        }
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.shared().current.clone()
    }

    pub fn state(&self) -> FastState {
        FastState::of(self.shared().current.as_ref())
    }

    pub fn is_online(&self) -> bool {
        *self.inner.connectivity.borrow()
    }

    /// Confirmed water of the current fast plus in-flight amounts.
    pub fn water_total_ml(&self) -> u64 {
        self.shared().water_total_ml()
    }

    /// Wall-clock elapsed time of the current fast; 0 without one.
    pub fn elapsed_seconds(&self) -> u64 {
        let now = self.now();
        self.shared()
            .current
            .as_ref()
            .map_or(0, |s| clock::elapsed_seconds(s, now))
    }

    pub fn bridge_status(&self) -> BridgeStatus {
        self.inner.link.status()
    }

    /// Background timer is running and heard from within `timeout`.
    pub fn bridge_alive(&self, timeout: chrono::Duration) -> bool {
        self.inner.link.is_alive(self.now(), timeout)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let now = self.now();
        let bridge = self.inner.link.status();
        let online = self.is_online();
        let shared = self.shared();
        EngineSnapshot {
            user_id: self.inner.user_id.clone(),
            state: FastState::of(shared.current.as_ref()),
            session: shared.current.clone(),
            elapsed_seconds: shared
                .current
                .as_ref()
                .map_or(0, |s| clock::elapsed_seconds(s, now)),
            water_total_ml: shared.water_total_ml(),
            pending_water_ml: shared.optimistic_water_ml,
            online,
            bridge,
            at: now,
        }
    }

    // ── Operations ─────────────────────────────────────────────────────

    /// Start a new fast. Returns the id assigned by the store.
    pub async fn start(&self, planned_hours: u32) -> Result<String, EngineError> {
        let seq = {
            let mut shared = self.shared();
            if shared.pending.is_some() {
                return Err(EngineError::InvalidState(
                    "another start or stop is in flight".into(),
                ));
            }
            if shared.current.is_some() {
                return Err(EngineError::InvalidState("a fast is already in progress".into()));
            }
            validate_planned_hours(planned_hours)?;
            self.ensure_online()?;
            shared.pending = Some(PendingOp::Starting);
            shared.push_seq
        };
        let pending = PendingGuard::new(&self.inner.shared);

        let store = &self.inner.store;
        let user_id = self.inner.user_id.as_str();

        // The subscription may not have delivered yet (fresh launch).
        let existing = self
            .inner
            .retry
            .run("query_active_or_paused", || store.query_active_or_paused(user_id))
            .await?;
        if let Some(existing) = existing {
            drop(pending);
            info!(user_id, "open fast found while starting; adopting it");
            self.apply_push(Some(existing));
            return Err(EngineError::InvalidState("a fast is already in progress".into()));
        }

        let now = self.now();
        let mut session = Session::begin(user_id, planned_hours, now)?;
        let created = self
            .inner
            .retry
            .clone()
            .with_max_attempts(self.inner.settings.start_max_attempts)
            .run("create", || store.create(&session))
            .await;
        let id = match created {
            Ok(id) => id,
            Err(err) => {
                drop(pending);
                // Pushes that arrived during the attempts were held back.
                if let Some(held) = self.current_session() {
                    self.announce_adopted(held, self.now());
                }
                return Err(err.into());
            }
        };
        session.id = Some(id.clone());

        let (session, held_other) = {
            let mut shared = self.shared();
            if shared.push_seq == seq {
                shared.current = Some(session.clone());
            }
            match &shared.current {
                Some(current) if current.same_fast(&session) => (current.clone(), None),
                Some(other) => (session, Some(other.clone())),
                None => (session, None),
            }
        };
        drop(pending);

        if let Some(other) = held_other {
            warn!(
                user_id,
                session_id = %id,
                held = ?other.id,
                "another device started a fast during create; keeping theirs"
            );
            self.announce_adopted(other, now);
            return Ok(id);
        }

        info!(user_id, session_id = %id, planned_hours, "fast started");
        if !self.inner.link.start(&session, now) {
            warn!(session_id = %id, "background tracking unavailable; timing is foreground-only");
            self.emit(EngineEvent::BridgeDegraded {
                session_id: id.clone(),
                at: now,
            });
        }
        self.emit(EngineEvent::SessionStarted { session, at: now });
        Ok(id)
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        let (session, seq) = self.begin_transition(SessionStatus::Active, "pause")?;
        let id = persisted_id(&session)?;
        let now = self.now();
        let patch = SessionPatch::pause(now);

        let store = &self.inner.store;
        self.inner
            .retry
            .run("pause", || store.update(&id, &patch))
            .await?;

        let session = self
            .apply_confirmed(&id, &patch, seq)
            .unwrap_or_else(|| patched(session, &patch));
        info!(session_id = %id, "fast paused");
        self.emit(EngineEvent::SessionPaused { session, at: now });
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), EngineError> {
        let (session, seq) = self.begin_transition(SessionStatus::Paused, "resume")?;
        let id = persisted_id(&session)?;
        let now = self.now();
        let paused_ms = session.paused_duration(now).num_milliseconds();
        let patch = SessionPatch::resume(paused_ms);

        let store = &self.inner.store;
        self.inner
            .retry
            .run("resume", || store.update(&id, &patch))
            .await?;

        let session = self
            .apply_confirmed(&id, &patch, seq)
            .unwrap_or_else(|| patched(session, &patch));
        info!(session_id = %id, paused_ms, "fast resumed");
        self.emit(EngineEvent::SessionResumed { session, at: now });
        Ok(())
    }

    /// End the current fast as `completed`. Returns the final record.
    pub async fn stop(&self) -> Result<Session, EngineError> {
        self.finish(SessionStatus::Completed, EndReason::Local).await
    }

    /// End the current fast as `stopped_early`.
    pub async fn stop_early(&self) -> Result<Session, EngineError> {
        self.finish(SessionStatus::StoppedEarly, EndReason::Local).await
    }

    /// Log water for the current fast. The amount counts towards
    /// [`SessionEngine::water_total_ml`] immediately and is withdrawn if the
    /// write fails.
    pub async fn add_water(&self, amount_ml: u32, note: Option<String>) -> Result<(), EngineError> {
        let max_ml = self.inner.settings.max_water_entry_ml;
        if amount_ml == 0 || amount_ml > max_ml {
            return Err(ValidationError::WaterAmountOutOfRange { amount_ml, max_ml }.into());
        }
        if note.as_ref().is_some_and(|n| n.chars().count() > MAX_WATER_NOTE_CHARS) {
            return Err(ValidationError::InvalidValue {
                field: "note".into(),
                message: format!("at most {MAX_WATER_NOTE_CHARS} characters"),
            }
            .into());
        }

        let (id, seq) = {
            let mut shared = self.shared();
            let Some(session) = shared.current.as_ref() else {
                return Err(EngineError::InvalidState("no fast in progress".into()));
            };
            let id = persisted_id(session)?;
            self.ensure_online()?;
            shared.optimistic_water_ml += u64::from(amount_ml);
            (id, shared.push_seq)
        };
        let optimistic = OptimisticWater::new(&self.inner.shared, u64::from(amount_ml));

        let result = self.append_water(&id, amount_ml, note).await;
        drop(optimistic);
        let now = self.now();

        match result {
            Ok(patch) => {
                self.apply_confirmed(&id, &patch, seq);
                let total_ml = self.water_total_ml();
                debug!(session_id = %id, amount_ml, total_ml, "water logged");
                self.emit(EngineEvent::WaterLogged {
                    session_id: id,
                    amount_ml,
                    total_ml,
                    at: now,
                });
                Ok(())
            }
            Err(err) => {
                let total_ml = self.water_total_ml();
                warn!(session_id = %id, amount_ml, error = %err, "water entry rolled back");
                self.emit(EngineEvent::WaterRolledBack {
                    session_id: id,
                    amount_ml,
                    total_ml,
                    at: now,
                });
                Err(err.into())
            }
        }
    }

    /// Re-read the open session from the store and apply it like a push.
    pub async fn refresh(&self) -> Result<Option<Session>, EngineError> {
        let store = &self.inner.store;
        let user_id = self.inner.user_id.as_str();
        let latest = self
            .inner
            .retry
            .run("query_active_or_paused", || store.query_active_or_paused(user_id))
            .await?;
        self.apply_push(latest.clone());
        Ok(latest)
    }

    /// Subscribe to the store's push updates for this user. Replaces an
    /// earlier subscription.
    pub fn attach(&self) -> Result<(), EngineError> {
        let weak = Arc::downgrade(&self.inner);
        let callback: PushCallback = Arc::new(move |update| {
            if let Some(inner) = weak.upgrade() {
                SessionEngine { inner }.apply_push(update);
            }
        });
        let subscription = self
            .inner
            .store
            .subscribe_active_or_paused(&self.inner.user_id, callback)?;
        let previous = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(subscription);
        drop(previous);
        debug!(user_id = %self.inner.user_id, "attached to session subscription");
        Ok(())
    }

    pub fn detach(&self) {
        let subscription = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
            debug!(user_id = %self.inner.user_id, "detached from session subscription");
        }
    }

    /// Refresh from the store whenever connectivity comes back. The task
    /// ends when the connectivity sender is dropped.
    pub fn spawn_connectivity_watch(&self) -> JoinHandle<()> {
        let engine = self.clone();
        let mut rx = self.inner.connectivity.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                engine.emit(EngineEvent::ConnectivityChanged {
                    online,
                    at: engine.now(),
                });
                if !online {
                    info!("device offline; writes are rejected until reconnect");
                    continue;
                }
                info!("back online; refreshing session");
                if let Err(err) = engine.refresh().await {
                    warn!(error = %err, "refresh after reconnect failed");
                }
            }
            debug!("connectivity signal closed");
        })
    }

    /// Apply a push from the subscription (or a one-shot query result).
    /// Anything that is not an open session of this user counts as `None`.
    pub fn apply_push(&self, update: Option<Session>) {
        let update = update.filter(|s| s.status.is_open() && s.user_id == self.inner.user_id);
        let now = self.now();

        let event = {
            let mut shared = self.shared();
            shared.push_seq += 1;
            let starting = shared.pending == Some(PendingOp::Starting);
            let stopping = shared.pending == Some(PendingOp::Stopping);
            let previous = shared.current.take();
            shared.current = update.clone();

            match (previous, update) {
                (None, None) => None,
                // start() reports its own session once the create returns.
                (None, Some(_)) if starting => None,
                (None, Some(session)) => Some(EngineEvent::SessionAdopted { session, at: now }),
                (Some(previous), Some(session)) if previous.same_fast(&session) => {
                    (previous != session).then_some(EngineEvent::SessionUpdated { session, at: now })
                }
                (Some(_), Some(session)) => Some(EngineEvent::SessionAdopted { session, at: now }),
                (Some(previous), None) if stopping => {
                    debug!("no open fast while stopping");
                    shared.vanished_while_stopping = Some(previous);
                    None
                }
                (Some(previous), None) => {
                    shared.optimistic_water_ml = 0;
                    Some(EngineEvent::SessionEnded {
                        session: previous,
                        reason: EndReason::EndedElsewhere,
                        at: now,
                    })
                }
            }
        };

        match event {
            Some(EngineEvent::SessionEnded { session, reason, at }) => {
                info!(user_id = %self.inner.user_id, "fast ended on another device");
                self.inner.link.stop(&self.inner.user_id);
                self.emit(EngineEvent::SessionEnded { session, reason, at });
            }
            Some(EngineEvent::SessionAdopted { session, at }) => self.announce_adopted(session, at),
            Some(event) => self.emit(event),
            None => {}
        }
    }

    /// Feed an event from the background bridge.
    pub async fn handle_bridge_event(&self, event: BridgeEvent) -> Result<(), EngineError> {
        match self.inner.link.handle_event(&event, self.now()) {
            LinkSignal::None => Ok(()),
            LinkSignal::ExternalStop => self.end_from_background().await,
        }
    }

    // ── Internals ──────────────────────────────────────────────────────

    /// Emit `SessionAdopted` and make sure the background link tracks it.
    fn announce_adopted(&self, session: Session, at: DateTime<Utc>) {
        info!(session_id = ?session.id, "adopted open fast");
        let tracked = match self.inner.link.status() {
            BridgeStatus::Running { session_id, .. } => {
                session.id.as_deref() == Some(session_id.as_str())
            }
            _ => false,
        };
        if !tracked {
            self.inner.link.start(&session, at);
        }
        self.emit(EngineEvent::SessionAdopted { session, at });
    }

    fn begin_transition(
        &self,
        expected: SessionStatus,
        operation: &str,
    ) -> Result<(Session, u64), EngineError> {
        let shared = self.shared();
        if shared.pending.is_some() {
            return Err(EngineError::InvalidState(format!(
                "cannot {operation} while a start or stop is in flight"
            )));
        }
        let Some(session) = shared.current.clone() else {
            return Err(EngineError::InvalidState(format!(
                "cannot {operation}: no fast in progress"
            )));
        };
        if session.status != expected {
            return Err(EngineError::InvalidState(format!(
                "cannot {operation} a {:?} fast",
                session.status
            )));
        }
        self.ensure_online()?;
        Ok((session, shared.push_seq))
    }

    /// Apply a confirmed local write unless a push arrived since the write
    /// began; the push is fresher. Returns the current session if it is
    /// still the one written to.
    fn apply_confirmed(&self, id: &str, patch: &SessionPatch, seq: u64) -> Option<Session> {
        let mut shared = self.shared();
        let fresh = shared.push_seq == seq;
        let current = shared
            .current
            .as_mut()
            .filter(|c| c.id.as_deref() == Some(id))?;
        if fresh {
            current.apply(patch);
        }
        Some(current.clone())
    }

    async fn finish(&self, status: SessionStatus, reason: EndReason) -> Result<Session, EngineError> {
        let session = {
            let mut shared = self.shared();
            if shared.pending.is_some() {
                return Err(EngineError::InvalidState(
                    "a start or stop is already in flight".into(),
                ));
            }
            let Some(session) = shared.current.clone() else {
                return Err(EngineError::InvalidState("no fast in progress".into()));
            };
            self.ensure_online()?;
            shared.pending = Some(PendingOp::Stopping);
            shared.vanished_while_stopping = None;
            session
        };
        let pending = PendingGuard::new(&self.inner.shared);

        let id = persisted_id(&session)?;
        let end_time = self.now().max(session.start_time);
        let paused_ms = session.paused_duration(end_time).num_milliseconds();
        let actual_hours = hours_between(session.start_time, end_time);
        let patch = SessionPatch::finish(status, end_time, actual_hours, paused_ms);

        let store = &self.inner.store;
        let written = self
            .inner
            .retry
            .run("stop", || store.update(&id, &patch))
            .await;
        if let Err(err) = written {
            let vanished = {
                let mut shared = self.shared();
                let vanished = shared.vanished_while_stopping.take();
                if vanished.is_some() {
                    shared.optimistic_water_ml = 0;
                }
                vanished
            };
            drop(pending);
            // Our write failed, so the fast was ended by someone else.
            if let Some(previous) = vanished {
                info!(session_id = %id, error = %err, "fast ended on another device while stopping");
                self.inner.link.stop(&self.inner.user_id);
                self.emit(EngineEvent::SessionEnded {
                    session: previous,
                    reason: EndReason::EndedElsewhere,
                    at: self.now(),
                });
            }
            return Err(err.into());
        }

        let ended = patched(session, &patch);
        {
            let mut shared = self.shared();
            if shared.current.as_ref().is_some_and(|c| c.same_fast(&ended)) {
                shared.current = None;
            }
            shared.optimistic_water_ml = 0;
            shared.vanished_while_stopping = None;
        }
        drop(pending);

        self.inner.link.stop(&self.inner.user_id);
        self.spawn_history_recompute();
        info!(session_id = %id, ?status, actual_hours, "fast ended");
        self.emit(EngineEvent::SessionEnded {
            session: ended.clone(),
            reason,
            at: end_time,
        });
        Ok(ended)
    }

    async fn append_water(
        &self,
        id: &str,
        amount_ml: u32,
        note: Option<String>,
    ) -> Result<SessionPatch, StoreError> {
        let store = &self.inner.store;
        // Read-then-append; concurrent writers can still lose an entry.
        let latest = self
            .inner
            .retry
            .run("get", || store.get(id))
            .await?
            .ok_or_else(|| StoreError::remote(RemoteCode::NotFound, format!("session {id} not found")))?;

        let timestamp = self.now().max(latest.start_time);
        let mut water_log = latest.water_log;
        water_log.push(WaterEntry {
            timestamp,
            amount_ml,
            note,
        });
        water_log.sort_by_key(|entry| entry.timestamp);
        let patch = SessionPatch::water(water_log);

        self.inner
            .retry
            .run("add_water", || store.update(id, &patch))
            .await?;
        Ok(patch)
    }

    async fn end_from_background(&self) -> Result<(), EngineError> {
        let store = &self.inner.store;
        let user_id = self.inner.user_id.as_str();
        let latest = self
            .inner
            .retry
            .run("query_active_or_paused", || store.query_active_or_paused(user_id))
            .await?;

        if let Some(open) = latest {
            self.apply_push(Some(open));
            return self
                .finish(SessionStatus::Completed, EndReason::Background)
                .await
                .map(|_| ());
        }

        // The background side already wrote the end.
        let previous = {
            let mut shared = self.shared();
            if shared.pending == Some(PendingOp::Stopping) {
                None
            } else {
                shared.push_seq += 1;
                shared.optimistic_water_ml = 0;
                shared.current.take()
            }
        };
        let Some(previous) = previous else {
            return Ok(());
        };

        let session = match previous.id.clone() {
            Some(id) => match self.inner.retry.run("get", || store.get(&id)).await {
                Ok(Some(stored)) if stored.status.is_terminal() => stored,
                Ok(_) => previous,
                Err(err) => {
                    warn!(session_id = %id, error = %err, "could not load final record");
                    previous
                }
            },
            None => previous,
        };
        info!(user_id, "fast ended in background");
        self.emit(EngineEvent::SessionEnded {
            session,
            reason: EndReason::Background,
            at: self.now(),
        });
        Ok(())
    }

    fn spawn_history_recompute(&self) {
        let history = Arc::clone(&self.inner.history);
        let user_id = self.inner.user_id.clone();
        tokio::spawn(async move {
            if let Err(err) = history.recompute(&user_id).await {
                warn!(user_id, error = %err, "history recompute failed");
            }
        });
    }
}

fn patched(mut session: Session, patch: &SessionPatch) -> Session {
    session.apply(patch);
    session
}

fn persisted_id(session: &Session) -> Result<String, EngineError> {
    session
        .id
        .clone()
        .ok_or_else(|| EngineError::InvalidState("session has not been persisted yet".into()))
}
