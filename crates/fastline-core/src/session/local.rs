//! In-process session store.
//!
//! Implements the [`SessionStore`] contract over a map, optionally persisted
//! to a JSON file after every write. Subscribers are notified synchronously
//! once the write has been applied, outside the internal lock.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::model::{Session, SessionPatch};
use super::store::{PushCallback, SessionStore, Subscription};
use crate::error::{RemoteCode, StoreError};

/// Store operation, for targeted failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Create,
    Update,
    Get,
    Query,
}

#[derive(Default)]
struct Inner {
    sessions: BTreeMap<String, Session>,
    subscribers: HashMap<u64, (String, PushCallback)>,
    next_subscriber: u64,
    failures: HashMap<StoreOp, Vec<StoreError>>,
    calls: HashMap<StoreOp, u32>,
}

impl Inner {
    fn open_session(&self, user_id: &str) -> Option<Session> {
        self.sessions
            .values()
            .filter(|s| s.user_id == user_id && s.status.is_open())
            .max_by_key(|s| s.start_time)
            .cloned()
    }

    fn callbacks_for(&self, user_id: &str) -> Vec<PushCallback> {
        self.subscribers
            .values()
            .filter(|(uid, _)| uid == user_id)
            .map(|(_, cb)| Arc::clone(cb))
            .collect()
    }

    fn take_failure(&mut self, op: StoreOp) -> Option<StoreError> {
        *self.calls.entry(op).or_insert(0) += 1;
        let queue = self.failures.get_mut(&op)?;
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }
}

#[derive(Clone, Default)]
pub struct LocalSessionStore {
    inner: Arc<Mutex<Inner>>,
    path: Option<PathBuf>,
}

impl LocalSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a JSON file. Loads existing sessions if the file exists.
    pub fn with_file(path: PathBuf) -> crate::error::Result<Self> {
        let mut inner = Inner::default();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            inner.sessions = serde_json::from_str(&content)?;
        }
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
            path: Some(path),
        })
    }

    /// Make the next `count` calls of `op` fail with `error`.
    pub fn inject_failures(&self, op: StoreOp, count: usize, error: StoreError) {
        let mut inner = self.lock();
        let queue = inner.failures.entry(op).or_default();
        queue.extend(std::iter::repeat(error).take(count));
    }

    /// Number of times `op` has been called, failed calls included.
    pub fn call_count(&self, op: StoreOp) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Every session of a user, oldest first.
    pub fn sessions_for(&self, user_id: &str) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .lock()
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.start_time);
        sessions
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, inner: &Inner) -> Result<(), StoreError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let data = serde_json::to_string_pretty(&inner.sessions)
            .map_err(|e| StoreError::Other(format!("failed to encode sessions: {e}")))?;
        std::fs::write(path, data)
            .map_err(|e| StoreError::Other(format!("failed to write {}: {e}", path.display())))
    }

    fn notify(user_id: &str, callbacks: Vec<PushCallback>, current: Option<Session>) {
        debug!(user_id, subscribers = callbacks.len(), "pushing session update");
        for callback in callbacks {
            callback(current.clone());
        }
    }
}

#[async_trait]
impl SessionStore for LocalSessionStore {
    async fn create(&self, session: &Session) -> Result<String, StoreError> {
        let (id, callbacks, current) = {
            let mut inner = self.lock();
            if let Some(err) = inner.take_failure(StoreOp::Create) {
                return Err(err);
            }
            let id = Uuid::new_v4().to_string();
            let mut stored = session.clone();
            stored.id = Some(id.clone());
            inner.sessions.insert(id.clone(), stored);
            if let Err(err) = self.persist(&inner) {
                inner.sessions.remove(&id);
                return Err(err);
            }
            (
                id,
                inner.callbacks_for(&session.user_id),
                inner.open_session(&session.user_id),
            )
        };
        Self::notify(&session.user_id, callbacks, current);
        Ok(id)
    }

    async fn update(&self, id: &str, patch: &SessionPatch) -> Result<(), StoreError> {
        let (user_id, callbacks, current) = {
            let mut inner = self.lock();
            if let Some(err) = inner.take_failure(StoreOp::Update) {
                return Err(err);
            }
            let session = inner
                .sessions
                .get_mut(id)
                .ok_or_else(|| StoreError::remote(RemoteCode::NotFound, format!("no session {id}")))?;
            let before = session.clone();
            session.apply(patch);
            let user_id = session.user_id.clone();
            if let Err(err) = self.persist(&inner) {
                inner.sessions.insert(id.to_string(), before);
                return Err(err);
            }
            (
                user_id.clone(),
                inner.callbacks_for(&user_id),
                inner.open_session(&user_id),
            )
        };
        Self::notify(&user_id, callbacks, current);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let mut inner = self.lock();
        if let Some(err) = inner.take_failure(StoreOp::Get) {
            return Err(err);
        }
        Ok(inner.sessions.get(id).cloned())
    }

    async fn query_active_or_paused(&self, user_id: &str) -> Result<Option<Session>, StoreError> {
        let mut inner = self.lock();
        if let Some(err) = inner.take_failure(StoreOp::Query) {
            return Err(err);
        }
        Ok(inner.open_session(user_id))
    }

    fn subscribe_active_or_paused(
        &self,
        user_id: &str,
        callback: PushCallback,
    ) -> Result<Subscription, StoreError> {
        let (key, current) = {
            let mut inner = self.lock();
            let key = inner.next_subscriber;
            inner.next_subscriber += 1;
            inner
                .subscribers
                .insert(key, (user_id.to_string(), Arc::clone(&callback)));
            (key, inner.open_session(user_id))
        };
        callback(current);

        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                let mut guard = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                guard.subscribers.remove(&key);
            }
        }))
    }
}
