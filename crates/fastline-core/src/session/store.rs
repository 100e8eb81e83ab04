//! Session store contract.
//!
//! The store itself is an external document database with push
//! subscriptions. The engine only needs the operations below.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::model::{Session, SessionPatch};
use crate::error::StoreError;

/// Push callback: receives the user's current `active|paused` session, or
/// `None` when there is none.
pub type PushCallback = Arc<dyn Fn(Option<Session>) + Send + Sync>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session and return its id.
    async fn create(&self, session: &Session) -> Result<String, StoreError>;

    async fn update(&self, id: &str, patch: &SessionPatch) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// One-shot query for the user's open session.
    async fn query_active_or_paused(&self, user_id: &str) -> Result<Option<Session>, StoreError>;

    /// Push subscription for the user's open session. The callback fires
    /// once with the current value and again after every change.
    fn subscribe_active_or_paused(
        &self,
        user_id: &str,
        callback: PushCallback,
    ) -> Result<Subscription, StoreError>;
}

/// Handle for an active push subscription. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
