//! Error classification for user messaging.
//!
//! Maps raw failures to a [`ClassifiedError`]: a coarse kind, a message the
//! UI can show as-is, a recoverability flag, and the affordance the UI should
//! offer (retry button, re-auth flow, inline input correction, ...).

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, RemoteCode, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    RemoteStore,
    Validation,
    Permission,
    Unknown,
}

/// What the UI should offer the user after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Show a retry affordance.
    Retry,
    /// Route to sign-in; retrying as-is will keep failing.
    Reauthenticate,
    /// Show the message inline at the input.
    CorrectInput,
    /// Start the consent/permission flow.
    RequestPermission,
    /// Nothing the user can do from the app.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub user_message: String,
    pub recoverable: bool,
    pub action: RecoveryAction,
}

impl ClassifiedError {
    fn new(kind: ErrorKind, user_message: &str, recoverable: bool, action: RecoveryAction) -> Self {
        Self {
            kind,
            user_message: user_message.to_string(),
            recoverable,
            action,
        }
    }
}

/// Classify a raw store failure.
///
/// Order matters: connectivity first, then store codes, then caller-tagged
/// validation, then explicit permission denial, then everything else.
pub fn classify(err: &StoreError) -> ClassifiedError {
    match err {
        StoreError::Offline | StoreError::Transport(_) => ClassifiedError::new(
            ErrorKind::Network,
            "You appear to be offline. Check your connection and try again.",
            true,
            RecoveryAction::Retry,
        ),
        StoreError::Remote { code, .. } => classify_remote(code),
        StoreError::Validation(message) => ClassifiedError {
            kind: ErrorKind::Validation,
            user_message: message.clone(),
            recoverable: true,
            action: RecoveryAction::CorrectInput,
        },
        StoreError::PermissionDenied(_) => ClassifiedError::new(
            ErrorKind::Permission,
            "Fastline doesn't have permission to do that.",
            false,
            RecoveryAction::RequestPermission,
        ),
        StoreError::Other(_) => ClassifiedError::new(
            ErrorKind::Unknown,
            "Something went wrong. Please try again.",
            true,
            RecoveryAction::Retry,
        ),
    }
}

fn classify_remote(code: &RemoteCode) -> ClassifiedError {
    let (message, recoverable, action) = match code {
        RemoteCode::PermissionDenied => (
            "You don't have access to this fast.",
            false,
            RecoveryAction::None,
        ),
        RemoteCode::Unauthenticated => (
            "Your session has expired. Please sign in again.",
            true,
            RecoveryAction::Reauthenticate,
        ),
        RemoteCode::Unavailable => (
            "The service is temporarily unavailable. Please try again shortly.",
            true,
            RecoveryAction::Retry,
        ),
        RemoteCode::ResourceExhausted => (
            "Too many requests right now. Please wait a moment and try again.",
            true,
            RecoveryAction::Retry,
        ),
        RemoteCode::InvalidArgument => (
            "The request was rejected as invalid.",
            true,
            RecoveryAction::CorrectInput,
        ),
        RemoteCode::NotFound => (
            "This fast no longer exists. It may have been ended on another device.",
            true,
            RecoveryAction::Retry,
        ),
        RemoteCode::Aborted
        | RemoteCode::DeadlineExceeded
        | RemoteCode::Internal
        | RemoteCode::Unknown(_) => (
            "Couldn't save your changes. Please try again.",
            true,
            RecoveryAction::Retry,
        ),
    };
    ClassifiedError::new(ErrorKind::RemoteStore, message, recoverable, action)
}

/// Default retry predicate for store calls.
///
/// `attempt` is the 1-based number of the attempt that just failed. Unknown
/// failures get exactly one extra attempt before being surfaced.
pub fn is_retryable(err: &StoreError, attempt: u32) -> bool {
    match err {
        StoreError::Offline | StoreError::Transport(_) => true,
        StoreError::Remote { code, .. } => !matches!(
            code,
            RemoteCode::PermissionDenied | RemoteCode::Unauthenticated | RemoteCode::InvalidArgument
        ),
        StoreError::Validation(_) | StoreError::PermissionDenied(_) => false,
        StoreError::Other(_) => attempt < 2,
    }
}

impl EngineError {
    /// User-facing classification of this failure.
    pub fn classification(&self) -> ClassifiedError {
        match self {
            EngineError::InvalidState(message) => ClassifiedError {
                kind: ErrorKind::Validation,
                user_message: message.clone(),
                recoverable: true,
                action: RecoveryAction::None,
            },
            EngineError::InvalidInput(err) => ClassifiedError {
                kind: ErrorKind::Validation,
                user_message: err.to_string(),
                recoverable: true,
                action: RecoveryAction::CorrectInput,
            },
            EngineError::Offline => classify(&StoreError::Offline),
            EngineError::Store(err) => classify(err),
        }
    }
}
