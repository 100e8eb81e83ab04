//! Core error types for fastline-core.
//!
//! Raw collaborator failures are [`StoreError`]s; the engine wraps them (and
//! its own precondition failures) in [`EngineError`]. Turning any of these into
//! something a user can act on is the job of [`crate::classify`].

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for fastline-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Session engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Session store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Error codes reported by the remote document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCode {
    PermissionDenied,
    Unauthenticated,
    Unavailable,
    /// Quota exceeded.
    ResourceExhausted,
    NotFound,
    InvalidArgument,
    Aborted,
    DeadlineExceeded,
    Internal,
    Unknown(String),
}

impl RemoteCode {
    /// Parse a wire code such as `"permission-denied"`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "permission-denied" => RemoteCode::PermissionDenied,
            "unauthenticated" => RemoteCode::Unauthenticated,
            "unavailable" => RemoteCode::Unavailable,
            "resource-exhausted" | "quota-exceeded" => RemoteCode::ResourceExhausted,
            "not-found" => RemoteCode::NotFound,
            "invalid-argument" => RemoteCode::InvalidArgument,
            "aborted" => RemoteCode::Aborted,
            "deadline-exceeded" => RemoteCode::DeadlineExceeded,
            "internal" => RemoteCode::Internal,
            other => RemoteCode::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RemoteCode::PermissionDenied => "permission-denied",
            RemoteCode::Unauthenticated => "unauthenticated",
            RemoteCode::Unavailable => "unavailable",
            RemoteCode::ResourceExhausted => "resource-exhausted",
            RemoteCode::NotFound => "not-found",
            RemoteCode::InvalidArgument => "invalid-argument",
            RemoteCode::Aborted => "aborted",
            RemoteCode::DeadlineExceeded => "deadline-exceeded",
            RemoteCode::Internal => "internal",
            RemoteCode::Unknown(code) => code,
        }
    }
}

impl fmt::Display for RemoteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw failures from the session store and other remote collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Connectivity was lost before the request left the device
    #[error("Device is offline")]
    Offline,

    /// Transport-level failure (timeout, reset, DNS)
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The store answered with an error code
    #[error("Remote store error ({code}): {message}")]
    Remote { code: RemoteCode, message: String },

    /// The caller tagged the request as invalid before sending it
    #[error("Rejected as invalid: {0}")]
    Validation(String),

    /// An explicit permission denial outside the store's own codes
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn remote(code: RemoteCode, message: impl Into<String>) -> Self {
        StoreError::Remote {
            code,
            message: message.into(),
        }
    }
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Planned duration outside 1..=168 hours
    #[error("Planned duration must be between 1 and 168 hours, got {hours}")]
    PlannedHoursOutOfRange { hours: u32 },

    /// Water amount outside the accepted range
    #[error("Water amount must be between 1 and {max_ml} ml, got {amount_ml}")]
    WaterAmountOutOfRange { amount_ml: u32, max_ml: u32 },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Errors surfaced by session engine operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The operation does not apply to the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Input rejected before any write
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    /// Connectivity signal reports offline; nothing was written
    #[error("Device is offline")]
    Offline,

    /// The store rejected or failed the write after retries
    #[error("{0}")]
    Store(#[from] StoreError),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
