//! # Fastline Core Library
//!
//! This library provides the client-side engine for Fastline, a fasting
//! tracker whose sessions live in a shared document store and are edited from
//! several devices at once. The CLI and any GUI shell are thin layers over
//! the same core.
//!
//! ## Architecture
//!
//! - **Session engine**: state machine for the current fast; writes go to the
//!   store with bounded retry, push updates from other devices are applied as
//!   they arrive
//! - **Wall-clock timing**: elapsed time is always recomputed from the
//!   session's start time, never accumulated from ticks
//! - **Fast monitor**: evaluates phase, goal and record milestones and hands
//!   them to a [`Notifier`]
//! - **Background link**: keeps a host-side timer alive while the UI sleeps
//! - **Storage**: TOML configuration and a JSON-file session store
//!
//! ## Key Components
//!
//! - [`SessionEngine`]: start/pause/resume/stop and water logging
//! - [`SessionStore`]: contract for the remote store, [`LocalSessionStore`]
//!   is the in-process implementation
//! - [`FastMonitor`]: milestone evaluation loop
//! - [`Config`]: application configuration management

pub mod bridge;
pub mod classify;
pub mod clock;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod milestones;
pub mod monitor;
pub mod notify;
pub mod retry;
pub mod session;
pub mod storage;

pub use bridge::{
    BackgroundBridge, BackgroundLink, BridgeEvent, BridgeStatus, ForegroundOnlyBridge,
    RecordingBridge, SessionDescriptor,
};
pub use classify::{classify, is_retryable, ClassifiedError, ErrorKind, RecoveryAction};
pub use clock::{elapsed_hours, elapsed_seconds, Clock, ElapsedTracker, ManualClock, SystemClock};
pub use connectivity::Connectivity;
pub use engine::{EngineDeps, EngineSettings, EngineSnapshot, FastState, SessionEngine};
pub use error::{ConfigError, CoreError, EngineError, RemoteCode, StoreError, ValidationError};
pub use events::{EndReason, EngineEvent};
pub use history::{HistoryService, HistorySummary, NoopHistory, StoreHistory};
pub use milestones::{CompletionTier, MilestoneEvent, MilestoneTracker, Phase};
pub use monitor::{spawn_monitor, FastMonitor, MonitorSettings};
pub use notify::{LogNotifier, Notifier, RecordingNotifier};
pub use retry::{RecordingSleeper, RetryConfig, RetryPolicy, Sleeper, TokioSleeper};
pub use session::{
    LocalSessionStore, Session, SessionPatch, SessionStatus, SessionStore, StoreOp, Subscription,
    WaterEntry,
};
pub use storage::{data_dir, Config};
