//! Notification dispatch seam.
//!
//! The core only decides *when* and *which* milestone fires; permission
//! state and delivery belong to the host.

use std::sync::Mutex;

use tracing::info;

use crate::milestones::MilestoneEvent;

pub trait Notifier: Send + Sync {
    fn schedule_or_send(&self, event: &MilestoneEvent);
}

/// Writes every event to the log. Used by the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn schedule_or_send(&self, event: &MilestoneEvent) {
        info!(?event, "milestone");
    }
}

/// Keeps every dispatched event in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<MilestoneEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MilestoneEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl Notifier for RecordingNotifier {
    fn schedule_or_send(&self, event: &MilestoneEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
    }
}
