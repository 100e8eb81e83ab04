//! Milestone tracking for a single fast.
//!
//! Pure in-memory bookkeeping: each method returns the events that fired and
//! never fires the same thing twice for one session. Dispatching the events
//! is up to the caller (see [`crate::monitor`]).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Hour thresholds with a biological-phase meaning.
pub const DEFAULT_THRESHOLDS_HOURS: [u32; 8] = [6, 12, 16, 18, 24, 36, 48, 72];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    GlycogenDepletion,
    KetosisOnset,
    FatBurning,
    DeepKetosis,
    Autophagy,
    DeepAutophagy,
    GrowthHormonePeak,
    ImmuneRegeneration,
    /// The user's own planned duration, when it is not a phase boundary.
    PlannedGoal,
}

impl Phase {
    pub fn for_hours(hours: u32) -> Phase {
        match hours {
            6 => Phase::GlycogenDepletion,
            12 => Phase::KetosisOnset,
            16 => Phase::FatBurning,
            18 => Phase::DeepKetosis,
            24 => Phase::Autophagy,
            36 => Phase::DeepAutophagy,
            48 => Phase::GrowthHormonePeak,
            72 => Phase::ImmuneRegeneration,
            _ => Phase::PlannedGoal,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Phase::GlycogenDepletion => "Glycogen stores running low",
            Phase::KetosisOnset => "Ketosis is starting",
            Phase::FatBurning => "Fat-burning zone",
            Phase::DeepKetosis => "Deep ketosis",
            Phase::Autophagy => "Autophagy ramping up",
            Phase::DeepAutophagy => "Deep autophagy",
            Phase::GrowthHormonePeak => "Growth hormone peak",
            Phase::ImmuneRegeneration => "Immune system regeneration",
            Phase::PlannedGoal => "Planned duration reached",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionTier {
    /// 100% or more of the plan.
    Full,
    /// 80% or more.
    Strong,
    /// 50% or more.
    Partial,
    None,
}

impl CompletionTier {
    pub fn classify(actual_hours: f64, target_hours: f64) -> Self {
        if !(target_hours > 0.0) || !actual_hours.is_finite() {
            return CompletionTier::None;
        }
        let ratio = actual_hours / target_hours;
        if ratio >= 1.0 {
            CompletionTier::Full
        } else if ratio >= 0.8 {
            CompletionTier::Strong
        } else if ratio >= 0.5 {
            CompletionTier::Partial
        } else {
            CompletionTier::None
        }
    }
}

/// Something worth celebrating. Handed to the notifier as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MilestoneEvent {
    PhaseReached {
        hours: u32,
        phase: Phase,
    },
    GoalReached {
        target_hours: u32,
        current_hours: f64,
    },
    PersonalRecord {
        previous_hours: f64,
        current_hours: f64,
    },
    FastCompleted {
        tier: CompletionTier,
        actual_hours: f64,
        target_hours: u32,
    },
}

#[derive(Debug, Clone)]
pub struct MilestoneTracker {
    base_thresholds: Vec<u32>,
    /// Sorted, deduplicated; base thresholds plus the planned hours.
    thresholds: Vec<u32>,
    last_checked_hour: i64,
    fired: BTreeSet<u32>,
    goal_reached: bool,
    record_beaten: bool,
    completion_checked: bool,
}

impl Default for MilestoneTracker {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLDS_HOURS.to_vec())
    }
}

impl MilestoneTracker {
    pub fn new(thresholds: Vec<u32>) -> Self {
        let mut base_thresholds = thresholds;
        base_thresholds.sort_unstable();
        base_thresholds.dedup();
        Self {
            thresholds: base_thresholds.clone(),
            base_thresholds,
            last_checked_hour: -1,
            fired: BTreeSet::new(),
            goal_reached: false,
            record_beaten: false,
            completion_checked: false,
        }
    }

    /// Include the session's planned hours as a threshold.
    pub fn set_planned_hours(&mut self, planned_hours: u32) {
        let mut thresholds = self.base_thresholds.clone();
        thresholds.push(planned_hours);
        thresholds.sort_unstable();
        thresholds.dedup();
        self.thresholds = thresholds;
    }

    pub fn thresholds(&self) -> &[u32] {
        &self.thresholds
    }

    pub fn last_checked_hour(&self) -> i64 {
        self.last_checked_hour
    }

    pub fn fired_hours(&self) -> impl Iterator<Item = u32> + '_ {
        self.fired.iter().copied()
    }

    /// Fire every unfired threshold at or below `current_hours`, once per
    /// integer-hour boundary. Calls within an already-checked hour are no-ops.
    pub fn on_elapsed_hours_changed(&mut self, current_hours: f64) -> Vec<MilestoneEvent> {
        if !current_hours.is_finite() {
            return Vec::new();
        }
        let hour = current_hours.floor() as i64;
        if hour <= self.last_checked_hour {
            return Vec::new();
        }
        self.last_checked_hour = hour;

        let mut events = Vec::new();
        for &threshold in &self.thresholds {
            if f64::from(threshold) > current_hours {
                break;
            }
            if self.fired.insert(threshold) {
                events.push(MilestoneEvent::PhaseReached {
                    hours: threshold,
                    phase: Phase::for_hours(threshold),
                });
            }
        }
        events
    }

    pub fn check_goal_completion(&mut self, target_hours: u32, current_hours: f64) -> Option<MilestoneEvent> {
        if self.goal_reached || current_hours < f64::from(target_hours) {
            return None;
        }
        self.goal_reached = true;
        Some(MilestoneEvent::GoalReached {
            target_hours,
            current_hours,
        })
    }

    /// Only meaningful once there is a previous record to beat.
    pub fn check_personal_record(
        &mut self,
        current_hours: f64,
        previous_record_hours: f64,
    ) -> Option<MilestoneEvent> {
        if self.record_beaten || !(previous_record_hours > 0.0) || current_hours <= previous_record_hours {
            return None;
        }
        self.record_beaten = true;
        Some(MilestoneEvent::PersonalRecord {
            previous_hours: previous_record_hours,
            current_hours,
        })
    }

    /// Evaluate a finished fast. Runs once per session; the `None` tier is
    /// recorded but produces no event.
    pub fn check_fast_completion(&mut self, actual_hours: f64, target_hours: u32) -> Option<MilestoneEvent> {
        if self.completion_checked {
            return None;
        }
        self.completion_checked = true;
        match CompletionTier::classify(actual_hours, f64::from(target_hours)) {
            CompletionTier::None => None,
            tier => Some(MilestoneEvent::FastCompleted {
                tier,
                actual_hours,
                target_hours,
            }),
        }
    }

    /// Forget everything fired so far. Thresholds are kept.
    pub fn reset(&mut self) {
        self.last_checked_hour = -1;
        self.fired.clear();
        self.goal_reached = false;
        self.record_beaten = false;
        self.completion_checked = false;
    }

    /// Reset, then silently mark everything up to `current_hours` as fired.
    /// Used when picking up a fast that was already running.
    pub fn prime(&mut self, current_hours: f64, target_hours: u32, previous_record_hours: f64) {
        self.reset();
        if !current_hours.is_finite() || current_hours < 0.0 {
            return;
        }
        self.last_checked_hour = current_hours.floor() as i64;
        for &threshold in &self.thresholds {
            if f64::from(threshold) <= current_hours {
                self.fired.insert(threshold);
            }
        }
        self.goal_reached = current_hours >= f64::from(target_hours);
        self.record_beaten = previous_record_hours > 0.0 && current_hours > previous_record_hours;
    }
}
