use std::error::Error;
use std::sync::Arc;

use clap::Subcommand;
use fastline_core::{
    elapsed_hours, spawn_monitor, CompletionTier, EngineError, FastMonitor, MilestoneEvent,
    Notifier, Phase, Session, SystemClock,
};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{print_json, Context};

#[derive(Subcommand)]
pub enum FastAction {
    /// Start a new fast
    Start {
        /// Planned duration in hours (1-168)
        #[arg(long, default_value = "16")]
        hours: u32,
    },
    /// Pause the current fast
    Pause,
    /// Resume a paused fast
    Resume,
    /// Finish the current fast as completed
    Stop,
    /// End the current fast before its goal
    StopEarly,
    /// Log water intake for the current fast
    Water {
        /// Amount in millilitres
        #[arg(long)]
        ml: u32,
        /// Optional note
        #[arg(long)]
        note: Option<String>,
    },
    /// Print the current fast as JSON
    Status,
    /// Print milestones as JSON lines while the fast runs
    Watch {
        /// Give up after this many seconds
        #[arg(long)]
        max_secs: Option<u64>,
    },
}

/// Prints each milestone as one JSON line.
struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    fn schedule_or_send(&self, event: &MilestoneEvent) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to encode milestone"),
        }
    }
}

#[derive(Serialize)]
struct StopOutput {
    session: Session,
    tier: CompletionTier,
}

#[derive(Serialize)]
struct StatusOutput {
    #[serde(flatten)]
    snapshot: fastline_core::EngineSnapshot,
    elapsed_hours: f64,
    bridge_alive: bool,
    phase: Option<&'static str>,
    next_milestone_hours: Option<u32>,
    goal_progress: Option<f64>,
}

/// Surface the user-facing message, keep the raw error in the debug log.
fn user_error(err: EngineError) -> Box<dyn Error> {
    debug!(error = %err, "fast command failed");
    err.classification().user_message.into()
}

fn print_stop(session: Session) -> Result<(), Box<dyn Error>> {
    let tier = CompletionTier::classify(
        session.actual_duration_hours.unwrap_or(0.0),
        f64::from(session.planned_duration_hours),
    );
    print_json(&StopOutput { session, tier })
}

pub async fn run(action: FastAction, user: Option<String>) -> Result<(), Box<dyn Error>> {
    let ctx = Context::open(user)?;
    let engine = &ctx.engine;

    match action {
        FastAction::Start { hours } => {
            engine.start(hours).await.map_err(user_error)?;
            print_json(&engine.snapshot())
        }
        FastAction::Pause => {
            engine.pause().await.map_err(user_error)?;
            print_json(&engine.snapshot())
        }
        FastAction::Resume => {
            engine.resume().await.map_err(user_error)?;
            print_json(&engine.snapshot())
        }
        FastAction::Stop => print_stop(engine.stop().await.map_err(user_error)?),
        FastAction::StopEarly => print_stop(engine.stop_early().await.map_err(user_error)?),
        FastAction::Water { ml, note } => {
            engine.add_water(ml, note).await.map_err(user_error)?;
            print_json(&engine.snapshot())
        }
        FastAction::Status => {
            let snapshot = engine.snapshot();
            let hours = snapshot
                .session
                .as_ref()
                .map_or(0.0, |s| elapsed_hours(s, snapshot.at));
            let tracker = ctx.config.milestone_tracker();
            let thresholds = tracker.thresholds();
            let (phase, next_milestone_hours, goal_progress) = match snapshot.session {
                Some(ref session) => (
                    thresholds
                        .iter()
                        .rev()
                        .find(|&&h| f64::from(h) <= hours)
                        .map(|&h| Phase::for_hours(h).title()),
                    thresholds.iter().copied().find(|&h| f64::from(h) > hours),
                    Some(hours / f64::from(session.planned_duration_hours)),
                ),
                None => (None, None, None),
            };
            print_json(&StatusOutput {
                snapshot,
                elapsed_hours: hours,
                bridge_alive: engine.bridge_alive(ctx.config.heartbeat_timeout()),
                phase,
                next_milestone_hours,
                goal_progress,
            })
        }
        FastAction::Watch { max_secs } => watch(&ctx, max_secs).await,
    }
}

/// Run the milestone monitor while a fast is open and short of its planned
/// duration. `max_secs` bounds the wait.
async fn watch(ctx: &Context, max_secs: Option<u64>) -> Result<(), Box<dyn Error>> {
    let engine = &ctx.engine;
    let settings = ctx.config.monitor_settings();
    let tick = settings.tick_interval;
    let monitor = FastMonitor::new(
        ctx.config.milestone_tracker(),
        Arc::new(StdoutNotifier),
        settings,
    );
    let handle = spawn_monitor(
        engine.clone(),
        monitor,
        ctx.history.clone(),
        Arc::new(SystemClock),
    );

    let deadline = max_secs.map(|secs| Instant::now() + std::time::Duration::from_secs(secs));
    loop {
        let Some(session) = engine.current_session() else {
            break;
        };
        let goal_secs = u64::from(session.planned_duration_hours) * 3600;
        if engine.elapsed_seconds() > goal_secs {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        tokio::time::sleep(tick).await;
    }

    // One last evaluation so a goal reached on the final tick is printed.
    tokio::time::sleep(tick).await;
    handle.abort();
    Ok(())
}
