//! Session model and the store contract the engine talks to.

pub mod local;
pub mod model;
pub mod store;

pub use local::{LocalSessionStore, StoreOp};
pub use model::{
    hours_between, validate_planned_hours, Session, SessionPatch, SessionStatus, WaterEntry,
    MAX_PLANNED_HOURS, MIN_PLANNED_HOURS,
};
pub use store::{PushCallback, SessionStore, Subscription};
