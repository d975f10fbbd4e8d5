//! voltgrid-placement — task admission and placement.
//!
//! On every new task the engine coerces the requested VM kind to a
//! runnable combination, maps the SLA class (and deadline headroom) to
//! a scheduling priority, and picks a VM: an existing resident one
//! where possible, a freshly created one on an active machine
//! otherwise. When every candidate host is still waking up, the task
//! parks in the pending queue, which drains as machines reach S0.

pub mod engine;
pub mod error;

pub use engine::{PlaceOutcome, PlacementEngine, PendingTask};
pub use error::{PlacementError, PlacementResult};
