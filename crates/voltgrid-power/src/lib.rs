//! voltgrid-power — S-state sequencing and DVFS policy.
//!
//! The power manager is the only component that issues machine state
//! requests. It enforces the two power invariants: a machine with
//! active work never leaves S0, and a machine with a pending state
//! change receives no further requests until the change completes.
//! P-state changes are immediate and applied to all cores together.

pub mod dvfs;
pub mod error;
pub mod manager;

pub use dvfs::{dvfs_target, DvfsInputs};
pub use error::{PowerError, PowerResult};
pub use manager::PowerManager;
