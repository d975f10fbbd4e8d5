//! voltgrid-migration — live VM migration.
//!
//! The migration manager is the sole owner of the MIGRATING flag: it
//! sets the flag when a move starts and clears it only on the host's
//! `migration_done` event. Between the two, the VM is untouchable —
//! no task adds or removes, no shutdown, no second migration.
//!
//! Target selection ranks active machines first (lowest utilization
//! wins), falls back to waking a deep sleeper, and otherwise leaves
//! the VM where it is.

pub mod error;
pub mod manager;
pub mod target;

pub use error::{MigrationError, MigrationResult};
pub use manager::{MigrationManager, MigrationTicket, RelocateOutcome};
pub use target::{find_target, TargetDecision, VmDemand};
