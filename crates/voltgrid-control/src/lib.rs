//! voltgrid-control — the scheduling engine's control loop.
//!
//! [`Scheduler`] owns the fleet model and the three managers and
//! implements the simulator's inbound callback surface
//! ([`volt_core::SchedulerHooks`]):
//!
//! ```text
//! Scheduler
//!   ├── FleetModel        (snapshots + indices, refreshed per tick)
//!   ├── PowerManager      (S-state sequencing, P-state application)
//!   ├── MigrationManager  (MIGRATING flag, target selection)
//!   └── PlacementEngine   (admission, pending queue)
//! ```
//!
//! Every callback runs to completion inside the simulator's
//! event loop; there is no other thread and no suspension point.
//! Transient host errors are absorbed per entity, never propagated
//! back to the simulator.

pub mod scheduler;

pub use scheduler::Scheduler;
