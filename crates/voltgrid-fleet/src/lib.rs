//! voltgrid-fleet — the authoritative in-memory view of the fleet.
//!
//! The fleet model owns cached machine and VM snapshots plus the
//! derived indices every other engine component navigates by:
//!
//! - machines grouped by CPU family
//! - VMs grouped by host machine
//! - tasks grouped by SLA class (and task → VM back-references)
//!
//! Mutating callbacks update the records and indices in place so they
//! stay coherent between refreshes; `refresh()` rebuilds everything
//! from the host at a bounded rate to correct any drift.

pub mod model;

pub use model::FleetModel;
