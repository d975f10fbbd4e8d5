//! volt-core — shared domain model for the voltgrid control plane.
//!
//! Everything the engine crates agree on lives here:
//!
//! - **`types`** — opaque ids, hardware and workload enums, snapshots
//! - **`compat`** — VM-kind / CPU-family compatibility and coercion
//! - **`config`** — the declarative `voltgrid.toml` input
//! - **`host`** — the simulator boundary ([`SimHost`] outbound,
//!   [`SchedulerHooks`] inbound)

pub mod compat;
pub mod config;
pub mod host;
pub mod types;

pub use compat::{coerce_vm_kind, machine_fits, machine_fits_task, vm_kind_runs_on};
pub use config::{
    ConfigError, ConfigResult, MachineClass, SchedulerConfig, SimParams, TaskClass, VoltConfig,
};
pub use host::{HostError, HostResult, SchedulerHooks, SimHost};
pub use types::{
    CpuFamily, FinalReport, MachineId, MachineSnapshot, PState, Priority, SState, SimTime,
    SlaClass, TaskId, TaskKind, TaskSnapshot, VmId, VmKind, VmSnapshot,
};
