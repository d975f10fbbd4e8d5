//! voltgrid-sim — a reference discrete-event simulator.
//!
//! Implements the [`volt_core::SimHost`] surface the scheduling engine
//! drives: a virtual microsecond clock, a min-heap event queue, lazy
//! task-progress integration against per-P-state MIPS ratings, S-state
//! transition latencies, live-migration latency, SLA and memory
//! warning emission, and energy accounting in kWh.
//!
//! The simulator is an external collaborator of the engine; nothing in
//! here makes scheduling decisions. [`engine::Simulation`] owns the
//! event loop and dispatches callbacks to any
//! [`volt_core::SchedulerHooks`] implementation.

pub mod cluster;
pub mod engine;
pub mod workload;

pub use cluster::{MachineSpec, SimCluster, TaskSpec};
pub use engine::Simulation;
pub use workload::generate_arrivals;
