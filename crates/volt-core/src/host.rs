//! The simulator boundary.
//!
//! Two surfaces: [`SimHost`] is everything the engine calls outward
//! (machine, VM, and task primitives plus the virtual clock), and
//! [`SchedulerHooks`] is everything the simulator calls inward (the
//! event callbacks). The engine never assumes a request has taken
//! effect before the matching completion event arrives.
//!
//! Per-entity queries return `Result`; a failed query means the entity
//! is not eligible this tick, never a reason to abort a callback.

use thiserror::Error;

use crate::types::{
    CpuFamily, FinalReport, MachineId, MachineSnapshot, PState, Priority, SState, SimTime, TaskId,
    TaskSnapshot, VmId, VmSnapshot,
};

/// Result alias for host calls.
pub type HostResult<T> = Result<T, HostError>;

/// Errors surfaced by the simulator host. All of these are transient
/// from the engine's point of view: the affected entity is skipped and
/// the callback continues.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("unknown machine {0}")]
    UnknownMachine(MachineId),

    #[error("unknown vm {0}")]
    UnknownVm(VmId),

    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Outbound simulator primitives the scheduling engine drives.
///
/// All methods take `&mut self`: even queries may advance lazy
/// accounting (task progress, energy integration) inside the host.
pub trait SimHost {
    // ── Machines ──────────────────────────────────────────────────

    /// Number of machines in the fleet. Machine ids are dense:
    /// `0..machine_count()`.
    fn machine_count(&mut self) -> u32;

    fn machine_info(&mut self, machine: MachineId) -> HostResult<MachineSnapshot>;

    /// Request an asynchronous S-state transition. Completion is
    /// signalled later via [`SchedulerHooks::state_change_done`].
    fn machine_set_state(&mut self, machine: MachineId, state: SState) -> HostResult<()>;

    /// Apply a P-state to one core. Takes effect immediately.
    fn machine_set_core_perf(
        &mut self,
        machine: MachineId,
        core: u32,
        pstate: PState,
    ) -> HostResult<()>;

    // ── VMs ───────────────────────────────────────────────────────

    fn vm_create(&mut self, kind: crate::types::VmKind, cpu: CpuFamily) -> HostResult<VmId>;

    fn vm_attach(&mut self, vm: VmId, machine: MachineId) -> HostResult<()>;

    fn vm_info(&mut self, vm: VmId) -> HostResult<VmSnapshot>;

    fn vm_add_task(&mut self, vm: VmId, task: TaskId, priority: Priority) -> HostResult<()>;

    fn vm_remove_task(&mut self, vm: VmId, task: TaskId) -> HostResult<()>;

    /// Begin a live migration. Completion is signalled later via
    /// [`SchedulerHooks::migration_done`]; until then the VM keeps
    /// running on its source machine.
    fn vm_migrate(&mut self, vm: VmId, target: MachineId) -> HostResult<()>;

    /// Whether the host has an outstanding migration for this VM.
    fn vm_pending_migration(&mut self, vm: VmId) -> bool;

    fn vm_shutdown(&mut self, vm: VmId) -> HostResult<()>;

    // ── Tasks ─────────────────────────────────────────────────────

    fn task_info(&mut self, task: TaskId) -> HostResult<TaskSnapshot>;

    fn task_remaining_instructions(&mut self, task: TaskId) -> HostResult<u64>;

    fn task_set_priority(&mut self, task: TaskId, priority: Priority) -> HostResult<()>;

    // ── Cluster ───────────────────────────────────────────────────

    /// Total cluster energy consumed so far, in kWh.
    fn cluster_energy(&mut self) -> f64;

    /// Violation percentage for one SLA class so far.
    fn sla_report(&mut self, sla: crate::types::SlaClass) -> f64;

    /// Current virtual time in microseconds.
    fn now(&mut self) -> SimTime;
}

/// Inbound callbacks the simulator invokes on the scheduling engine.
///
/// Callbacks are serialized in virtual-time order and run to
/// completion; none of them may propagate an error back to the
/// simulator.
pub trait SchedulerHooks {
    /// Populate the fleet model, power on the initial machine set, and
    /// pre-create at least one VM per represented CPU family.
    fn init(&mut self, host: &mut dyn SimHost);

    fn new_task(&mut self, host: &mut dyn SimHost, now: SimTime, task: TaskId);

    fn task_complete(&mut self, host: &mut dyn SimHost, now: SimTime, task: TaskId);

    fn periodic_check(&mut self, host: &mut dyn SimHost, now: SimTime);

    fn migration_done(&mut self, host: &mut dyn SimHost, now: SimTime, vm: VmId);

    fn state_change_done(&mut self, host: &mut dyn SimHost, now: SimTime, machine: MachineId);

    fn memory_warning(&mut self, host: &mut dyn SimHost, now: SimTime, machine: MachineId);

    fn sla_warning(&mut self, host: &mut dyn SimHost, now: SimTime, task: TaskId);

    /// Shut down every VM, park every machine, and produce the final
    /// report. Always returns a report, whatever happened during the
    /// run.
    fn simulation_complete(&mut self, host: &mut dyn SimHost, now: SimTime) -> FinalReport;
}
