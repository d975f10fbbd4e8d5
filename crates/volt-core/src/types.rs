//! Domain types for the voltgrid control plane.
//!
//! Entities are referred to by opaque ids everywhere; cross-references
//! (VM to machine, task to VM) are index lookups in the fleet model,
//! never owned pointers. Snapshot structs mirror what the simulator
//! host reports for each entity at a point in virtual time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Virtual time in simulated microseconds.
pub type SimTime = u64;

/// Opaque machine identifier, assigned by the simulator at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(pub u32);

/// Opaque VM identifier, assigned by the simulator on `vm_create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmId(pub u32);

/// Opaque task identifier, assigned by the workload generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vm{}", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

// ── Hardware ──────────────────────────────────────────────────────

/// CPU instruction-set family of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuFamily {
    X86,
    Arm,
    Power,
    Riscv,
}

impl CpuFamily {
    /// All families, for per-family bookkeeping.
    pub const ALL: [CpuFamily; 4] = [
        CpuFamily::X86,
        CpuFamily::Arm,
        CpuFamily::Power,
        CpuFamily::Riscv,
    ];
}

impl fmt::Display for CpuFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CpuFamily::X86 => "x86",
            CpuFamily::Arm => "arm",
            CpuFamily::Power => "power",
            CpuFamily::Riscv => "riscv",
        };
        f.write_str(s)
    }
}

/// Machine sleep state. Numerically higher is deeper sleep; only S0
/// executes work. Transitions are asynchronous: a request is issued and
/// a `state_change_done` event arrives later in virtual time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SState {
    S0,
    S1,
    S2,
    S3,
    S4,
    S5,
}

impl SState {
    pub fn is_on(self) -> bool {
        self == SState::S0
    }

    /// Deep-sleep states are candidates for wake-to-place decisions.
    pub fn is_deep_sleep(self) -> bool {
        self >= SState::S3
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", *self as usize)
    }
}

/// Per-core performance state. P0 is peak frequency, P3 the lowest.
/// Applied synchronously, per core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PState {
    P0,
    P1,
    P2,
    P3,
}

impl PState {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for PState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", *self as usize)
    }
}

// ── Workload ──────────────────────────────────────────────────────

/// Guest kind a VM boots with. Determines which CPU families can host
/// the VM (see `compat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmKind {
    Linux,
    LinuxRt,
    Win,
    Aix,
}

impl fmt::Display for VmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmKind::Linux => "linux",
            VmKind::LinuxRt => "linux-rt",
            VmKind::Win => "win",
            VmKind::Aix => "aix",
        };
        f.write_str(s)
    }
}

/// Contractual completion-time class. SLA0 is the tightest bound,
/// SLA3 is best effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaClass {
    Sla0,
    Sla1,
    Sla2,
    Sla3,
}

impl SlaClass {
    pub const ALL: [SlaClass; 4] = [
        SlaClass::Sla0,
        SlaClass::Sla1,
        SlaClass::Sla2,
        SlaClass::Sla3,
    ];

    /// SLA0 and SLA1 carry hard deadlines and drive placement and
    /// power decisions ahead of everything else.
    pub fn is_critical(self) -> bool {
        matches!(self, SlaClass::Sla0 | SlaClass::Sla1)
    }

    /// Safety factor applied to delivered MIPS when judging deadline
    /// feasibility. Tighter classes use a smaller factor so they are
    /// flagged at risk earlier.
    pub fn risk_factor(self) -> f64 {
        match self {
            SlaClass::Sla0 => 0.85,
            SlaClass::Sla1 => 0.9,
            SlaClass::Sla2 => 0.95,
            SlaClass::Sla3 => 1.0,
        }
    }

    /// Base scheduling priority for tasks of this class.
    pub fn base_priority(self) -> Priority {
        match self {
            SlaClass::Sla0 | SlaClass::Sla1 => Priority::High,
            SlaClass::Sla2 => Priority::Mid,
            SlaClass::Sla3 => Priority::Low,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SlaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SLA{}", *self as usize)
    }
}

/// Scheduling priority a task runs with inside its VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Mid,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::High => "high",
            Priority::Mid => "mid",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

/// Broad workload shape of a task class. Compute-heavy classes keep
/// their host at a higher P-state even at moderate utilization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Web,
    Streaming,
    Batch,
    Hpc,
}

impl TaskKind {
    pub fn is_compute_heavy(self) -> bool {
        self == TaskKind::Hpc
    }
}

// ── Snapshots ─────────────────────────────────────────────────────

/// Point-in-time view of a machine as reported by the simulator host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub id: MachineId,
    pub cpu: CpuFamily,
    /// Physical core count; utilization is active tasks over cores.
    pub cores: u32,
    /// Total memory in units.
    pub memory_total: u64,
    /// Memory currently committed to placed tasks, in units.
    pub memory_used: u64,
    pub has_gpu: bool,
    pub s_state: SState,
    /// P-state currently applied to the cores. The engine always sets
    /// all cores of a machine together.
    pub p_state: PState,
    /// Tasks active across all VMs on this machine.
    pub active_tasks: u32,
    /// Delivered MIPS per core at each P-state, indexed by `PState`.
    pub mips: [u64; PState::COUNT],
}

impl MachineSnapshot {
    /// Free memory in units.
    pub fn memory_free(&self) -> u64 {
        self.memory_total.saturating_sub(self.memory_used)
    }

    /// MIPS a single core delivers at the current P-state.
    pub fn current_mips(&self) -> u64 {
        self.mips[self.p_state.index()]
    }
}

/// Point-in-time view of a VM as reported by the simulator host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSnapshot {
    pub id: VmId,
    pub kind: VmKind,
    pub cpu: CpuFamily,
    /// Host machine, or `None` while detached.
    pub machine: Option<MachineId>,
    /// Tasks currently placed on this VM.
    pub active_tasks: Vec<TaskId>,
    /// Set while a live migration is outstanding for this VM.
    pub migrating: bool,
}

/// Static description of a task as reported by the simulator host.
/// Remaining instructions change continuously and are queried
/// separately via `task_remaining_instructions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub cpu: CpuFamily,
    pub vm_kind: VmKind,
    pub kind: TaskKind,
    pub gpu_required: bool,
    /// Memory requirement in units.
    pub memory: u64,
    pub sla: SlaClass,
    pub total_instructions: u64,
    /// Virtual time by which the task should complete.
    pub target_completion: SimTime,
}

// ── Reporting ─────────────────────────────────────────────────────

/// Final run report, printed on `simulation_complete` regardless of
/// any internal errors encountered along the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    /// SLA violation percentage per class, indexed by `SlaClass`.
    /// SLA3 is best effort and always reports 0.0.
    pub sla_violations_pct: [f64; 4],
    /// Total cluster energy over the run, in kWh.
    pub total_energy_kwh: f64,
    /// Virtual duration of the run in seconds.
    pub simulated_seconds: f64,
}
