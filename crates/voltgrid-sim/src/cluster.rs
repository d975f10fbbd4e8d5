//! Simulated cluster state and the host primitives over it.
//!
//! Task progress and energy are integrated lazily: the clock only
//! moves in [`SimCluster::advance_to`], called by the event loop
//! before each dispatch, so host calls within a callback all observe
//! the same instant. Completion events carry an epoch; any change that
//! alters a machine's delivered rate bumps the epochs of its tasks and
//! schedules fresh completions, leaving stale events to be ignored.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use tracing::{debug, trace};

use volt_core::config::MachineClass;
use volt_core::types::{
    CpuFamily, MachineId, MachineSnapshot, PState, Priority, SState, SimTime, SlaClass, TaskId,
    TaskKind, TaskSnapshot, VmId, VmKind, VmSnapshot,
};
use volt_core::{HostError, HostResult, SimHost};

/// Joules per kilowatt-hour.
const J_PER_KWH: f64 = 3_600_000.0;
/// A task is complete once less than this many instructions remain.
const COMPLETION_EPSILON: f64 = 0.5;

// ── Events ────────────────────────────────────────────────────────

/// Everything the simulator can deliver to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    TaskArrival(TaskId),
    TaskCompletion { task: TaskId, epoch: u64 },
    StateChangeDone(MachineId),
    MigrationDone(VmId),
    SlaWarning(TaskId),
    MemoryWarning(MachineId),
    PeriodicCheck,
}

/// Timed event wrapper for the priority queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedEvent {
    pub time: SimTime,
    /// Tie-breaker keeping same-instant events in issue order.
    seq: u64,
    pub event: SimEvent,
}

// BinaryHeap is a max-heap; reverse the ordering for earliest-first.
impl Ord for TimedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ── Records ───────────────────────────────────────────────────────

/// Construction-time description of one machine.
#[derive(Debug, Clone)]
pub struct MachineSpec {
    pub cpu: CpuFamily,
    pub cores: u32,
    pub memory: u64,
    pub gpu: bool,
    pub mips: [u64; PState::COUNT],
    pub p_state_watts: [f64; PState::COUNT],
    pub s_state_watts: [f64; 6],
    pub s_state_latency_us: [SimTime; 6],
    pub initial_state: SState,
}

impl MachineSpec {
    pub fn from_class(class: &MachineClass, initial_state: SState) -> Self {
        Self {
            cpu: class.cpu,
            cores: class.cores,
            memory: class.memory,
            gpu: class.gpu,
            mips: class.mips,
            p_state_watts: class.p_state_watts,
            s_state_watts: class.s_state_watts,
            s_state_latency_us: class.s_state_latency_us,
            initial_state,
        }
    }
}

/// Construction-time description of one task.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub cpu: CpuFamily,
    pub vm_kind: VmKind,
    pub kind: TaskKind,
    pub gpu_required: bool,
    pub memory: u64,
    pub sla: SlaClass,
    pub instructions: u64,
    pub target_completion: SimTime,
}

struct MachineRecord {
    spec: MachineSpec,
    s_state: SState,
    p_state: PState,
    /// Target of the in-flight transition, if any.
    transitioning_to: Option<SState>,
}

impl MachineRecord {
    fn watts(&self) -> f64 {
        let base = self.spec.s_state_watts[self.s_state.index()];
        if self.s_state.is_on() {
            base + self.spec.p_state_watts[self.p_state.index()]
        } else {
            base
        }
    }
}

struct VmRecord {
    kind: VmKind,
    cpu: CpuFamily,
    machine: Option<MachineId>,
    tasks: Vec<TaskId>,
    migrating: bool,
    migrate_target: Option<MachineId>,
}

struct TaskRecord {
    spec: TaskSpec,
    remaining: f64,
    vm: Option<VmId>,
    #[allow(dead_code)]
    priority: Priority,
    completed: bool,
    /// Validity stamp for scheduled completion events.
    epoch: u64,
    sla_warned: bool,
}

// ── Cluster ───────────────────────────────────────────────────────

/// The simulated datacenter: machines, VMs, tasks, the event queue,
/// the virtual clock, and the energy meter.
pub struct SimCluster {
    now: SimTime,
    queue: BinaryHeap<TimedEvent>,
    next_seq: u64,
    machines: Vec<MachineRecord>,
    vms: HashMap<VmId, VmRecord>,
    next_vm: u32,
    tasks: HashMap<TaskId, TaskRecord>,
    energy_joules: f64,
    migration_latency_us: SimTime,
    completed_per_sla: [u32; 4],
    violated_per_sla: [u32; 4],
}

impl SimCluster {
    pub fn new(migration_latency_us: SimTime) -> Self {
        Self {
            now: 0,
            queue: BinaryHeap::new(),
            next_seq: 0,
            machines: Vec::new(),
            vms: HashMap::new(),
            next_vm: 0,
            tasks: HashMap::new(),
            energy_joules: 0.0,
            migration_latency_us,
            completed_per_sla: [0; 4],
            violated_per_sla: [0; 4],
        }
    }

    /// Register a machine. Ids are dense, in registration order; the
    /// fleet picks up machines added mid-run at its next refresh.
    pub fn add_machine(&mut self, spec: MachineSpec) -> MachineId {
        let id = MachineId(self.machines.len() as u32);
        self.machines.push(MachineRecord {
            s_state: spec.initial_state,
            p_state: PState::P3,
            transitioning_to: None,
            spec,
        });
        id
    }

    /// Register a task and schedule its arrival event.
    pub fn add_task(&mut self, arrival: SimTime, spec: TaskSpec) -> TaskId {
        let id = TaskId(self.tasks.len() as u64);
        self.tasks.insert(
            id,
            TaskRecord {
                remaining: spec.instructions as f64,
                spec,
                vm: None,
                priority: Priority::Low,
                completed: false,
                epoch: 0,
                sla_warned: false,
            },
        );
        self.push_at(arrival, SimEvent::TaskArrival(id));
        id
    }

    pub fn virtual_now(&self) -> SimTime {
        self.now
    }

    pub fn task_is_completed(&self, task: TaskId) -> bool {
        self.tasks.get(&task).map(|t| t.completed).unwrap_or(false)
    }

    pub fn machine_state(&self, machine: MachineId) -> Option<SState> {
        self.machines.get(machine.0 as usize).map(|m| m.s_state)
    }

    pub fn machine_pstate(&self, machine: MachineId) -> Option<PState> {
        self.machines.get(machine.0 as usize).map(|m| m.p_state)
    }

    pub fn push_at(&mut self, time: SimTime, event: SimEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(TimedEvent { time, seq, event });
    }

    /// Next event at or before `until`, if any.
    pub fn pop_due(&mut self, until: SimTime) -> Option<TimedEvent> {
        if self.queue.peek().is_some_and(|ev| ev.time <= until) {
            self.queue.pop()
        } else {
            None
        }
    }

    // ── Clock, progress, energy ───────────────────────────────────

    /// Advance the virtual clock, integrating task progress and
    /// energy over the elapsed interval. Rates are constant between
    /// events, so one linear step is exact.
    pub fn advance_to(&mut self, t: SimTime) {
        debug_assert!(t >= self.now, "clock must not run backwards");
        if t <= self.now {
            return;
        }
        let dt = (t - self.now) as f64;

        for idx in 0..self.machines.len() {
            let machine = MachineId(idx as u32);
            let watts = self.machines[idx].watts();
            self.energy_joules += watts * dt / 1_000_000.0;

            let rate = self.machine_task_rate(machine);
            if rate <= 0.0 {
                continue;
            }
            for task in self.tasks_on_machine(machine) {
                if let Some(record) = self.tasks.get_mut(&task) {
                    if !record.completed {
                        record.remaining = (record.remaining - rate * dt).max(0.0);
                    }
                }
            }
        }
        self.now = t;
    }

    /// Instructions per µs each task on `machine` currently receives.
    /// Every task gets a core's worth of MIPS; oversubscribed
    /// machines share cores proportionally.
    fn machine_task_rate(&self, machine: MachineId) -> f64 {
        let Some(record) = self.machines.get(machine.0 as usize) else {
            return 0.0;
        };
        if !record.s_state.is_on() {
            return 0.0;
        }
        let tasks = self.count_tasks(machine);
        if tasks == 0 {
            return 0.0;
        }
        let mips = record.spec.mips[record.p_state.index()] as f64;
        let share = (record.spec.cores as f64 / tasks as f64).min(1.0);
        mips * share
    }

    fn tasks_on_machine(&self, machine: MachineId) -> Vec<TaskId> {
        self.vms
            .values()
            .filter(|vm| vm.machine == Some(machine))
            .flat_map(|vm| vm.tasks.iter().copied())
            .collect()
    }

    fn count_tasks(&self, machine: MachineId) -> u32 {
        self.vms
            .values()
            .filter(|vm| vm.machine == Some(machine))
            .map(|vm| vm.tasks.len() as u32)
            .sum()
    }

    fn memory_used(&self, machine: MachineId) -> u64 {
        self.vms
            .values()
            .filter(|vm| vm.machine == Some(machine))
            .flat_map(|vm| vm.tasks.iter())
            .filter_map(|task| self.tasks.get(task))
            .map(|t| t.spec.memory)
            .sum()
    }

    /// Re-plan completion (and SLA warning) events for every task on
    /// `machine` after its delivered rate changed.
    fn reschedule_machine(&mut self, machine: MachineId) {
        let rate = self.machine_task_rate(machine);
        for task in self.tasks_on_machine(machine) {
            let now = self.now;
            let Some(record) = self.tasks.get_mut(&task) else {
                continue;
            };
            if record.completed {
                continue;
            }
            record.epoch += 1;
            if rate <= 0.0 {
                // The task stalls; a future rate change reschedules.
                continue;
            }
            let eta = (record.remaining / rate).ceil() as SimTime;
            let done_at = now + eta;
            let epoch = record.epoch;
            let target = record.spec.target_completion;
            let warn = done_at > target && !record.sla_warned;
            if warn {
                record.sla_warned = true;
            }
            self.push_at(done_at, SimEvent::TaskCompletion { task, epoch });
            if warn {
                trace!(task = %task, done_at, target, "sla warning scheduled");
                self.push_at(now, SimEvent::SlaWarning(task));
            }
        }
    }

    // ── Event application (called by the engine loop) ─────────────

    /// Apply a state transition that just finished. Returns false for
    /// a spurious completion.
    pub(crate) fn apply_state_change(&mut self, machine: MachineId) -> bool {
        let Some(record) = self.machines.get_mut(machine.0 as usize) else {
            return false;
        };
        let Some(target) = record.transitioning_to.take() else {
            return false;
        };
        record.s_state = target;
        debug!(machine = %machine, state = %target, "machine state settled");
        self.reschedule_machine(machine);
        true
    }

    /// Apply a finished migration. Returns false for a spurious event.
    pub(crate) fn apply_migration_done(&mut self, vm: VmId) -> bool {
        let source = {
            let Some(record) = self.vms.get_mut(&vm) else {
                return false;
            };
            if !record.migrating {
                return false;
            }
            let source = record.machine;
            record.machine = record.migrate_target.take();
            record.migrating = false;
            source
        };
        let target = self.vms.get(&vm).and_then(|record| record.machine);
        if let Some(source) = source {
            self.reschedule_machine(source);
        }
        if let Some(target) = target {
            self.reschedule_machine(target);
        }
        true
    }

    /// Apply a completion event. Returns true when the task really
    /// finished now (stale epochs and re-completions are ignored).
    pub(crate) fn apply_completion(&mut self, task: TaskId, epoch: u64) -> bool {
        let Some(record) = self.tasks.get_mut(&task) else {
            return false;
        };
        if record.completed || record.epoch != epoch {
            return false;
        }
        if record.remaining > COMPLETION_EPSILON {
            // Rate dropped since this event was scheduled.
            return false;
        }
        record.completed = true;
        record.remaining = 0.0;
        let sla = record.spec.sla;
        let violated = self.now > record.spec.target_completion;
        let vm = record.vm.take();

        self.completed_per_sla[sla.index()] += 1;
        if violated {
            self.violated_per_sla[sla.index()] += 1;
        }

        if let Some(vm) = vm {
            if let Some(vm_record) = self.vms.get_mut(&vm) {
                vm_record.tasks.retain(|&t| t != task);
                if let Some(machine) = vm_record.machine {
                    self.reschedule_machine(machine);
                }
            }
        }
        debug!(task = %task, sla = %sla, violated, "task finished");
        true
    }
}

// ── Host surface ──────────────────────────────────────────────────

impl SimHost for SimCluster {
    fn machine_count(&mut self) -> u32 {
        self.machines.len() as u32
    }

    fn machine_info(&mut self, machine: MachineId) -> HostResult<MachineSnapshot> {
        let memory_used = self.memory_used(machine);
        let active_tasks = self.count_tasks(machine);
        let record = self
            .machines
            .get(machine.0 as usize)
            .ok_or(HostError::UnknownMachine(machine))?;
        Ok(MachineSnapshot {
            id: machine,
            cpu: record.spec.cpu,
            cores: record.spec.cores,
            memory_total: record.spec.memory,
            memory_used,
            has_gpu: record.spec.gpu,
            s_state: record.s_state,
            p_state: record.p_state,
            active_tasks,
            mips: record.spec.mips,
        })
    }

    fn machine_set_state(&mut self, machine: MachineId, state: SState) -> HostResult<()> {
        let now = self.now;
        let record = self
            .machines
            .get_mut(machine.0 as usize)
            .ok_or(HostError::UnknownMachine(machine))?;
        if record.transitioning_to.is_some() {
            return Err(HostError::Rejected(format!(
                "machine {machine} already transitioning"
            )));
        }
        if record.s_state == state {
            return Err(HostError::Rejected(format!(
                "machine {machine} already in {state}"
            )));
        }
        record.transitioning_to = Some(state);
        let latency = record.spec.s_state_latency_us[state.index()];
        self.push_at(now + latency, SimEvent::StateChangeDone(machine));
        Ok(())
    }

    fn machine_set_core_perf(
        &mut self,
        machine: MachineId,
        core: u32,
        pstate: PState,
    ) -> HostResult<()> {
        let record = self
            .machines
            .get_mut(machine.0 as usize)
            .ok_or(HostError::UnknownMachine(machine))?;
        if core >= record.spec.cores {
            return Err(HostError::Rejected(format!(
                "machine {machine} has no core {core}"
            )));
        }
        // The engine drives all cores together; the machine-wide
        // P-state follows the latest request.
        if record.p_state != pstate {
            record.p_state = pstate;
            self.reschedule_machine(machine);
        }
        Ok(())
    }

    fn vm_create(&mut self, kind: VmKind, cpu: CpuFamily) -> HostResult<VmId> {
        let id = VmId(self.next_vm);
        self.next_vm += 1;
        self.vms.insert(
            id,
            VmRecord {
                kind,
                cpu,
                machine: None,
                tasks: Vec::new(),
                migrating: false,
                migrate_target: None,
            },
        );
        Ok(id)
    }

    fn vm_attach(&mut self, vm: VmId, machine: MachineId) -> HostResult<()> {
        if machine.0 as usize >= self.machines.len() {
            return Err(HostError::UnknownMachine(machine));
        }
        let record = self.vms.get_mut(&vm).ok_or(HostError::UnknownVm(vm))?;
        if record.machine.is_some() {
            return Err(HostError::Rejected(format!("vm {vm} already attached")));
        }
        record.machine = Some(machine);
        Ok(())
    }

    fn vm_info(&mut self, vm: VmId) -> HostResult<VmSnapshot> {
        let record = self.vms.get(&vm).ok_or(HostError::UnknownVm(vm))?;
        Ok(VmSnapshot {
            id: vm,
            kind: record.kind,
            cpu: record.cpu,
            machine: record.machine,
            active_tasks: record.tasks.clone(),
            migrating: record.migrating,
        })
    }

    fn vm_add_task(&mut self, vm: VmId, task: TaskId, priority: Priority) -> HostResult<()> {
        let machine = {
            let record = self.vms.get(&vm).ok_or(HostError::UnknownVm(vm))?;
            if record.migrating {
                return Err(HostError::Rejected(format!("vm {vm} is migrating")));
            }
            record.machine.ok_or_else(|| {
                HostError::Rejected(format!("vm {vm} is detached"))
            })?
        };
        {
            let record = self.tasks.get_mut(&task).ok_or(HostError::UnknownTask(task))?;
            if record.completed {
                return Err(HostError::Rejected(format!("task {task} already finished")));
            }
            if record.vm.is_some() {
                return Err(HostError::Rejected(format!("task {task} already placed")));
            }
            record.vm = Some(vm);
            record.priority = priority;
        }
        let was_within = self.memory_used(machine)
            <= self.machines[machine.0 as usize].spec.memory;
        if let Some(record) = self.vms.get_mut(&vm) {
            record.tasks.push(task);
        }
        let now_over = self.memory_used(machine)
            > self.machines[machine.0 as usize].spec.memory;
        if was_within && now_over {
            let now = self.now;
            self.push_at(now, SimEvent::MemoryWarning(machine));
        }
        self.reschedule_machine(machine);
        Ok(())
    }

    fn vm_remove_task(&mut self, vm: VmId, task: TaskId) -> HostResult<()> {
        let machine = {
            let record = self.vms.get_mut(&vm).ok_or(HostError::UnknownVm(vm))?;
            if record.migrating {
                return Err(HostError::Rejected(format!("vm {vm} is migrating")));
            }
            if !record.tasks.contains(&task) {
                return Err(HostError::UnknownTask(task));
            }
            record.tasks.retain(|&t| t != task);
            record.machine
        };
        if let Some(record) = self.tasks.get_mut(&task) {
            record.vm = None;
            // Invalidate any scheduled completion.
            record.epoch += 1;
        }
        if let Some(machine) = machine {
            self.reschedule_machine(machine);
        }
        Ok(())
    }

    fn vm_migrate(&mut self, vm: VmId, target: MachineId) -> HostResult<()> {
        if target.0 as usize >= self.machines.len() {
            return Err(HostError::UnknownMachine(target));
        }
        let now = self.now;
        let latency = self.migration_latency_us;
        let record = self.vms.get_mut(&vm).ok_or(HostError::UnknownVm(vm))?;
        if record.migrating {
            return Err(HostError::Rejected(format!("vm {vm} already migrating")));
        }
        if record.machine.is_none() {
            return Err(HostError::Rejected(format!("vm {vm} is detached")));
        }
        record.migrating = true;
        record.migrate_target = Some(target);
        self.push_at(now + latency, SimEvent::MigrationDone(vm));
        Ok(())
    }

    fn vm_pending_migration(&mut self, vm: VmId) -> bool {
        self.vms.get(&vm).map(|v| v.migrating).unwrap_or(false)
    }

    fn vm_shutdown(&mut self, vm: VmId) -> HostResult<()> {
        let record = self.vms.get(&vm).ok_or(HostError::UnknownVm(vm))?;
        if record.migrating {
            return Err(HostError::Rejected(format!("vm {vm} is migrating")));
        }
        if !record.tasks.is_empty() {
            return Err(HostError::Rejected(format!("vm {vm} still has tasks")));
        }
        self.vms.remove(&vm);
        Ok(())
    }

    fn task_info(&mut self, task: TaskId) -> HostResult<TaskSnapshot> {
        let record = self.tasks.get(&task).ok_or(HostError::UnknownTask(task))?;
        Ok(TaskSnapshot {
            id: task,
            cpu: record.spec.cpu,
            vm_kind: record.spec.vm_kind,
            kind: record.spec.kind,
            gpu_required: record.spec.gpu_required,
            memory: record.spec.memory,
            sla: record.spec.sla,
            total_instructions: record.spec.instructions,
            target_completion: record.spec.target_completion,
        })
    }

    fn task_remaining_instructions(&mut self, task: TaskId) -> HostResult<u64> {
        self.tasks
            .get(&task)
            .map(|t| t.remaining.ceil() as u64)
            .ok_or(HostError::UnknownTask(task))
    }

    fn task_set_priority(&mut self, task: TaskId, priority: Priority) -> HostResult<()> {
        let record = self.tasks.get_mut(&task).ok_or(HostError::UnknownTask(task))?;
        record.priority = priority;
        Ok(())
    }

    fn cluster_energy(&mut self) -> f64 {
        self.energy_joules / J_PER_KWH
    }

    fn sla_report(&mut self, sla: SlaClass) -> f64 {
        let completed = self.completed_per_sla[sla.index()];
        if completed == 0 {
            return 0.0;
        }
        f64::from(self.violated_per_sla[sla.index()]) / f64::from(completed) * 100.0
    }

    fn now(&mut self) -> SimTime {
        self.now
    }
}
