//! Fleet model — cached snapshots and derived indices.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace, warn};

use volt_core::types::{
    CpuFamily, MachineId, MachineSnapshot, PState, SState, SimTime, SlaClass, TaskId, TaskKind,
    VmId, VmSnapshot,
};
use volt_core::SimHost;

/// Per-task bookkeeping the engine needs between refreshes.
#[derive(Debug, Clone)]
struct TaskRecord {
    vm: VmId,
    sla: SlaClass,
    /// Memory the task holds on its host machine, in units.
    memory: u64,
    /// Whether the task demands a GPU-capable host.
    gpu: bool,
    kind: TaskKind,
}

/// The authoritative in-memory record of machines, VMs, and task
/// assignments, with indices rebuilt on refresh and patched in place
/// by mutation notes.
pub struct FleetModel {
    refresh_interval_us: SimTime,
    machines: HashMap<MachineId, MachineSnapshot>,
    vms: HashMap<VmId, VmSnapshot>,
    tasks: HashMap<TaskId, TaskRecord>,
    by_cpu: HashMap<CpuFamily, Vec<MachineId>>,
    vms_by_machine: HashMap<MachineId, Vec<VmId>>,
    tasks_by_sla: HashMap<SlaClass, HashSet<TaskId>>,
    last_refresh: Option<SimTime>,
    util_cache: HashMap<MachineId, f64>,
}

impl FleetModel {
    pub fn new(refresh_interval_us: SimTime) -> Self {
        Self {
            refresh_interval_us,
            machines: HashMap::new(),
            vms: HashMap::new(),
            tasks: HashMap::new(),
            by_cpu: HashMap::new(),
            vms_by_machine: HashMap::new(),
            tasks_by_sla: HashMap::new(),
            last_refresh: None,
            util_cache: HashMap::new(),
        }
    }

    // ── Refresh ───────────────────────────────────────────────────

    /// Load every machine from the host. Used once at init; later
    /// refreshes go through [`FleetModel::refresh`].
    pub fn populate(&mut self, host: &mut dyn SimHost) {
        let total = host.machine_count();
        for i in 0..total {
            let id = MachineId(i);
            match host.machine_info(id) {
                Ok(snap) => {
                    self.machines.insert(id, snap);
                }
                Err(e) => warn!(machine = %id, error = %e, "machine query failed at populate"),
            }
        }
        self.rebuild_indices();
        debug!(machines = self.machines.len(), "fleet populated");
    }

    /// Re-query every known machine and VM and rebuild the indices.
    ///
    /// Idempotent and bounded: at most one refresh per
    /// `refresh_interval_us` of virtual time. Returns whether a
    /// refresh actually ran. A per-entity query failure drops that
    /// entry from the snapshot; the indices stay coherent with what
    /// the model does know.
    pub fn refresh(&mut self, host: &mut dyn SimHost, now: SimTime) -> bool {
        if let Some(last) = self.last_refresh {
            if now.saturating_sub(last) < self.refresh_interval_us {
                return false;
            }
        }
        self.last_refresh = Some(now);

        let total = host.machine_count();
        let mut machines = HashMap::with_capacity(total as usize);
        for i in 0..total {
            let id = MachineId(i);
            match host.machine_info(id) {
                Ok(snap) => {
                    machines.insert(id, snap);
                }
                Err(e) => {
                    trace!(machine = %id, error = %e, "machine omitted from refresh");
                }
            }
        }
        self.machines = machines;

        // VMs are re-queried by the ids the engine created; the host
        // has no VM enumeration primitive.
        let vm_ids: Vec<VmId> = self.vms.keys().copied().collect();
        for id in vm_ids {
            match host.vm_info(id) {
                Ok(snap) => {
                    self.vms.insert(id, snap);
                }
                Err(e) => {
                    trace!(vm = %id, error = %e, "vm omitted from refresh");
                    self.vms.remove(&id);
                }
            }
        }

        // Task back-references follow the refreshed VM membership.
        let mut stale: Vec<TaskId> = Vec::new();
        for (&task, record) in &self.tasks {
            let live = self
                .vms
                .get(&record.vm)
                .is_some_and(|vm| vm.active_tasks.contains(&task));
            if !live {
                stale.push(task);
            }
        }
        for task in stale {
            self.drop_task_record(task);
        }

        self.rebuild_indices();
        trace!(
            machines = self.machines.len(),
            vms = self.vms.len(),
            tasks = self.tasks.len(),
            "fleet refreshed"
        );
        true
    }

    fn rebuild_indices(&mut self) {
        self.by_cpu.clear();
        for (&id, snap) in &self.machines {
            self.by_cpu.entry(snap.cpu).or_default().push(id);
        }
        for ids in self.by_cpu.values_mut() {
            ids.sort_unstable();
        }

        self.vms_by_machine.clear();
        for (&id, vm) in &self.vms {
            if let Some(machine) = vm.machine {
                self.vms_by_machine.entry(machine).or_default().push(id);
            }
        }
        for ids in self.vms_by_machine.values_mut() {
            ids.sort_unstable();
        }

        self.tasks_by_sla.clear();
        for (&task, record) in &self.tasks {
            self.tasks_by_sla.entry(record.sla).or_default().insert(task);
        }

        self.util_cache.clear();
    }

    // ── Lookups ───────────────────────────────────────────────────

    pub fn machine(&self, id: MachineId) -> Option<&MachineSnapshot> {
        self.machines.get(&id)
    }

    pub fn vm(&self, id: VmId) -> Option<&VmSnapshot> {
        self.vms.get(&id)
    }

    /// Cached machine snapshot, fetching from the host on a miss.
    /// Returns `None` when the host query fails; callers treat that
    /// as "not eligible this tick".
    pub fn machine_info(
        &mut self,
        host: &mut dyn SimHost,
        id: MachineId,
    ) -> Option<&MachineSnapshot> {
        if !self.machines.contains_key(&id) {
            match host.machine_info(id) {
                Ok(snap) => {
                    self.by_cpu.entry(snap.cpu).or_default().push(id);
                    self.machines.insert(id, snap);
                }
                Err(e) => {
                    trace!(machine = %id, error = %e, "machine fetch failed");
                    return None;
                }
            }
        }
        self.machines.get(&id)
    }

    /// Cached VM snapshot, fetching from the host on a miss.
    pub fn vm_info(&mut self, host: &mut dyn SimHost, id: VmId) -> Option<&VmSnapshot> {
        if !self.vms.contains_key(&id) {
            match host.vm_info(id) {
                Ok(snap) => {
                    if let Some(machine) = snap.machine {
                        self.vms_by_machine.entry(machine).or_default().push(id);
                    }
                    self.vms.insert(id, snap);
                }
                Err(e) => {
                    trace!(vm = %id, error = %e, "vm fetch failed");
                    return None;
                }
            }
        }
        self.vms.get(&id)
    }

    /// Machines currently in S0, in id order.
    pub fn active_machines(&self) -> Vec<MachineId> {
        let mut ids: Vec<MachineId> = self
            .machines
            .iter()
            .filter(|(_, m)| m.s_state.is_on())
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn machines_with_cpu(&self, cpu: CpuFamily) -> &[MachineId] {
        self.by_cpu.get(&cpu).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn vms_on(&self, machine: MachineId) -> &[VmId] {
        self.vms_by_machine
            .get(&machine)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn vm_of_task(&self, task: TaskId) -> Option<VmId> {
        self.tasks.get(&task).map(|r| r.vm)
    }

    pub fn sla_of_task(&self, task: TaskId) -> Option<SlaClass> {
        self.tasks.get(&task).map(|r| r.sla)
    }

    pub fn tasks_with_sla(&self, sla: SlaClass) -> Vec<TaskId> {
        self.tasks_by_sla
            .get(&sla)
            .map(|set| {
                let mut ids: Vec<TaskId> = set.iter().copied().collect();
                ids.sort_unstable();
                ids
            })
            .unwrap_or_default()
    }

    /// All tracked task ids, in id order.
    pub fn all_tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.tasks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Active tasks across every VM hosted on `machine`.
    pub fn task_count_on(&self, machine: MachineId) -> u32 {
        self.vms_on(machine)
            .iter()
            .filter_map(|vm| self.vms.get(vm))
            .map(|vm| vm.active_tasks.len() as u32)
            .sum()
    }

    /// Whether any VM on `machine` holds an SLA0/SLA1 task.
    pub fn has_critical_tasks(&self, machine: MachineId) -> bool {
        self.vms_on(machine)
            .iter()
            .filter_map(|vm| self.vms.get(vm))
            .flat_map(|vm| vm.active_tasks.iter())
            .any(|task| {
                self.tasks
                    .get(task)
                    .is_some_and(|r| r.sla.is_critical())
            })
    }

    /// Aggregate memory demand of the tasks on one VM, in units.
    pub fn vm_memory_demand(&self, vm: VmId) -> u64 {
        self.vms
            .get(&vm)
            .map(|snapshot| {
                snapshot
                    .active_tasks
                    .iter()
                    .filter_map(|t| self.tasks.get(t))
                    .map(|r| r.memory)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Whether any task on one VM demands a GPU-capable host.
    pub fn vm_needs_gpu(&self, vm: VmId) -> bool {
        self.vms
            .get(&vm)
            .map(|snapshot| {
                snapshot
                    .active_tasks
                    .iter()
                    .filter_map(|t| self.tasks.get(t))
                    .any(|r| r.gpu)
            })
            .unwrap_or(false)
    }

    /// Whether a particular VM holds any SLA0/SLA1 task.
    pub fn vm_has_critical_tasks(&self, vm: VmId) -> bool {
        self.vms
            .get(&vm)
            .map(|snapshot| {
                snapshot
                    .active_tasks
                    .iter()
                    .filter_map(|t| self.tasks.get(t))
                    .any(|r| r.sla.is_critical())
            })
            .unwrap_or(false)
    }

    /// Whether any task on `machine` belongs to a compute-heavy class.
    pub fn has_compute_heavy_tasks(&self, machine: MachineId) -> bool {
        self.vms_on(machine)
            .iter()
            .filter_map(|vm| self.vms.get(vm))
            .flat_map(|vm| vm.active_tasks.iter())
            .any(|task| {
                self.tasks
                    .get(task)
                    .is_some_and(|r| r.kind.is_compute_heavy())
            })
    }

    /// Whether any VM on `machine` is mid-migration.
    pub fn has_migrating_vms(&self, machine: MachineId) -> bool {
        self.vms_on(machine)
            .iter()
            .filter_map(|vm| self.vms.get(vm))
            .any(|vm| vm.migrating)
    }

    /// Active-task count over core count, memoized until the next
    /// refresh or a mutation touching the machine.
    pub fn utilization(&mut self, machine: MachineId) -> f64 {
        if let Some(&cached) = self.util_cache.get(&machine) {
            return cached;
        }
        let cores = match self.machines.get(&machine) {
            Some(m) if m.cores > 0 => m.cores as f64,
            _ => return 0.0,
        };
        let util = self.task_count_on(machine) as f64 / cores;
        self.util_cache.insert(machine, util);
        util
    }

    // ── Mutation notes ────────────────────────────────────────────
    //
    // Callbacks record the effects of their own host calls here so
    // the indices stay coherent until the next full refresh (I6).

    pub fn register_vm(&mut self, snapshot: VmSnapshot) {
        if let Some(machine) = snapshot.machine {
            let ids = self.vms_by_machine.entry(machine).or_default();
            if !ids.contains(&snapshot.id) {
                ids.push(snapshot.id);
            }
            self.util_cache.remove(&machine);
        }
        self.vms.insert(snapshot.id, snapshot);
    }

    pub fn remove_vm(&mut self, vm: VmId) {
        if let Some(snapshot) = self.vms.remove(&vm) {
            if let Some(machine) = snapshot.machine {
                if let Some(ids) = self.vms_by_machine.get_mut(&machine) {
                    ids.retain(|&id| id != vm);
                }
                self.util_cache.remove(&machine);
            }
            for task in snapshot.active_tasks {
                self.drop_task_record(task);
            }
        }
    }

    /// Record a completed VM move: host reference, per-machine memory
    /// and task accounting, and both machines' utilization caches.
    pub fn note_vm_moved(&mut self, vm: VmId, to: MachineId) {
        let (from, moved_tasks, moved_memory) = {
            let Some(snapshot) = self.vms.get_mut(&vm) else {
                return;
            };
            let from = snapshot.machine;
            snapshot.machine = Some(to);
            let moved_tasks = snapshot.active_tasks.len() as u32;
            let moved_memory: u64 = snapshot
                .active_tasks
                .iter()
                .filter_map(|t| self.tasks.get(t))
                .map(|r| r.memory)
                .sum();
            (from, moved_tasks, moved_memory)
        };

        if let Some(from) = from {
            if let Some(ids) = self.vms_by_machine.get_mut(&from) {
                ids.retain(|&id| id != vm);
            }
            if let Some(m) = self.machines.get_mut(&from) {
                m.memory_used = m.memory_used.saturating_sub(moved_memory);
                m.active_tasks = m.active_tasks.saturating_sub(moved_tasks);
            }
            self.util_cache.remove(&from);
        }
        let ids = self.vms_by_machine.entry(to).or_default();
        if !ids.contains(&vm) {
            ids.push(vm);
        }
        if let Some(m) = self.machines.get_mut(&to) {
            m.memory_used += moved_memory;
            m.active_tasks += moved_tasks;
        }
        self.util_cache.remove(&to);
    }

    pub fn note_vm_migrating(&mut self, vm: VmId, migrating: bool) {
        if let Some(snapshot) = self.vms.get_mut(&vm) {
            snapshot.migrating = migrating;
        }
    }

    pub fn note_machine_sstate(&mut self, machine: MachineId, state: SState) {
        if let Some(m) = self.machines.get_mut(&machine) {
            m.s_state = state;
        }
    }

    pub fn note_machine_pstate(&mut self, machine: MachineId, pstate: PState) {
        if let Some(m) = self.machines.get_mut(&machine) {
            m.p_state = pstate;
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn note_task_assigned(
        &mut self,
        task: TaskId,
        vm: VmId,
        sla: SlaClass,
        memory: u64,
        gpu: bool,
        kind: TaskKind,
    ) {
        self.tasks.insert(
            task,
            TaskRecord {
                vm,
                sla,
                memory,
                gpu,
                kind,
            },
        );
        self.tasks_by_sla.entry(sla).or_default().insert(task);
        if let Some(snapshot) = self.vms.get_mut(&vm) {
            if !snapshot.active_tasks.contains(&task) {
                snapshot.active_tasks.push(task);
            }
            if let Some(machine) = snapshot.machine {
                if let Some(m) = self.machines.get_mut(&machine) {
                    m.memory_used += memory;
                    m.active_tasks += 1;
                }
                self.util_cache.remove(&machine);
            }
        }
    }

    pub fn note_task_removed(&mut self, task: TaskId) {
        self.drop_task_record(task);
    }

    fn drop_task_record(&mut self, task: TaskId) {
        let Some(record) = self.tasks.remove(&task) else {
            return;
        };
        if let Some(set) = self.tasks_by_sla.get_mut(&record.sla) {
            set.remove(&task);
        }
        if let Some(snapshot) = self.vms.get_mut(&record.vm) {
            snapshot.active_tasks.retain(|&t| t != task);
            if let Some(machine) = snapshot.machine {
                if let Some(m) = self.machines.get_mut(&machine) {
                    m.memory_used = m.memory_used.saturating_sub(record.memory);
                    m.active_tasks = m.active_tasks.saturating_sub(1);
                }
                self.util_cache.remove(&machine);
            }
        }
    }

    pub fn machine_ids(&self) -> Vec<MachineId> {
        let mut ids: Vec<MachineId> = self.machines.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn vm_ids(&self) -> Vec<VmId> {
        let mut ids: Vec<VmId> = self.vms.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volt_core::types::{TaskKind, VmKind};
    use volt_core::{HostError, HostResult, Priority, TaskSnapshot};

    /// Minimal host backed by plain maps; entries in `failing` raise
    /// on query to exercise the swallow-and-omit path.
    struct MapHost {
        machines: HashMap<MachineId, MachineSnapshot>,
        vms: HashMap<VmId, VmSnapshot>,
        failing: HashSet<u32>,
        now: SimTime,
    }

    impl MapHost {
        fn new() -> Self {
            Self {
                machines: HashMap::new(),
                vms: HashMap::new(),
                failing: HashSet::new(),
                now: 0,
            }
        }

        fn with_machine(mut self, snap: MachineSnapshot) -> Self {
            self.machines.insert(snap.id, snap);
            self
        }
    }

    impl SimHost for MapHost {
        fn machine_count(&mut self) -> u32 {
            self.machines.len() as u32
        }

        fn machine_info(&mut self, machine: MachineId) -> HostResult<MachineSnapshot> {
            if self.failing.contains(&machine.0) {
                return Err(HostError::UnknownMachine(machine));
            }
            self.machines
                .get(&machine)
                .cloned()
                .ok_or(HostError::UnknownMachine(machine))
        }

        fn machine_set_state(&mut self, _: MachineId, _: SState) -> HostResult<()> {
            Ok(())
        }

        fn machine_set_core_perf(&mut self, _: MachineId, _: u32, _: PState) -> HostResult<()> {
            Ok(())
        }

        fn vm_create(&mut self, _: VmKind, _: CpuFamily) -> HostResult<VmId> {
            Err(HostError::Rejected("not supported".into()))
        }

        fn vm_attach(&mut self, _: VmId, _: MachineId) -> HostResult<()> {
            Ok(())
        }

        fn vm_info(&mut self, vm: VmId) -> HostResult<VmSnapshot> {
            self.vms.get(&vm).cloned().ok_or(HostError::UnknownVm(vm))
        }

        fn vm_add_task(&mut self, _: VmId, _: TaskId, _: Priority) -> HostResult<()> {
            Ok(())
        }

        fn vm_remove_task(&mut self, _: VmId, _: TaskId) -> HostResult<()> {
            Ok(())
        }

        fn vm_migrate(&mut self, _: VmId, _: MachineId) -> HostResult<()> {
            Ok(())
        }

        fn vm_pending_migration(&mut self, _: VmId) -> bool {
            false
        }

        fn vm_shutdown(&mut self, _: VmId) -> HostResult<()> {
            Ok(())
        }

        fn task_info(&mut self, task: TaskId) -> HostResult<TaskSnapshot> {
            Err(HostError::UnknownTask(task))
        }

        fn task_remaining_instructions(&mut self, task: TaskId) -> HostResult<u64> {
            Err(HostError::UnknownTask(task))
        }

        fn task_set_priority(&mut self, _: TaskId, _: Priority) -> HostResult<()> {
            Ok(())
        }

        fn cluster_energy(&mut self) -> f64 {
            0.0
        }

        fn sla_report(&mut self, _: SlaClass) -> f64 {
            0.0
        }

        fn now(&mut self) -> SimTime {
            self.now
        }
    }

    fn machine(id: u32, cpu: CpuFamily, cores: u32) -> MachineSnapshot {
        MachineSnapshot {
            id: MachineId(id),
            cpu,
            cores,
            memory_total: 16384,
            memory_used: 0,
            has_gpu: false,
            s_state: SState::S0,
            p_state: PState::P1,
            active_tasks: 0,
            mips: [1000, 800, 600, 400],
        }
    }

    fn vm(id: u32, machine: u32) -> VmSnapshot {
        VmSnapshot {
            id: VmId(id),
            kind: VmKind::Linux,
            cpu: CpuFamily::X86,
            machine: Some(MachineId(machine)),
            active_tasks: Vec::new(),
            migrating: false,
        }
    }

    #[test]
    fn populate_builds_cpu_index() {
        let mut host = MapHost::new()
            .with_machine(machine(0, CpuFamily::X86, 8))
            .with_machine(machine(1, CpuFamily::Arm, 4))
            .with_machine(machine(2, CpuFamily::X86, 8));
        let mut fleet = FleetModel::new(1_000_000);
        fleet.populate(&mut host);

        assert_eq!(
            fleet.machines_with_cpu(CpuFamily::X86),
            &[MachineId(0), MachineId(2)]
        );
        assert_eq!(fleet.machines_with_cpu(CpuFamily::Arm), &[MachineId(1)]);
        assert!(fleet.machines_with_cpu(CpuFamily::Power).is_empty());
    }

    #[test]
    fn refresh_is_bounded_by_interval() {
        let mut host = MapHost::new().with_machine(machine(0, CpuFamily::X86, 8));
        let mut fleet = FleetModel::new(1_000_000);

        assert!(fleet.refresh(&mut host, 0));
        assert!(!fleet.refresh(&mut host, 500_000));
        assert!(fleet.refresh(&mut host, 1_000_000));
    }

    #[test]
    fn failing_machine_is_omitted_not_fatal() {
        let mut host = MapHost::new()
            .with_machine(machine(0, CpuFamily::X86, 8))
            .with_machine(machine(1, CpuFamily::X86, 8));
        host.failing.insert(1);

        let mut fleet = FleetModel::new(0);
        fleet.populate(&mut host);

        assert!(fleet.machine(MachineId(0)).is_some());
        assert!(fleet.machine(MachineId(1)).is_none());
        assert_eq!(fleet.machines_with_cpu(CpuFamily::X86), &[MachineId(0)]);
    }

    #[test]
    fn task_notes_keep_indices_coherent() {
        let mut host = MapHost::new().with_machine(machine(0, CpuFamily::X86, 4));
        let mut fleet = FleetModel::new(0);
        fleet.populate(&mut host);
        fleet.register_vm(vm(0, 0));

        fleet.note_task_assigned(TaskId(1), VmId(0), SlaClass::Sla0, 8, false, TaskKind::Web);
        fleet.note_task_assigned(TaskId(2), VmId(0), SlaClass::Sla2, 4, true, TaskKind::Web);

        assert_eq!(fleet.vm_of_task(TaskId(1)), Some(VmId(0)));
        assert_eq!(fleet.tasks_with_sla(SlaClass::Sla0), vec![TaskId(1)]);
        assert_eq!(fleet.task_count_on(MachineId(0)), 2);
        assert!(fleet.has_critical_tasks(MachineId(0)));
        assert_eq!(fleet.machine(MachineId(0)).unwrap().memory_used, 12);
        assert_eq!(fleet.utilization(MachineId(0)), 0.5);

        fleet.note_task_removed(TaskId(1));
        assert_eq!(fleet.vm_of_task(TaskId(1)), None);
        assert!(!fleet.has_critical_tasks(MachineId(0)));
        assert_eq!(fleet.machine(MachineId(0)).unwrap().memory_used, 4);
        assert_eq!(fleet.utilization(MachineId(0)), 0.25);
    }

    #[test]
    fn vm_move_transfers_membership_and_memory() {
        let mut host = MapHost::new()
            .with_machine(machine(0, CpuFamily::X86, 4))
            .with_machine(machine(1, CpuFamily::X86, 4));
        let mut fleet = FleetModel::new(0);
        fleet.populate(&mut host);
        fleet.register_vm(vm(0, 0));
        fleet.note_task_assigned(TaskId(1), VmId(0), SlaClass::Sla2, 10, false, TaskKind::Web);

        fleet.note_vm_moved(VmId(0), MachineId(1));

        assert!(fleet.vms_on(MachineId(0)).is_empty());
        assert_eq!(fleet.vms_on(MachineId(1)), &[VmId(0)]);
        assert_eq!(fleet.vm(VmId(0)).unwrap().machine, Some(MachineId(1)));
        assert_eq!(fleet.machine(MachineId(0)).unwrap().memory_used, 0);
        assert_eq!(fleet.machine(MachineId(1)).unwrap().memory_used, 10);
        // The VM appears on exactly one machine's list.
        let listed: usize = fleet
            .machine_ids()
            .iter()
            .map(|&m| fleet.vms_on(m).iter().filter(|&&v| v == VmId(0)).count())
            .sum();
        assert_eq!(listed, 1);
    }

    #[test]
    fn refresh_drops_tasks_missing_from_vm_snapshots() {
        let mut host = MapHost::new().with_machine(machine(0, CpuFamily::X86, 4));
        let mut vm0 = vm(0, 0);
        vm0.active_tasks.push(TaskId(7));
        host.vms.insert(VmId(0), vm0);

        let mut fleet = FleetModel::new(0);
        fleet.populate(&mut host);
        fleet.register_vm(vm(0, 0));
        fleet.note_task_assigned(TaskId(7), VmId(0), SlaClass::Sla1, 2, false, TaskKind::Web);
        fleet.note_task_assigned(TaskId(8), VmId(0), SlaClass::Sla1, 2, false, TaskKind::Web);

        // Host only knows task 7; refresh drops the stale task 8.
        fleet.refresh(&mut host, 10);
        assert_eq!(fleet.vm_of_task(TaskId(7)), Some(VmId(0)));
        assert_eq!(fleet.vm_of_task(TaskId(8)), None);
    }

    #[test]
    fn snapshot_lookups_fetch_on_miss() {
        let mut host = MapHost::new().with_machine(machine(0, CpuFamily::X86, 8));
        host.vms.insert(VmId(3), vm(3, 0));
        let mut fleet = FleetModel::new(0);

        // Nothing populated yet; both lookups fall through to the host.
        assert!(fleet.machine_info(&mut host, MachineId(0)).is_some());
        assert!(fleet.vm_info(&mut host, VmId(3)).is_some());
        assert_eq!(fleet.vms_on(MachineId(0)), &[VmId(3)]);

        // A failing entity is simply reported absent.
        host.failing.insert(1);
        host.machines.insert(MachineId(1), machine(1, CpuFamily::Arm, 4));
        assert!(fleet.machine_info(&mut host, MachineId(1)).is_none());
    }

    #[test]
    fn utilization_of_unknown_machine_is_zero() {
        let mut fleet = FleetModel::new(0);
        assert_eq!(fleet.utilization(MachineId(99)), 0.0);
    }

    #[test]
    fn active_machines_filters_sleepers() {
        let mut sleeping = machine(1, CpuFamily::X86, 8);
        sleeping.s_state = SState::S5;
        let mut host = MapHost::new()
            .with_machine(machine(0, CpuFamily::X86, 8))
            .with_machine(sleeping);

        let mut fleet = FleetModel::new(0);
        fleet.populate(&mut host);
        assert_eq!(fleet.active_machines(), vec![MachineId(0)]);
    }
}
