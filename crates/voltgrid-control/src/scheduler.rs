//! The scheduler — periodic tick and event callbacks.

use std::collections::HashSet;

use tracing::{debug, error, info, trace, warn};

use volt_core::types::{
    CpuFamily, FinalReport, MachineId, PState, Priority, SState, SimTime, SlaClass, TaskId, VmId,
    VmKind, VmSnapshot,
};
use volt_core::{SchedulerConfig, SchedulerHooks, SimHost};
use voltgrid_fleet::FleetModel;
use voltgrid_migration::MigrationManager;
use voltgrid_placement::PlacementEngine;
use voltgrid_power::{dvfs_target, DvfsInputs, PowerError, PowerManager};

/// The scheduling and power-management engine.
///
/// One instance is created before the simulation starts and torn down
/// by `simulation_complete`; nothing here relies on static
/// initialization order.
pub struct Scheduler {
    cfg: SchedulerConfig,
    fleet: FleetModel,
    power: PowerManager,
    migration: MigrationManager,
    placement: PlacementEngine,
    /// Tasks currently flagged at SLA risk; their hosts pin P0.
    at_risk: HashSet<TaskId>,
    last_consolidation: SimTime,
    /// Latched on an invariant violation. Once set, the engine stops
    /// issuing state requests and only absorbs events (the final
    /// report still prints).
    fatal: bool,
}

impl Scheduler {
    pub fn new(cfg: SchedulerConfig) -> Self {
        let fleet = FleetModel::new(cfg.refresh_interval_us);
        let power = PowerManager::new(cfg.wake_pstate);
        let migration = MigrationManager::new(cfg.migration_memory_overhead, cfg.high_watermark);
        let placement = PlacementEngine::new(cfg.urgency_threshold_us, cfg.high_watermark);
        Self {
            cfg,
            fleet,
            power,
            migration,
            placement,
            at_risk: HashSet::new(),
            last_consolidation: 0,
            fatal: false,
        }
    }

    /// Read-only view of the fleet, for integration tests and the
    /// host binary.
    pub fn fleet(&self) -> &FleetModel {
        &self.fleet
    }

    pub fn pending_tasks(&self) -> usize {
        self.placement.pending_len()
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    fn invariant_violated(&mut self, what: &str) {
        error!(what, "invariant violated; engine latched fatal");
        self.fatal = true;
    }

    // ── Policy passes ─────────────────────────────────────────────

    /// Whether any task on `machine` carries the at-risk flag.
    fn machine_has_risk(&self, machine: MachineId) -> bool {
        self.fleet
            .vms_on(machine)
            .iter()
            .filter_map(|&vm| self.fleet.vm(vm))
            .flat_map(|vm| vm.active_tasks.iter())
            .any(|task| self.at_risk.contains(task))
    }

    /// Re-evaluate the DVFS policy for one machine.
    fn apply_dvfs(&mut self, host: &mut dyn SimHost, machine: MachineId) {
        if !self.power.is_active(machine) {
            return;
        }
        let inputs = DvfsInputs {
            utilization: self.fleet.utilization(machine),
            has_critical: self.fleet.has_critical_tasks(machine),
            has_compute_heavy: self.fleet.has_compute_heavy_tasks(machine),
            has_at_risk: self.machine_has_risk(machine),
        };
        let target = dvfs_target(inputs);
        self.power.set_perf(&mut self.fleet, host, machine, target);
    }

    /// Scan every tracked task for SLA risk: a task is at risk when
    /// the MIPS needed to make its deadline exceed what its host
    /// currently delivers, scaled by the class's safety factor.
    /// At-risk tasks are promoted to high priority and their hosts
    /// boosted to P0; tasks that recovered drop off the risk set.
    fn scan_sla_risk(&mut self, host: &mut dyn SimHost, now: SimTime) {
        for task in self.fleet.all_tasks() {
            let Some(vm) = self.fleet.vm_of_task(task) else {
                continue;
            };
            let Some(machine) = self.fleet.vm(vm).and_then(|s| s.machine) else {
                continue;
            };
            if !self.power.is_active(machine) {
                continue;
            }
            let (remaining, info) = match (
                host.task_remaining_instructions(task),
                host.task_info(task),
            ) {
                (Ok(r), Ok(i)) => (r, i),
                // Not eligible this tick.
                _ => continue,
            };
            let Some(snapshot) = self.fleet.machine(machine) else {
                continue;
            };
            let current_mips = snapshot.current_mips() as f64;

            let headroom = info.target_completion.saturating_sub(now);
            let at_risk = if headroom == 0 {
                remaining > 0
            } else {
                let required = remaining as f64 / headroom as f64;
                required > current_mips * info.sla.risk_factor()
            };

            if at_risk {
                if self.at_risk.insert(task) {
                    debug!(task = %task, machine = %machine, sla = %info.sla, "task at sla risk");
                }
                self.power
                    .set_perf(&mut self.fleet, host, machine, PState::P0);
                if let Err(e) = host.task_set_priority(task, Priority::High) {
                    trace!(task = %task, error = %e, "priority boost failed");
                }
            } else {
                self.at_risk.remove(&task);
            }
        }
    }

    /// Shut down the machine's empty VMs and request the configured
    /// sleep state. `enforce_floor` keeps a minimum number of active
    /// machines (the opportunistic idle path); the consolidation pass
    /// runs without it.
    fn try_power_down(&mut self, host: &mut dyn SimHost, machine: MachineId, enforce_floor: bool) {
        if self.fatal
            || !self.power.is_active(machine)
            || self.power.is_pending(machine)
            || self.fleet.task_count_on(machine) > 0
            || self.fleet.has_migrating_vms(machine)
            || self.migration.is_migration_target(machine)
        {
            return;
        }
        if enforce_floor {
            let active = self.power.active_machines().count() as u32;
            if active <= self.cfg.initial_active_machines {
                return;
            }
        }
        if self.is_last_eligible_host(machine) {
            trace!(machine = %machine, "kept awake as last host of its cpu family");
            return;
        }

        // Empty VMs go first; a machine never sleeps under a VM.
        for vm in self.fleet.vms_on(machine).to_vec() {
            if let Err(e) = host.vm_shutdown(vm) {
                warn!(vm = %vm, error = %e, "vm shutdown failed");
                return;
            }
            self.fleet.remove_vm(vm);
        }

        let target = self.cfg.empty_machine_state;
        match self
            .power
            .request_state(&mut self.fleet, host, machine, target)
        {
            Ok(()) => info!(machine = %machine, state = %target, "idle machine powering down"),
            Err(PowerError::Busy(_)) | Err(PowerError::Unsafe(_)) => {}
            Err(e) => debug!(machine = %machine, error = %e, "power down skipped"),
        }
    }

    /// A machine is the last eligible host for its CPU family when no
    /// other active machine shares the family while VMs of that family
    /// still exist. Sleeping it would strand that task class.
    fn is_last_eligible_host(&self, machine: MachineId) -> bool {
        let Some(cpu) = self.fleet.machine(machine).map(|m| m.cpu) else {
            return false;
        };
        let other_active = self
            .power
            .active_machines()
            .any(|m| m != machine && self.fleet.machine(m).map(|s| s.cpu) == Some(cpu));
        if other_active {
            return false;
        }
        self.fleet
            .vm_ids()
            .iter()
            .any(|&vm| self.fleet.vm(vm).map(|s| s.cpu) == Some(cpu))
    }

    /// Consolidation: walk the active machines from least to most
    /// loaded; anything under the low watermark with no critical work
    /// and no in-flight migrations gets its VMs evacuated (to already
    /// active machines only) and, once drained, is put to sleep.
    fn run_consolidation(&mut self, host: &mut dyn SimHost, now: SimTime) {
        if now.saturating_sub(self.last_consolidation) < self.cfg.consolidation_interval_us {
            return;
        }
        self.last_consolidation = now;

        let mut candidates: Vec<(f64, MachineId)> = self
            .power
            .active_machines()
            .collect::<Vec<_>>()
            .into_iter()
            .map(|m| (self.fleet.utilization(m), m))
            .collect();
        candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        for (util, machine) in candidates {
            if util >= self.cfg.low_watermark {
                break;
            }
            if self.fleet.has_critical_tasks(machine)
                || self.fleet.has_migrating_vms(machine)
                || self.power.is_pending(machine)
            {
                continue;
            }

            let moved = self.migration.evacuate(
                &mut self.fleet,
                &self.power,
                host,
                now,
                machine,
            );
            if moved > 0 {
                debug!(machine = %machine, moved, "consolidation evacuations started");
            }
            if self.fleet.task_count_on(machine) == 0 {
                self.try_power_down(host, machine, false);
            }
        }
    }

    /// Aggregate-load check: when the active fleet as a whole runs
    /// past the high watermark, bring one more machine up ahead of
    /// demand. Pending tasks do not trigger blind wakes; admission
    /// wakes machines family-aware.
    fn check_cluster_load(&mut self, host: &mut dyn SimHost) {
        let mut tasks = 0u32;
        let mut cores = 0u32;
        for machine in self.power.active_machines().collect::<Vec<_>>() {
            if let Some(snapshot) = self.fleet.machine(machine) {
                cores += snapshot.cores;
            }
            tasks += self.fleet.task_count_on(machine);
        }
        if cores == 0 {
            return;
        }
        let load = f64::from(tasks) / f64::from(cores);
        if load <= self.cfg.high_watermark {
            return;
        }

        for machine in self.fleet.machine_ids() {
            if self.power.is_pending(machine) || self.power.is_active(machine) {
                continue;
            }
            let asleep = self
                .fleet
                .machine(machine)
                .is_some_and(|m| !m.s_state.is_on());
            if !asleep {
                continue;
            }
            match self
                .power
                .request_state(&mut self.fleet, host, machine, SState::S0)
            {
                Ok(()) => {
                    info!(machine = %machine, load, "waking spare capacity for cluster load");
                    return;
                }
                Err(e) => trace!(machine = %machine, error = %e, "spare wake failed"),
            }
        }
    }

    /// Create a VM on a machine that just woke up empty, so placement
    /// always has a landing spot per represented family.
    fn ensure_vm_on(&mut self, host: &mut dyn SimHost, machine: MachineId) {
        if !self.fleet.vms_on(machine).is_empty() {
            return;
        }
        let Some(cpu) = self.fleet.machine(machine).map(|m| m.cpu) else {
            return;
        };
        self.create_vm_on(host, machine, cpu);
    }

    fn create_vm_on(&mut self, host: &mut dyn SimHost, machine: MachineId, cpu: CpuFamily) {
        let kind = default_kind_for(cpu);
        let vm = match host.vm_create(kind, cpu) {
            Ok(vm) => vm,
            Err(e) => {
                warn!(machine = %machine, error = %e, "vm create failed");
                return;
            }
        };
        if let Err(e) = host.vm_attach(vm, machine) {
            warn!(vm = %vm, machine = %machine, error = %e, "vm attach failed");
            return;
        }
        self.fleet.register_vm(VmSnapshot {
            id: vm,
            kind,
            cpu,
            machine: Some(machine),
            active_tasks: Vec::new(),
            migrating: false,
        });
        debug!(vm = %vm, machine = %machine, kind = %kind, "vm ready");
    }

    /// Escalation for a critical task sharing an oversubscribed host:
    /// move non-critical co-tenants elsewhere. Whole VMs without
    /// critical work migrate; non-critical tasks inside the warned
    /// task's own VM are re-placed via the safe remove/add sequence.
    fn evacuate_cotenants(
        &mut self,
        host: &mut dyn SimHost,
        now: SimTime,
        machine: MachineId,
        warned_vm: VmId,
    ) {
        for vm in self.fleet.vms_on(machine).to_vec() {
            if vm == warned_vm {
                continue;
            }
            let migrating = self.fleet.vm(vm).map(|s| s.migrating).unwrap_or(true);
            if migrating || self.fleet.vm_has_critical_tasks(vm) {
                continue;
            }
            match self
                .migration
                .relocate(&mut self.fleet, &mut self.power, host, now, vm)
            {
                Ok(outcome) => {
                    debug!(vm = %vm, ?outcome, "co-tenant vm evacuation");
                }
                Err(e) => trace!(vm = %vm, error = %e, "co-tenant evacuation failed"),
            }
        }

        // Non-critical tasks inside the warned VM: safe remove/add,
        // never while the VM is migrating.
        let vm_migrating = self
            .fleet
            .vm(warned_vm)
            .map(|s| s.migrating)
            .unwrap_or(true);
        if vm_migrating {
            return;
        }
        let tasks: Vec<TaskId> = self
            .fleet
            .vm(warned_vm)
            .map(|s| s.active_tasks.clone())
            .unwrap_or_default();
        for task in tasks {
            let critical = self
                .fleet
                .sla_of_task(task)
                .map(|sla| sla.is_critical())
                .unwrap_or(true);
            if critical {
                continue;
            }
            if let Err(e) = host.vm_remove_task(warned_vm, task) {
                trace!(task = %task, error = %e, "co-tenant remove failed");
                continue;
            }
            self.fleet.note_task_removed(task);
            match self.placement.place_avoiding(
                &mut self.fleet,
                &mut self.power,
                host,
                now,
                task,
                machine,
            ) {
                Ok(outcome) => debug!(task = %task, ?outcome, "co-tenant task re-placed"),
                Err(e) => warn!(task = %task, error = %e, "co-tenant re-place failed"),
            }
        }
    }
}

/// LINUX boots everywhere; POWER machines get their native AIX guest.
fn default_kind_for(cpu: CpuFamily) -> VmKind {
    match cpu {
        CpuFamily::Power => VmKind::Aix,
        _ => VmKind::Linux,
    }
}

impl SchedulerHooks for Scheduler {
    fn init(&mut self, host: &mut dyn SimHost) {
        info!("scheduler initializing");
        self.fleet.populate(host);

        let machines = self.fleet.machine_ids();
        let initial = self.cfg.initial_active_machines as usize;
        let mut seen_families: HashSet<CpuFamily> = HashSet::new();

        for (idx, machine) in machines.iter().copied().enumerate() {
            let Some(snapshot) = self.fleet.machine(machine) else {
                continue;
            };
            let cpu = snapshot.cpu;
            let on = snapshot.s_state.is_on();

            if idx < initial {
                if on {
                    self.power.mark_active(machine);
                    let wake = self.cfg.wake_pstate;
                    self.power.set_perf(&mut self.fleet, host, machine, wake);
                    if seen_families.insert(cpu) {
                        self.create_vm_on(host, machine, cpu);
                    }
                } else {
                    // VM creation happens when the wake completes.
                    if let Err(e) =
                        self.power
                            .request_state(&mut self.fleet, host, machine, SState::S0)
                    {
                        warn!(machine = %machine, error = %e, "initial wake failed");
                    }
                }
            } else if on {
                let park = self.cfg.empty_machine_state;
                if let Err(e) = self
                    .power
                    .request_state(&mut self.fleet, host, machine, park)
                {
                    warn!(machine = %machine, error = %e, "initial park failed");
                }
            }
        }
        info!(
            machines = machines.len(),
            initial = self.cfg.initial_active_machines,
            "scheduler initialized"
        );
    }

    fn new_task(&mut self, host: &mut dyn SimHost, now: SimTime, task: TaskId) {
        if self.fatal {
            return;
        }
        match self
            .placement
            .place(&mut self.fleet, &mut self.power, host, now, task)
        {
            Ok(_) => {}
            Err(e) => warn!(task = %task, error = %e, "admission failed"),
        }
    }

    fn task_complete(&mut self, host: &mut dyn SimHost, now: SimTime, task: TaskId) {
        let Some(vm) = self.fleet.vm_of_task(task) else {
            warn!(task = %task, "completion for untracked task");
            return;
        };
        if self.fleet.vm(vm).is_none() {
            self.invariant_violated("task maps to a vm the fleet does not know");
            return;
        }
        let machine = self.fleet.vm(vm).and_then(|s| s.machine);

        self.fleet.note_task_removed(task);
        self.at_risk.remove(&task);
        trace!(task = %task, vm = %vm, "task complete");

        if self.fatal {
            return;
        }
        if let Some(machine) = machine {
            self.apply_dvfs(host, machine);
            self.try_power_down(host, machine, true);
        }
        self.placement
            .drain(&mut self.fleet, &mut self.power, host, now);
    }

    fn periodic_check(&mut self, host: &mut dyn SimHost, now: SimTime) {
        if self.fatal {
            return;
        }
        self.fleet.refresh(host, now);

        let active: Vec<MachineId> = self.power.active_machines().collect();
        for machine in active.iter().copied() {
            self.apply_dvfs(host, machine);
        }

        self.scan_sla_risk(host, now);

        for machine in active {
            if self.fleet.utilization(machine) > self.cfg.high_watermark {
                self.migration.migrate_from_overloaded(
                    &mut self.fleet,
                    &mut self.power,
                    host,
                    now,
                    machine,
                );
            }
        }

        self.run_consolidation(host, now);
        self.check_cluster_load(host);
        self.placement
            .drain(&mut self.fleet, &mut self.power, host, now);
    }

    fn migration_done(&mut self, host: &mut dyn SimHost, _now: SimTime, vm: VmId) {
        let ticket = self.migration.complete(&mut self.fleet, vm);
        if self.fatal {
            return;
        }
        if let Some(ticket) = ticket {
            self.apply_dvfs(host, ticket.source);
            self.apply_dvfs(host, ticket.target);
        }
    }

    fn state_change_done(&mut self, host: &mut dyn SimHost, now: SimTime, machine: MachineId) {
        let reached = self
            .power
            .on_state_complete(&mut self.fleet, host, machine);
        if self.fatal {
            return;
        }
        if reached == Some(SState::S0) {
            self.ensure_vm_on(host, machine);
            self.placement
                .drain(&mut self.fleet, &mut self.power, host, now);
        }
    }

    fn memory_warning(&mut self, host: &mut dyn SimHost, now: SimTime, machine: MachineId) {
        warn!(machine = %machine, "memory pressure");
        if self.fatal {
            return;
        }
        self.migration.memory_pressure(
            &mut self.fleet,
            &mut self.power,
            host,
            now,
            machine,
        );
        // Drain the pressured machine faster.
        self.power
            .set_perf(&mut self.fleet, host, machine, PState::P0);
    }

    fn sla_warning(&mut self, host: &mut dyn SimHost, now: SimTime, task: TaskId) {
        if self.fatal {
            return;
        }
        let Some(sla) = self.fleet.sla_of_task(task) else {
            debug!(task = %task, "sla warning for untracked task");
            return;
        };
        let Some(vm) = self.fleet.vm_of_task(task) else {
            return;
        };
        let Some(machine) = self.fleet.vm(vm).and_then(|s| s.machine) else {
            return;
        };
        info!(task = %task, machine = %machine, sla = %sla, "sla warning");

        match sla {
            SlaClass::Sla0 | SlaClass::Sla1 => {
                self.at_risk.insert(task);
                if let Err(e) = host.task_set_priority(task, Priority::High) {
                    trace!(task = %task, error = %e, "priority pin failed");
                }
                self.power
                    .set_perf(&mut self.fleet, host, machine, PState::P0);

                let cores = self.fleet.machine(machine).map(|m| m.cores).unwrap_or(0);
                if self.fleet.task_count_on(machine) > 2 * cores {
                    self.evacuate_cotenants(host, now, machine, vm);
                }
            }
            SlaClass::Sla2 => {
                self.at_risk.insert(task);
                if let Err(e) = host.task_set_priority(task, Priority::Mid) {
                    trace!(task = %task, error = %e, "priority raise failed");
                }
                self.power
                    .set_perf(&mut self.fleet, host, machine, PState::P0);
            }
            SlaClass::Sla3 => {
                debug!(task = %task, "best-effort task warned; recorded only");
            }
        }
    }

    fn simulation_complete(&mut self, host: &mut dyn SimHost, now: SimTime) -> FinalReport {
        info!(now, "simulation complete; shutting down");

        for vm in self.fleet.vm_ids() {
            let migrating = self.fleet.vm(vm).map(|s| s.migrating).unwrap_or(false);
            if migrating {
                warn!(vm = %vm, "left to the host: vm still migrating at shutdown");
                continue;
            }
            if let Err(e) = host.vm_shutdown(vm) {
                debug!(vm = %vm, error = %e, "vm shutdown failed");
            }
            self.fleet.remove_vm(vm);
        }

        if !self.fatal {
            for machine in self.fleet.machine_ids() {
                match self
                    .power
                    .request_state(&mut self.fleet, host, machine, SState::S5)
                {
                    Ok(()) => {}
                    Err(PowerError::Busy(_)) => {}
                    Err(e) => debug!(machine = %machine, error = %e, "final park failed"),
                }
            }
        }

        let report = FinalReport {
            sla_violations_pct: [
                host.sla_report(SlaClass::Sla0),
                host.sla_report(SlaClass::Sla1),
                host.sla_report(SlaClass::Sla2),
                // Best effort: no violation metric.
                0.0,
            ],
            total_energy_kwh: host.cluster_energy(),
            simulated_seconds: now as f64 / 1_000_000.0,
        };
        info!(
            sla0 = report.sla_violations_pct[0],
            sla1 = report.sla_violations_pct[1],
            sla2 = report.sla_violations_pct[2],
            energy_kwh = report.total_energy_kwh,
            "final report"
        );
        report
    }
}
