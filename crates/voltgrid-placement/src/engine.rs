//! Placement engine — admission, VM choice, and the pending queue.

use std::cmp::Ordering;

use tracing::{debug, info, trace, warn};

use volt_core::compat::{coerce_vm_kind, machine_fits_task};
use volt_core::types::{
    MachineId, PState, Priority, SState, SimTime, SlaClass, TaskId, TaskSnapshot, VmId, VmSnapshot,
};
use volt_core::SimHost;
use voltgrid_fleet::FleetModel;
use voltgrid_power::PowerManager;

use crate::error::{PlacementError, PlacementResult};

/// A task waiting for capacity, typically for a machine to finish
/// waking up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTask {
    pub task: TaskId,
    pub sla: SlaClass,
    pub enqueued_at: SimTime,
}

/// How an admission attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceOutcome {
    /// The task landed on a VM.
    Placed {
        vm: VmId,
        machine: MachineId,
        priority: Priority,
    },
    /// The task is parked in the pending queue; a wake-up may have
    /// been requested on its behalf.
    Deferred,
}

/// Chooses a VM for every arriving task and owns the pending queue.
pub struct PlacementEngine {
    /// Deadline headroom below which any task is promoted to high
    /// priority, in µs.
    urgency_threshold_us: SimTime,
    /// Utilization ceiling for hosts taking non-critical work.
    high_watermark: f64,
    pending: Vec<PendingTask>,
}

impl PlacementEngine {
    pub fn new(urgency_threshold_us: SimTime, high_watermark: f64) -> Self {
        Self {
            urgency_threshold_us,
            high_watermark,
            pending: Vec::new(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Priority a task runs at: its SLA's base priority, promoted to
    /// high when the deadline headroom has shrunk below the urgency
    /// threshold.
    pub fn priority_for(&self, task: &TaskSnapshot, now: SimTime) -> Priority {
        let headroom = task.target_completion.saturating_sub(now);
        if headroom < self.urgency_threshold_us {
            return Priority::High;
        }
        task.sla.base_priority()
    }

    /// Admit one task (§ new-task callback). On success the task is on
    /// a VM and, for high-priority work, its host runs at P0. When the
    /// only fitting host is still waking, the task is parked and
    /// `Deferred` is returned.
    pub fn place(
        &mut self,
        fleet: &mut FleetModel,
        power: &mut PowerManager,
        host: &mut dyn SimHost,
        now: SimTime,
        task: TaskId,
    ) -> PlacementResult<PlaceOutcome> {
        self.place_inner(fleet, power, host, now, task, None, true)
    }

    /// Admission variant that refuses to land the task on `avoid`.
    /// Used when evacuating co-tenants away from a pressured host.
    pub fn place_avoiding(
        &mut self,
        fleet: &mut FleetModel,
        power: &mut PowerManager,
        host: &mut dyn SimHost,
        now: SimTime,
        task: TaskId,
        avoid: MachineId,
    ) -> PlacementResult<PlaceOutcome> {
        self.place_inner(fleet, power, host, now, task, Some(avoid), true)
    }

    #[allow(clippy::too_many_arguments)]
    fn place_inner(
        &mut self,
        fleet: &mut FleetModel,
        power: &mut PowerManager,
        host: &mut dyn SimHost,
        now: SimTime,
        task: TaskId,
        avoid: Option<MachineId>,
        defer_on_miss: bool,
    ) -> PlacementResult<PlaceOutcome> {
        let mut info = host.task_info(task)?;
        // Coerce an incompatible kind/CPU request to the nearest
        // runnable combination.
        let wanted = info.vm_kind;
        info.vm_kind = coerce_vm_kind(info.vm_kind, info.cpu);
        if info.vm_kind != wanted {
            debug!(task = %task, from = %wanted, to = %info.vm_kind, "vm kind coerced");
        }

        let priority = self.priority_for(&info, now);

        if let Some((vm, machine)) = self.choose_vm(fleet, power, &info, priority, avoid) {
            return self.assign(fleet, power, host, &info, vm, machine, priority);
        }

        // No usable VM; pick a host machine and create one.
        if let Some(machine) = self.choose_machine(fleet, power, &info, avoid) {
            let vm = host.vm_create(info.vm_kind, info.cpu)?;
            host.vm_attach(vm, machine)?;
            fleet.register_vm(VmSnapshot {
                id: vm,
                kind: info.vm_kind,
                cpu: info.cpu,
                machine: Some(machine),
                active_tasks: Vec::new(),
                migrating: false,
            });
            debug!(vm = %vm, machine = %machine, kind = %info.vm_kind, "vm created");
            return self.assign(fleet, power, host, &info, vm, machine, priority);
        }

        // Nothing active fits. Wake a sleeper of the right family and
        // park the task until the machine reports in.
        self.wake_for(fleet, power, host, &info, avoid);
        if defer_on_miss {
            self.enqueue(task, info.sla, now);
            return Ok(PlaceOutcome::Deferred);
        }
        Err(PlacementError::Unavailable(task))
    }

    /// Rule (a)/(b): pick an existing resident VM.
    fn choose_vm(
        &self,
        fleet: &mut FleetModel,
        power: &PowerManager,
        info: &TaskSnapshot,
        priority: Priority,
        avoid: Option<MachineId>,
    ) -> Option<(VmId, MachineId)> {
        struct Candidate {
            vm: VmId,
            machine: MachineId,
            tasks: usize,
            util: f64,
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        for vm in fleet.vm_ids() {
            let Some(snapshot) = fleet.vm(vm) else {
                continue;
            };
            if snapshot.migrating || snapshot.kind != info.vm_kind || snapshot.cpu != info.cpu {
                continue;
            }
            let Some(machine) = snapshot.machine else {
                continue;
            };
            if Some(machine) == avoid || !power.is_active(machine) {
                continue;
            }
            let tasks = snapshot.active_tasks.len();
            let Some(m) = fleet.machine(machine) else {
                continue;
            };
            if !machine_fits_task(m, info) {
                continue;
            }
            let util = fleet.utilization(machine);
            if priority != Priority::High && util >= self.high_watermark {
                continue;
            }
            candidates.push(Candidate {
                vm,
                machine,
                tasks,
                util,
            });
        }

        if candidates.is_empty() {
            return None;
        }

        if priority == Priority::High {
            // Empty VMs first, then fewest tasks, then the least
            // loaded host.
            candidates.sort_by(|a, b| {
                (a.tasks > 0)
                    .cmp(&(b.tasks > 0))
                    .then(a.tasks.cmp(&b.tasks))
                    .then(a.util.partial_cmp(&b.util).unwrap_or(Ordering::Equal))
                    .then(a.vm.cmp(&b.vm))
            });
        } else {
            candidates.sort_by(|a, b| {
                a.util
                    .partial_cmp(&b.util)
                    .unwrap_or(Ordering::Equal)
                    .then(a.vm.cmp(&b.vm))
            });
        }
        Some((candidates[0].vm, candidates[0].machine))
    }

    /// Rule (c), first half: an active machine a new VM can go on.
    fn choose_machine(
        &self,
        fleet: &mut FleetModel,
        power: &PowerManager,
        info: &TaskSnapshot,
        avoid: Option<MachineId>,
    ) -> Option<MachineId> {
        let mut best: Option<(f64, MachineId)> = None;
        for machine in fleet.machines_with_cpu(info.cpu).to_vec() {
            if Some(machine) == avoid || !power.is_active(machine) {
                continue;
            }
            let Some(snapshot) = fleet.machine(machine) else {
                continue;
            };
            if !machine_fits_task(snapshot, info) {
                continue;
            }
            let util = fleet.utilization(machine);
            let better = match best {
                None => true,
                Some((b, id)) => util < b || (util == b && machine < id),
            };
            if better {
                best = Some((util, machine));
            }
        }
        best.map(|(_, machine)| machine)
    }

    /// Rule (c), second half: begin waking a sleeper that would fit.
    /// Returns whether a wake-up is now underway.
    fn wake_for(
        &self,
        fleet: &mut FleetModel,
        power: &mut PowerManager,
        host: &mut dyn SimHost,
        info: &TaskSnapshot,
        avoid: Option<MachineId>,
    ) -> bool {
        for machine in fleet.machines_with_cpu(info.cpu).to_vec() {
            if Some(machine) == avoid {
                continue;
            }
            if power.pending_target(machine) == Some(SState::S0) {
                // Capacity is already on its way up.
                return true;
            }
            if power.is_pending(machine) {
                continue;
            }
            let Some(snapshot) = fleet.machine(machine) else {
                continue;
            };
            if snapshot.s_state.is_on() {
                continue;
            }
            if info.gpu_required && !snapshot.has_gpu {
                continue;
            }
            if snapshot.memory_total < info.memory {
                continue;
            }
            match power.request_state(fleet, host, machine, SState::S0) {
                Ok(()) => {
                    info!(machine = %machine, task = %info.id, "waking machine for pending task");
                    return true;
                }
                Err(e) => {
                    trace!(machine = %machine, error = %e, "wake attempt failed");
                }
            }
        }
        false
    }

    #[allow(clippy::too_many_arguments)]
    fn assign(
        &mut self,
        fleet: &mut FleetModel,
        power: &mut PowerManager,
        host: &mut dyn SimHost,
        info: &TaskSnapshot,
        vm: VmId,
        machine: MachineId,
        priority: Priority,
    ) -> PlacementResult<PlaceOutcome> {
        host.vm_add_task(vm, info.id, priority)?;
        fleet.note_task_assigned(info.id, vm, info.sla, info.memory, info.gpu_required, info.kind);

        if priority == Priority::High {
            power.set_perf(fleet, host, machine, PState::P0);
        }

        info!(
            task = %info.id,
            vm = %vm,
            machine = %machine,
            sla = %info.sla,
            priority = %priority,
            "task placed"
        );
        Ok(PlaceOutcome::Placed {
            vm,
            machine,
            priority,
        })
    }

    /// Park a task until capacity shows up.
    pub fn enqueue(&mut self, task: TaskId, sla: SlaClass, now: SimTime) {
        if self.pending.iter().any(|p| p.task == task) {
            return;
        }
        debug!(task = %task, sla = %sla, queued = self.pending.len() + 1, "task deferred");
        self.pending.push(PendingTask {
            task,
            sla,
            enqueued_at: now,
        });
    }

    /// Try to place everything in the pending queue, most important
    /// first: SLA class, then urgency (remaining work over headroom)
    /// recomputed at drain time. Returns how many tasks landed.
    pub fn drain(
        &mut self,
        fleet: &mut FleetModel,
        power: &mut PowerManager,
        host: &mut dyn SimHost,
        now: SimTime,
    ) -> usize {
        if self.pending.is_empty() {
            return 0;
        }

        let mut queue = std::mem::take(&mut self.pending);
        let mut urgency: Vec<(PendingTask, f64)> = queue
            .drain(..)
            .map(|p| {
                let u = match (
                    host.task_remaining_instructions(p.task),
                    host.task_info(p.task),
                ) {
                    (Ok(remaining), Ok(info)) => {
                        let headroom = info.target_completion.saturating_sub(now).max(1);
                        remaining as f64 / headroom as f64
                    }
                    _ => 0.0,
                };
                (p, u)
            })
            .collect();
        urgency.sort_by(|(a, ua), (b, ub)| {
            a.sla
                .cmp(&b.sla)
                .then(ub.partial_cmp(ua).unwrap_or(Ordering::Equal))
        });

        let mut placed = 0;
        for (entry, _) in urgency {
            match self.place_inner(fleet, power, host, now, entry.task, None, false) {
                Ok(PlaceOutcome::Placed { .. }) => placed += 1,
                Ok(PlaceOutcome::Deferred) => unreachable!("drain never defers"),
                Err(PlacementError::Unavailable(_)) => {
                    self.pending.push(entry);
                }
                Err(PlacementError::Host(e)) => {
                    // The task is gone host-side; dropping it from the
                    // queue is the only coherent move.
                    warn!(task = %entry.task, error = %e, "pending task dropped");
                }
            }
        }
        if placed > 0 {
            debug!(placed, left = self.pending.len(), "pending queue drained");
        }
        placed
    }
}
