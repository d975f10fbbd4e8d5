//! Migration target selection.
//!
//! Candidates are filtered on hard constraints (CPU family, GPU,
//! memory headroom with an overhead margin) and then ranked: among
//! active machines the lowest utilization wins; if none qualifies, a
//! deep sleeper worth waking is proposed instead.

use tracing::trace;

use volt_core::compat::machine_fits;
use volt_core::types::{CpuFamily, MachineId, VmId};
use voltgrid_fleet::FleetModel;
use voltgrid_power::PowerManager;

/// Aggregate requirements of a VM being moved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VmDemand {
    pub cpu: CpuFamily,
    /// Memory the VM's tasks hold, in units.
    pub memory: u64,
    pub needs_gpu: bool,
}

impl VmDemand {
    /// Derive the demand of `vm` from the fleet model.
    pub fn of(fleet: &FleetModel, vm: VmId) -> Option<Self> {
        let snapshot = fleet.vm(vm)?;
        Some(Self {
            cpu: snapshot.cpu,
            memory: fleet.vm_memory_demand(vm),
            needs_gpu: fleet.vm_needs_gpu(vm),
        })
    }
}

/// Outcome of a target search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetDecision {
    /// An active machine can take the VM now.
    Active(MachineId),
    /// A deep sleeper fits; wake it and retry on a later tick.
    Wake(MachineId),
    /// Nothing fits; the VM stays on its current host.
    None,
}

/// Pick a destination for a VM currently hosted on `source`.
///
/// Active machines are considered first: S0, no pending state change,
/// matching CPU family and GPU, memory headroom covering the demand
/// plus `memory_overhead` units, and utilization under
/// `high_watermark`. Ties break toward the lowest utilization, then
/// the lowest machine id. If no active machine fits, the deepest
/// sleeper that would fit is proposed for wake-up.
pub fn find_target(
    fleet: &mut FleetModel,
    power: &PowerManager,
    vm: VmId,
    source: MachineId,
    demand: VmDemand,
    memory_overhead: u64,
    high_watermark: f64,
) -> TargetDecision {
    let needed = demand.memory + memory_overhead;

    let mut best: Option<(f64, MachineId)> = None;
    for candidate in fleet.machines_with_cpu(demand.cpu).to_vec() {
        if candidate == source || !power.is_active(candidate) {
            continue;
        }
        let Some(machine) = fleet.machine(candidate) else {
            continue;
        };
        if !machine_fits(machine, demand.cpu, demand.needs_gpu, needed) {
            continue;
        }
        let util = fleet.utilization(candidate);
        if util >= high_watermark {
            continue;
        }
        let better = match best {
            None => true,
            Some((best_util, best_id)) => {
                util < best_util || (util == best_util && candidate < best_id)
            }
        };
        if better {
            best = Some((util, candidate));
        }
    }
    if let Some((util, target)) = best {
        trace!(vm = %vm, target = %target, util, "active migration target");
        return TargetDecision::Active(target);
    }

    // No active machine fits; propose waking a deep sleeper that
    // would. Total memory stands in for headroom since nothing runs
    // there yet.
    for candidate in fleet.machines_with_cpu(demand.cpu).to_vec() {
        if candidate == source || power.is_pending(candidate) {
            continue;
        }
        let Some(machine) = fleet.machine(candidate) else {
            continue;
        };
        if !machine.s_state.is_deep_sleep() {
            continue;
        }
        if demand.needs_gpu && !machine.has_gpu {
            continue;
        }
        if machine.memory_total < needed {
            continue;
        }
        trace!(vm = %vm, target = %candidate, "sleeping migration target");
        return TargetDecision::Wake(candidate);
    }

    TargetDecision::None
}
