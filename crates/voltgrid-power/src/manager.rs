//! Power manager — sequences asynchronous S-state transitions.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, trace, warn};

use volt_core::types::{MachineId, PState, SState};
use volt_core::SimHost;
use voltgrid_fleet::FleetModel;

use crate::error::{PowerError, PowerResult};

/// Sequences S-state and P-state transitions while honoring the
/// pending-flag discipline: one outstanding request per machine, the
/// flag set here and cleared only by [`PowerManager::on_state_complete`].
pub struct PowerManager {
    /// Outstanding transition per machine, keyed to the requested
    /// target state.
    pending: HashMap<MachineId, SState>,
    /// Machines known to be in S0 and ready for work.
    active: BTreeSet<MachineId>,
    /// P-state applied to all cores when a machine reaches S0.
    wake_pstate: PState,
}

impl PowerManager {
    pub fn new(wake_pstate: PState) -> Self {
        Self {
            pending: HashMap::new(),
            active: BTreeSet::new(),
            wake_pstate,
        }
    }

    /// Whether a state change is outstanding for `machine`.
    pub fn is_pending(&self, machine: MachineId) -> bool {
        self.pending.contains_key(&machine)
    }

    /// Target of the outstanding transition, if any.
    pub fn pending_target(&self, machine: MachineId) -> Option<SState> {
        self.pending.get(&machine).copied()
    }

    /// Machines in S0 with no outstanding transition.
    pub fn active_machines(&self) -> impl Iterator<Item = MachineId> + '_ {
        self.active.iter().copied()
    }

    pub fn is_active(&self, machine: MachineId) -> bool {
        self.active.contains(&machine)
    }

    /// Seed the active set at init from the fleet's current view.
    pub fn mark_active(&mut self, machine: MachineId) {
        self.active.insert(machine);
    }

    /// Request an asynchronous transition to `state`.
    ///
    /// Fails `Busy` while a change is outstanding and `Unsafe` when
    /// the request would take a machine with active tasks below S0.
    /// Requesting the state the machine is already in is a no-op.
    pub fn request_state(
        &mut self,
        fleet: &mut FleetModel,
        host: &mut dyn SimHost,
        machine: MachineId,
        state: SState,
    ) -> PowerResult<()> {
        if self.is_pending(machine) {
            return Err(PowerError::Busy(machine));
        }
        let current = fleet
            .machine(machine)
            .map(|m| m.s_state)
            .ok_or(PowerError::Unknown(machine))?;
        if current == state {
            trace!(machine = %machine, state = %state, "state request is a no-op");
            return Ok(());
        }
        if state > SState::S0 && fleet.task_count_on(machine) > 0 {
            return Err(PowerError::Unsafe(machine));
        }

        host.machine_set_state(machine, state)?;
        self.pending.insert(machine, state);
        // The machine is in flux; it is not placeable until the
        // completion event arrives.
        self.active.remove(&machine);
        debug!(machine = %machine, from = %current, to = %state, "state change requested");
        Ok(())
    }

    /// Handle `state_change_done`: clear the pending flag, learn the
    /// reached state from the host, and bring a woken machine into
    /// service. Returns the state the machine landed in, or `None`
    /// when the host no longer answers for it.
    pub fn on_state_complete(
        &mut self,
        fleet: &mut FleetModel,
        host: &mut dyn SimHost,
        machine: MachineId,
    ) -> Option<SState> {
        if self.pending.remove(&machine).is_none() {
            warn!(machine = %machine, "state completion without a pending request");
        }

        let snapshot = match host.machine_info(machine) {
            Ok(snap) => snap,
            Err(e) => {
                warn!(machine = %machine, error = %e, "machine vanished at state completion");
                return None;
            }
        };
        let reached = snapshot.s_state;
        fleet.note_machine_sstate(machine, reached);

        if reached.is_on() {
            let wake = self.wake_pstate;
            self.apply_pstate(fleet, host, machine, wake);
            self.active.insert(machine);
            info!(machine = %machine, pstate = %wake, "machine awake");
        } else {
            self.active.remove(&machine);
            info!(machine = %machine, state = %reached, "machine asleep");
        }
        Some(reached)
    }

    /// Apply a P-state to every core of `machine`. No-op unless the
    /// machine is in S0 with no pending state change, or already at
    /// the requested P-state.
    pub fn set_perf(
        &self,
        fleet: &mut FleetModel,
        host: &mut dyn SimHost,
        machine: MachineId,
        pstate: PState,
    ) {
        if self.is_pending(machine) {
            return;
        }
        match fleet.machine(machine) {
            Some(m) if m.s_state.is_on() => {
                if m.p_state == pstate {
                    return;
                }
            }
            _ => return,
        }
        self.apply_pstate(fleet, host, machine, pstate);
    }

    fn apply_pstate(
        &self,
        fleet: &mut FleetModel,
        host: &mut dyn SimHost,
        machine: MachineId,
        pstate: PState,
    ) {
        let cores = match fleet.machine(machine) {
            Some(m) => m.cores,
            None => return,
        };
        for core in 0..cores {
            if let Err(e) = host.machine_set_core_perf(machine, core, pstate) {
                warn!(machine = %machine, core, error = %e, "core perf request failed");
                return;
            }
        }
        fleet.note_machine_pstate(machine, pstate);
        debug!(machine = %machine, pstate = %pstate, cores, "p-state applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volt_core::types::{
        CpuFamily, MachineSnapshot, Priority, SimTime, SlaClass, TaskId, TaskKind, TaskSnapshot, VmId,
        VmKind, VmSnapshot,
    };
    use volt_core::{HostError, HostResult};

    /// Records every host call; state requests are remembered so the
    /// test can later acknowledge them.
    #[derive(Default)]
    struct RecordingHost {
        machines: HashMap<MachineId, MachineSnapshot>,
        state_requests: Vec<(MachineId, SState)>,
        perf_requests: Vec<(MachineId, u32, PState)>,
    }

    impl RecordingHost {
        fn with_machine(mut self, snap: MachineSnapshot) -> Self {
            self.machines.insert(snap.id, snap);
            self
        }

        /// Let the requested transition take effect host-side.
        fn settle(&mut self, machine: MachineId, state: SState) {
            if let Some(m) = self.machines.get_mut(&machine) {
                m.s_state = state;
            }
        }
    }

    impl SimHost for RecordingHost {
        fn machine_count(&mut self) -> u32 {
            self.machines.len() as u32
        }

        fn machine_info(&mut self, machine: MachineId) -> HostResult<MachineSnapshot> {
            self.machines
                .get(&machine)
                .cloned()
                .ok_or(HostError::UnknownMachine(machine))
        }

        fn machine_set_state(&mut self, machine: MachineId, state: SState) -> HostResult<()> {
            self.state_requests.push((machine, state));
            Ok(())
        }

        fn machine_set_core_perf(
            &mut self,
            machine: MachineId,
            core: u32,
            pstate: PState,
        ) -> HostResult<()> {
            self.perf_requests.push((machine, core, pstate));
            if let Some(m) = self.machines.get_mut(&machine) {
                m.p_state = pstate;
            }
            Ok(())
        }

        fn vm_create(&mut self, _: VmKind, _: CpuFamily) -> HostResult<VmId> {
            Err(HostError::Rejected("unused".into()))
        }

        fn vm_attach(&mut self, _: VmId, _: MachineId) -> HostResult<()> {
            Ok(())
        }

        fn vm_info(&mut self, vm: VmId) -> HostResult<VmSnapshot> {
            Err(HostError::UnknownVm(vm))
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
            0
        }
    }

    fn machine(id: u32, s_state: SState) -> MachineSnapshot {
        MachineSnapshot {
            id: MachineId(id),
            cpu: CpuFamily::X86,
            cores: 4,
            memory_total: 1024,
            memory_used: 0,
            has_gpu: false,
            s_state,
            p_state: PState::P3,
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

    fn setup(snaps: Vec<MachineSnapshot>) -> (FleetModel, RecordingHost) {
        let mut host = RecordingHost::default();
        for snap in snaps {
            host = host.with_machine(snap);
        }
        let mut fleet = FleetModel::new(0);
        fleet.populate(&mut host);
        (fleet, host)
    }

    #[test]
    fn wake_request_goes_pending() {
        let (mut fleet, mut host) = setup(vec![machine(0, SState::S5)]);
        let mut power = PowerManager::new(PState::P1);

        power
            .request_state(&mut fleet, &mut host, MachineId(0), SState::S0)
            .unwrap();

        assert!(power.is_pending(MachineId(0)));
        assert_eq!(power.pending_target(MachineId(0)), Some(SState::S0));
        assert_eq!(host.state_requests, vec![(MachineId(0), SState::S0)]);
    }

    #[test]
    fn second_request_while_pending_is_busy() {
        let (mut fleet, mut host) = setup(vec![machine(0, SState::S5)]);
        let mut power = PowerManager::new(PState::P1);

        power
            .request_state(&mut fleet, &mut host, MachineId(0), SState::S0)
            .unwrap();
        let err = power
            .request_state(&mut fleet, &mut host, MachineId(0), SState::S5)
            .unwrap_err();

        assert!(matches!(err, PowerError::Busy(_)));
        assert_eq!(host.state_requests.len(), 1);
    }

    #[test]
    fn sleep_with_active_tasks_is_unsafe() {
        let (mut fleet, mut host) = setup(vec![machine(0, SState::S0)]);
        fleet.register_vm(vm(0, 0));
        fleet.note_task_assigned(TaskId(1), VmId(0), SlaClass::Sla2, 4, false, TaskKind::Web);
        let mut power = PowerManager::new(PState::P1);

        let err = power
            .request_state(&mut fleet, &mut host, MachineId(0), SState::S5)
            .unwrap_err();

        assert!(matches!(err, PowerError::Unsafe(_)));
        assert!(host.state_requests.is_empty());
    }

    #[test]
    fn requesting_current_state_is_noop() {
        let (mut fleet, mut host) = setup(vec![machine(0, SState::S0)]);
        let mut power = PowerManager::new(PState::P1);

        power
            .request_state(&mut fleet, &mut host, MachineId(0), SState::S0)
            .unwrap();

        assert!(!power.is_pending(MachineId(0)));
        assert!(host.state_requests.is_empty());
    }

    #[test]
    fn wake_completion_applies_wake_pstate_and_activates() {
        let (mut fleet, mut host) = setup(vec![machine(0, SState::S5)]);
        let mut power = PowerManager::new(PState::P1);

        power
            .request_state(&mut fleet, &mut host, MachineId(0), SState::S0)
            .unwrap();
        host.settle(MachineId(0), SState::S0);

        let reached = power.on_state_complete(&mut fleet, &mut host, MachineId(0));
        assert_eq!(reached, Some(SState::S0));
        assert!(!power.is_pending(MachineId(0)));
        assert!(power.is_active(MachineId(0)));
        // One perf request per core, at the wake P-state.
        assert_eq!(host.perf_requests.len(), 4);
        assert!(host.perf_requests.iter().all(|&(_, _, p)| p == PState::P1));
        assert_eq!(fleet.machine(MachineId(0)).unwrap().p_state, PState::P1);
    }

    #[test]
    fn sleep_completion_leaves_active_set() {
        let (mut fleet, mut host) = setup(vec![machine(0, SState::S0)]);
        let mut power = PowerManager::new(PState::P1);
        power.mark_active(MachineId(0));

        power
            .request_state(&mut fleet, &mut host, MachineId(0), SState::S5)
            .unwrap();
        host.settle(MachineId(0), SState::S5);
        let reached = power.on_state_complete(&mut fleet, &mut host, MachineId(0));

        assert_eq!(reached, Some(SState::S5));
        assert!(!power.is_active(MachineId(0)));
        assert_eq!(fleet.machine(MachineId(0)).unwrap().s_state, SState::S5);
    }

    #[test]
    fn set_perf_skips_pending_and_sleeping_machines() {
        let (mut fleet, mut host) = setup(vec![machine(0, SState::S5), machine(1, SState::S0)]);
        let mut power = PowerManager::new(PState::P1);

        // Sleeping machine: no perf calls.
        power.set_perf(&mut fleet, &mut host, MachineId(0), PState::P0);
        assert!(host.perf_requests.is_empty());

        // Pending machine: no perf calls either.
        power
            .request_state(&mut fleet, &mut host, MachineId(1), SState::S3)
            .unwrap();
        power.set_perf(&mut fleet, &mut host, MachineId(1), PState::P0);
        assert!(host.perf_requests.is_empty());
    }

    #[test]
    fn set_perf_applies_to_every_core_once() {
        let (mut fleet, mut host) = setup(vec![machine(0, SState::S0)]);
        let power = PowerManager::new(PState::P1);

        power.set_perf(&mut fleet, &mut host, MachineId(0), PState::P0);
        assert_eq!(host.perf_requests.len(), 4);

        // Already at P0 now; a second call is a no-op.
        power.set_perf(&mut fleet, &mut host, MachineId(0), PState::P0);
        assert_eq!(host.perf_requests.len(), 4);
    }
}
