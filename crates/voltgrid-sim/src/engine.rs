//! The event loop: pops timed events, advances the clock, and
//! dispatches callbacks to the scheduling engine.

use tracing::{debug, info};

use volt_core::types::{FinalReport, SimTime};
use volt_core::{SchedulerHooks, SState, VoltConfig};

use crate::cluster::{MachineSpec, SimCluster, SimEvent};
use crate::workload;

/// Drives a [`SimCluster`] against any [`SchedulerHooks`]
/// implementation, in virtual-time order, one callback at a time.
pub struct Simulation {
    pub cluster: SimCluster,
    periodic_interval_us: SimTime,
    duration_us: SimTime,
    started: bool,
}

impl Simulation {
    pub fn new(cluster: SimCluster, periodic_interval_us: SimTime, duration_us: SimTime) -> Self {
        Self {
            cluster,
            periodic_interval_us,
            duration_us,
            started: false,
        }
    }

    /// Build the whole run from the declarative configuration:
    /// machines from `[[machine_class]]` (all booted in S0; the
    /// engine's `init` parks what it does not need) and arrivals from
    /// `[[task_class]]`.
    pub fn from_config(config: &VoltConfig) -> Self {
        let mut cluster = SimCluster::new(config.sim.migration_latency_us);
        for class in &config.machine_class {
            for _ in 0..class.count {
                cluster.add_machine(MachineSpec::from_class(class, SState::S0));
            }
        }
        let tasks = workload::generate_arrivals(&mut cluster, &config.task_class);
        info!(
            machines = config.machine_count(),
            tasks,
            duration_us = config.sim.duration_us,
            "simulation configured"
        );
        Self::new(
            cluster,
            config.sim.periodic_interval_us,
            config.sim.duration_us,
        )
    }

    /// Run to the configured horizon and produce the final report.
    pub fn run(&mut self, hooks: &mut dyn SchedulerHooks) -> FinalReport {
        self.start(hooks);
        let duration = self.duration_us;
        self.step_until(hooks, duration);
        self.cluster.advance_to(duration);
        hooks.simulation_complete(&mut self.cluster, duration)
    }

    /// Initialize the engine and schedule the first periodic check.
    /// Idempotent; `run` calls it implicitly.
    pub fn start(&mut self, hooks: &mut dyn SchedulerHooks) {
        if self.started {
            return;
        }
        self.started = true;
        hooks.init(&mut self.cluster);
        if self.periodic_interval_us > 0 {
            self.cluster
                .push_at(self.periodic_interval_us, SimEvent::PeriodicCheck);
        }
    }

    /// Process every event with a timestamp at or before `until`.
    /// Useful for scenario tests that interleave their own
    /// assertions with virtual time.
    pub fn step_until(&mut self, hooks: &mut dyn SchedulerHooks, until: SimTime) {
        self.start(hooks);
        let horizon = until.min(self.duration_us);
        while let Some(ev) = self.cluster.pop_due(horizon) {
            self.cluster.advance_to(ev.time);
            self.dispatch(hooks, ev.time, ev.event);
        }
        self.cluster.advance_to(horizon);
    }

    fn dispatch(&mut self, hooks: &mut dyn SchedulerHooks, time: SimTime, event: SimEvent) {
        match event {
            SimEvent::TaskArrival(task) => {
                debug!(task = %task, time, "task arrival");
                hooks.new_task(&mut self.cluster, time, task);
            }
            SimEvent::TaskCompletion { task, epoch } => {
                if self.cluster.apply_completion(task, epoch) {
                    hooks.task_complete(&mut self.cluster, time, task);
                }
            }
            SimEvent::StateChangeDone(machine) => {
                if self.cluster.apply_state_change(machine) {
                    hooks.state_change_done(&mut self.cluster, time, machine);
                }
            }
            SimEvent::MigrationDone(vm) => {
                if self.cluster.apply_migration_done(vm) {
                    hooks.migration_done(&mut self.cluster, time, vm);
                }
            }
            SimEvent::SlaWarning(task) => {
                if !self.cluster.task_is_completed(task) {
                    hooks.sla_warning(&mut self.cluster, time, task);
                }
            }
            SimEvent::MemoryWarning(machine) => {
                hooks.memory_warning(&mut self.cluster, time, machine);
            }
            SimEvent::PeriodicCheck => {
                hooks.periodic_check(&mut self.cluster, time);
                let next = time + self.periodic_interval_us;
                if next <= self.duration_us {
                    self.cluster.push_at(next, SimEvent::PeriodicCheck);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volt_core::types::{MachineId, SimTime, TaskId, VmId};

    /// Hook stub that records the order of callbacks it receives.
    #[derive(Default)]
    struct RecordingHooks {
        calls: Vec<String>,
    }

    impl SchedulerHooks for RecordingHooks {
        fn init(&mut self, _host: &mut dyn volt_core::SimHost) {
            self.calls.push("init".into());
        }
        fn new_task(&mut self, _host: &mut dyn volt_core::SimHost, _now: SimTime, task: TaskId) {
            self.calls.push(format!("new_task:{task}"));
        }
        fn task_complete(
            &mut self,
            _host: &mut dyn volt_core::SimHost,
            _now: SimTime,
            task: TaskId,
        ) {
            self.calls.push(format!("task_complete:{task}"));
        }
        fn periodic_check(&mut self, _host: &mut dyn volt_core::SimHost, now: SimTime) {
            self.calls.push(format!("check:{now}"));
        }
        fn migration_done(&mut self, _host: &mut dyn volt_core::SimHost, _now: SimTime, vm: VmId) {
            self.calls.push(format!("migration_done:{vm}"));
        }
        fn state_change_done(
            &mut self,
            _host: &mut dyn volt_core::SimHost,
            _now: SimTime,
            machine: MachineId,
        ) {
            self.calls.push(format!("state_done:{machine}"));
        }
        fn memory_warning(
            &mut self,
            _host: &mut dyn volt_core::SimHost,
            _now: SimTime,
            machine: MachineId,
        ) {
            self.calls.push(format!("memory:{machine}"));
        }
        fn sla_warning(&mut self, _host: &mut dyn volt_core::SimHost, _now: SimTime, task: TaskId) {
            self.calls.push(format!("sla:{task}"));
        }
        fn simulation_complete(
            &mut self,
            host: &mut dyn volt_core::SimHost,
            now: SimTime,
        ) -> FinalReport {
            self.calls.push("complete".into());
            FinalReport {
                sla_violations_pct: [0.0; 4],
                total_energy_kwh: host.cluster_energy(),
                simulated_seconds: now as f64 / 1_000_000.0,
            }
        }
    }

    #[test]
    fn run_starts_with_init_and_ends_with_complete() {
        let cluster = SimCluster::new(1_000);
        let mut sim = Simulation::new(cluster, 0, 10_000);
        let mut hooks = RecordingHooks::default();

        let report = sim.run(&mut hooks);

        assert_eq!(hooks.calls.first().map(String::as_str), Some("init"));
        assert_eq!(hooks.calls.last().map(String::as_str), Some("complete"));
        assert_eq!(report.simulated_seconds, 0.01);
    }

    #[test]
    fn periodic_checks_repeat_until_horizon() {
        let cluster = SimCluster::new(1_000);
        let mut sim = Simulation::new(cluster, 2_000, 7_000);
        let mut hooks = RecordingHooks::default();

        sim.run(&mut hooks);

        let checks: Vec<&String> =
            hooks.calls.iter().filter(|c| c.starts_with("check:")).collect();
        assert_eq!(checks.len(), 3); // 2000, 4000, 6000.
        assert_eq!(checks[0].as_str(), "check:2000");
        assert_eq!(checks[2].as_str(), "check:6000");
    }

    #[test]
    fn events_dispatch_in_time_order() {
        let mut cluster = SimCluster::new(1_000);
        cluster.push_at(500, SimEvent::MemoryWarning(MachineId(0)));
        cluster.push_at(100, SimEvent::MemoryWarning(MachineId(1)));
        let mut sim = Simulation::new(cluster, 0, 1_000);
        let mut hooks = RecordingHooks::default();

        sim.run(&mut hooks);

        let warnings: Vec<&String> =
            hooks.calls.iter().filter(|c| c.starts_with("memory:")).collect();
        assert_eq!(warnings[0].as_str(), "memory:m1");
        assert_eq!(warnings[1].as_str(), "memory:m0");
    }

    #[test]
    fn step_until_stops_at_the_requested_time() {
        let mut cluster = SimCluster::new(1_000);
        cluster.push_at(100, SimEvent::MemoryWarning(MachineId(0)));
        cluster.push_at(5_000, SimEvent::MemoryWarning(MachineId(1)));
        let mut sim = Simulation::new(cluster, 0, 10_000);
        let mut hooks = RecordingHooks::default();

        sim.step_until(&mut hooks, 1_000);
        assert!(hooks.calls.iter().any(|c| c == "memory:m0"));
        assert!(!hooks.calls.iter().any(|c| c == "memory:m1"));

        sim.step_until(&mut hooks, 10_000);
        assert!(hooks.calls.iter().any(|c| c == "memory:m1"));
    }
}
