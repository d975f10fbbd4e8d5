//! voltgrid.toml configuration parser.
//!
//! The declarative input has three parts: a `[scheduler]` table with
//! the engine's tuning knobs, `[[machine_class]]` blocks describing the
//! physical fleet, and `[[task_class]]` blocks describing the workload
//! stream. Unknown fields are rejected at parse time; the scheduler
//! itself never sees raw configuration, only the typed structs here.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CpuFamily, PState, SState, SimTime, SlaClass, TaskKind, VmKind};

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading the declarative configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tuning knobs of the scheduling and power-management engine.
///
/// One engine, parameterized; there are no compile-time variants.
/// Defaults reproduce the reference behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    /// Utilization above which a machine is considered overloaded and
    /// becomes a migration source.
    pub high_watermark: f64,
    /// Utilization below which a machine is a consolidation candidate.
    pub low_watermark: f64,
    /// How often the consolidation pass runs, in simulated µs.
    pub consolidation_interval_us: SimTime,
    /// Deadline headroom below which a task is promoted to high
    /// priority regardless of its SLA class, in simulated µs.
    pub urgency_threshold_us: SimTime,
    /// Minimum spacing between full fleet refreshes, in simulated µs.
    pub refresh_interval_us: SimTime,
    /// Memory margin, in units, added on top of a VM's demand when
    /// judging a migration target.
    pub migration_memory_overhead: u64,
    /// P-state applied to all cores when a machine wakes to S0.
    pub wake_pstate: PState,
    /// Sleep state requested for a fully evacuated machine. S5 by
    /// default; S3 is selectable for faster wake-up.
    pub empty_machine_state: SState,
    /// Number of machines powered on at init; the rest park in S5.
    pub initial_active_machines: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            high_watermark: 0.8,
            low_watermark: 0.3,
            consolidation_interval_us: 300_000,
            urgency_threshold_us: 12_000_000,
            refresh_interval_us: 1_000_000,
            migration_memory_overhead: 8,
            wake_pstate: PState::P1,
            empty_machine_state: SState::S5,
            initial_active_machines: 12,
        }
    }
}

impl SchedulerConfig {
    /// Reject configurations the engine cannot operate under.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(0.0..=1.0).contains(&self.low_watermark)
            || self.high_watermark <= 0.0
            || self.low_watermark >= self.high_watermark
        {
            return Err(ConfigError::Invalid(format!(
                "watermarks must satisfy 0 <= low < high, got low={} high={}",
                self.low_watermark, self.high_watermark
            )));
        }
        if self.empty_machine_state == SState::S0 {
            return Err(ConfigError::Invalid(
                "empty_machine_state must be a sleep state, not S0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A class of identical physical machines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineClass {
    /// How many machines of this class the fleet contains.
    pub count: u32,
    pub cpu: CpuFamily,
    pub cores: u32,
    /// Total memory per machine, in units.
    pub memory: u64,
    #[serde(default)]
    pub gpu: bool,
    /// Delivered MIPS per core at P0..P3.
    pub mips: [u64; PState::COUNT],
    /// Power draw in watts at P0..P3 while in S0.
    pub p_state_watts: [f64; PState::COUNT],
    /// Power draw in watts at S0..S5. The S0 entry is the idle floor
    /// on top of which the P-state draw applies.
    pub s_state_watts: [f64; 6],
    /// Transition latency in µs when entering S0..S5.
    pub s_state_latency_us: [SimTime; 6],
    /// Idle-core power draw in watts at C-states C0..C3. Consumed by
    /// the energy model only; the engine steers S- and P-states.
    #[serde(default)]
    pub c_state_watts: Option<[f64; 4]>,
}

/// A class of tasks generated over a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskClass {
    /// Virtual time at which this class starts producing tasks, µs.
    pub start_time: SimTime,
    /// Virtual time at which the stream stops, µs.
    pub end_time: SimTime,
    /// Mean inter-arrival gap between tasks, µs.
    pub inter_arrival_us: SimTime,
    /// Expected runtime at nominal MIPS, µs; together with
    /// `nominal_mips` this fixes the instruction count.
    pub expected_runtime_us: SimTime,
    /// MIPS rating the expected runtime is quoted against.
    #[serde(default = "default_nominal_mips")]
    pub nominal_mips: u64,
    /// Memory requirement per task, in units.
    pub memory: u64,
    pub vm_kind: VmKind,
    #[serde(default)]
    pub gpu: bool,
    pub sla: SlaClass,
    pub cpu: CpuFamily,
    pub task_type: TaskKind,
    /// Seed for this class's arrival stream.
    pub seed: u64,
}

fn default_nominal_mips() -> u64 {
    1000
}

/// Simulation-run parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SimParams {
    /// Total virtual duration of the run, µs.
    pub duration_us: SimTime,
    /// Interval between periodic scheduler checks, µs.
    pub periodic_interval_us: SimTime,
    /// Virtual duration of a live VM migration, µs.
    pub migration_latency_us: SimTime,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            duration_us: 60_000_000,
            periodic_interval_us: 100_000,
            migration_latency_us: 1_000_000,
        }
    }
}

/// The full declarative input: engine knobs, fleet, and workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoltConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sim: SimParams,
    #[serde(default)]
    pub machine_class: Vec<MachineClass>,
    #[serde(default)]
    pub task_class: Vec<TaskClass>,
}

impl VoltConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: VoltConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.scheduler.validate()?;
        for (i, class) in self.machine_class.iter().enumerate() {
            if class.count == 0 || class.cores == 0 {
                return Err(ConfigError::Invalid(format!(
                    "machine_class[{i}] must have nonzero count and cores"
                )));
            }
        }
        for (i, class) in self.task_class.iter().enumerate() {
            if class.end_time <= class.start_time {
                return Err(ConfigError::Invalid(format!(
                    "task_class[{i}] window is empty: start={} end={}",
                    class.start_time, class.end_time
                )));
            }
            if class.inter_arrival_us == 0 {
                return Err(ConfigError::Invalid(format!(
                    "task_class[{i}] inter_arrival_us must be nonzero"
                )));
            }
        }
        Ok(())
    }

    /// Total machine count across all classes.
    pub fn machine_count(&self) -> u32 {
        self.machine_class.iter().map(|c| c.count).sum()
    }
}
