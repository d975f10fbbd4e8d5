//! DVFS policy: choose a per-core P-state from machine load and risk.
//!
//! The policy is a pure function so it can be evaluated anywhere a
//! machine's situation changes, not only in the periodic tick.

use volt_core::types::PState;

/// Utilization at or above which a machine runs at peak frequency.
pub const UTIL_PEAK: f64 = 0.8;
/// Utilization band lower bound for P1.
pub const UTIL_HIGH: f64 = 0.5;
/// Utilization band lower bound for P2; below it the machine idles at P3.
pub const UTIL_LOW: f64 = 0.3;

/// What the policy looks at for one machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct DvfsInputs {
    /// Active tasks over cores.
    pub utilization: f64,
    /// Any SLA0/SLA1 task hosted here.
    pub has_critical: bool,
    /// Any compute-heavy task class hosted here.
    pub has_compute_heavy: bool,
    /// Any hosted task currently flagged at SLA risk. Pins P0
    /// unconditionally until the flag clears.
    pub has_at_risk: bool,
}

/// The P-state a machine should run at given its current situation.
pub fn dvfs_target(inputs: DvfsInputs) -> PState {
    if inputs.has_at_risk {
        return PState::P0;
    }
    if inputs.has_critical || inputs.utilization > UTIL_PEAK {
        return PState::P0;
    }
    if inputs.has_compute_heavy || inputs.utilization >= UTIL_HIGH {
        return PState::P1;
    }
    if inputs.utilization >= UTIL_LOW {
        return PState::P2;
    }
    PState::P3
}
