//! Power manager error types.

use thiserror::Error;

use volt_core::types::MachineId;
use volt_core::HostError;

/// Result type alias for power operations.
pub type PowerResult<T> = Result<T, PowerError>;

/// Errors that can occur while sequencing power transitions.
#[derive(Debug, Error)]
pub enum PowerError {
    /// A state change is already outstanding for this machine; the
    /// caller retries after `state_change_done`.
    #[error("machine {0} has a pending state change")]
    Busy(MachineId),

    /// Leaving S0 was requested while the machine still hosts active
    /// tasks.
    #[error("machine {0} still hosts active tasks")]
    Unsafe(MachineId),

    /// The machine is not tracked by the fleet model this tick.
    #[error("machine {0} is not eligible")]
    Unknown(MachineId),

    #[error(transparent)]
    Host(#[from] HostError),
}
