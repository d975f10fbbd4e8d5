//! Migration manager error types.

use thiserror::Error;

use volt_core::types::{MachineId, VmId};
use volt_core::HostError;

/// Result type alias for migration operations.
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Errors that can occur while planning or starting a migration.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The VM already has an outstanding migration.
    #[error("vm {0} is already migrating")]
    AlreadyMigrating(VmId),

    /// The VM is detached or unknown to the fleet model.
    #[error("vm {0} has no resident host")]
    Detached(VmId),

    /// The source machine is not in S0; a move cannot start.
    #[error("source machine {0} is not running")]
    SourceNotReady(MachineId),

    /// No machine satisfies the VM's constraints right now.
    #[error("no eligible target for vm {0}")]
    NoTarget(VmId),

    #[error(transparent)]
    Host(#[from] HostError),
}
