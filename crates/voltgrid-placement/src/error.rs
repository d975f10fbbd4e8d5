//! Placement engine error types.

use thiserror::Error;

use volt_core::types::TaskId;
use volt_core::HostError;

/// Result type alias for placement operations.
pub type PlacementResult<T> = Result<T, PlacementError>;

/// Errors that can occur while admitting a task.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// No machine or VM satisfies the task's constraints right now
    /// and nothing can be woken for it either.
    #[error("no placement for task {0}")]
    Unavailable(TaskId),

    #[error(transparent)]
    Host(#[from] HostError),
}
