//! Core domain errors.

use thiserror::Error;

use crate::status::{Lifecycle, ResourceStatus};

/// Core domain errors for the ModelOps SDK.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// The server reported a status string outside the closed status set.
    #[error("Unknown resource status: '{0}'")]
    UnknownStatus(String),

    /// A known status that the given lifecycle never uses.
    #[error("Status {status} is not part of the {lifecycle} lifecycle")]
    StatusNotAllowed {
        status: ResourceStatus,
        lifecycle: Lifecycle,
    },

    /// Invalid state transition.
    #[error("Invalid {lifecycle} state transition: {from} -> {to}")]
    InvalidStateTransition {
        lifecycle: Lifecycle,
        from: ResourceStatus,
        to: ResourceStatus,
    },

    /// Execution id that is not an unsigned integer.
    #[error("Invalid execution id: '{0}'")]
    InvalidExecutionId(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
