//! ModelOps Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Filesystem
//! - Runtime specifics
//!
//! The status state machine shared by deployments, executions and monitoring
//! hosts lives here, together with the identifiers and enums the client SDK
//! sends over the wire.

pub mod error;
pub mod event;
pub mod experiment;
pub mod ids;
pub mod logs;
pub mod model;
pub mod status;

// Re-export commonly used types
pub use error::CoreError;
pub use event::PollEvent;
pub use experiment::{ModelType, TrainingExperiment, TrainingType};
pub use ids::{ExecutionId, GroupName, ResourceId, DEFAULT_GROUP};
pub use logs::{LogQuery, LogRoutine, LogType, LogWindow};
pub use model::{InputType, Operation, PythonVersion, ResourceKind, SourceKind};
pub use status::{Lifecycle, ResourceStatus};
