//! Client SDK for the ModelOps platform.
//!
//! Deploys models and preprocessing steps, runs them, trains models and
//! follows every server-side job until it settles. All server state is
//! mirrored locally through the status machine in `modelops-core`.

pub mod client;
pub mod config;
pub mod error;
pub mod execution;
pub mod groups;
pub mod http;
pub mod lifecycle;
pub mod logs;
pub mod monitoring;
pub mod poller;
pub mod session;
pub mod training;

mod wire;

#[cfg(test)]
mod testing;

pub use client::{ModelOpsClient, ResourceSummary, SearchFilter};
pub use config::{ClientConfig, ConfigOverrides};
pub use error::SdkError;
pub use execution::{
    AsyncModelRun, ExecutionHandle, ExecutionKind, ModelExecution, PreprocessingExecution,
    PreprocessingRun, TrainingExecution, TrainingRun,
};
pub use groups::GroupInfo;
pub use http::{HttpTransport, JsonSource, Transport};
pub use lifecycle::{
    AsyncInput, ChainedOutcome, DeployableKind, DeploymentDescription, DeploymentRequest,
    ModelController, ModelDeployment, PreprocessingController, PreprocessingDeployment,
    ResourceLifecycleController,
};
pub use logs::LogEntry;
pub use monitoring::{MonitoringHost, MonitoringRequest};
pub use poller::{StatusPoller, StatusReport, StatusSource};
pub use session::Session;
pub use training::{
    PromoteRequest, TrainingData, TrainingExperimentHandle, TrainingRunRequest, TrainingSpec,
};
