//! Handles on asynchronous executions: async model runs, async preprocessing
//! runs and training runs.
//!
//! All three share one [`ExecutionHandle`]; the [`ExecutionKind`] parameter
//! supplies the endpoint prefix and the shape of the describe payload.

use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use modelops_core::{
    ExecutionId, GroupName, Lifecycle, ResourceId, ResourceKind, ResourceStatus, TrainingType,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::error::{classify, SdkError};
use crate::http::{ApiRequest, ApiResponse};
use crate::poller::{StatusPoller, StatusReport, StatusSource};
use crate::session::Session;
use crate::wire::{parse_status, DescriptionBody, StatusBody};

/// Kind-specific part of an execution description.
pub trait ExecutionDescription: DeserializeOwned + Clone + fmt::Debug + Send + Sync {
    /// Raw `ExecutionState` reported by the describe call, if any.
    fn execution_state(&self) -> Option<&str>;
}

/// Static description of one kind of execution.
pub trait ExecutionKind: Send + Sync + 'static {
    /// Resource the execution belongs to.
    const RESOURCE: ResourceKind;

    /// Prefix of the status and result endpoints.
    const RUN_PATH: &'static str;

    /// Name used in logs and `Display`.
    const LABEL: &'static str;

    /// Payload of the describe endpoint.
    type Details: ExecutionDescription;
}

/// Run of an async model.
#[derive(Debug, Clone, Copy)]
pub struct AsyncModelRun;

/// Run of an async preprocessing step.
#[derive(Debug, Clone, Copy)]
pub struct PreprocessingRun;

/// Run of a training experiment.
#[derive(Debug, Clone, Copy)]
pub struct TrainingRun;

impl ExecutionKind for AsyncModelRun {
    const RESOURCE: ResourceKind = ResourceKind::Model;
    const RUN_PATH: &'static str = "model/async";
    const LABEL: &'static str = "AsyncModel";
    type Details = ExecutionDetails;
}

impl ExecutionKind for PreprocessingRun {
    const RESOURCE: ResourceKind = ResourceKind::Preprocessing;
    const RUN_PATH: &'static str = "preprocessing/async";
    const LABEL: &'static str = "AsyncPreprocessing";
    type Details = ExecutionDetails;
}

impl ExecutionKind for TrainingRun {
    const RESOURCE: ResourceKind = ResourceKind::Training;
    const RUN_PATH: &'static str = "training";
    const LABEL: &'static str = "Training";
    type Details = TrainingRunDetails;
}

/// Describe payload of async model and preprocessing runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecutionDetails {
    #[serde(default)]
    pub execution_state: Option<String>,
    /// Every other field, kept as sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExecutionDescription for ExecutionDetails {
    fn execution_state(&self) -> Option<&str> {
        self.execution_state.as_deref()
    }
}

/// Describe payload of training runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrainingRunDetails {
    #[serde(default)]
    pub execution_state: Option<String>,
    #[serde(default)]
    pub training_type: Option<TrainingType>,
    #[serde(default)]
    pub run_name: Option<String>,
    #[serde(default)]
    pub run_data: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExecutionDescription for TrainingRunDetails {
    fn execution_state(&self) -> Option<&str> {
        self.execution_state.as_deref()
    }
}

/// One asynchronous unit of work on the server.
///
/// Dropping a handle never touches the server.
pub struct ExecutionHandle<K: ExecutionKind> {
    session: Session,
    resource_id: ResourceId,
    group: GroupName,
    execution_id: ExecutionId,
    status: ResourceStatus,
    last_message: Option<String>,
    result_location: Option<PathBuf>,
    details: Option<K::Details>,
    _kind: PhantomData<K>,
}

/// Async model execution.
pub type ModelExecution = ExecutionHandle<AsyncModelRun>;

/// Async preprocessing execution.
pub type PreprocessingExecution = ExecutionHandle<PreprocessingRun>;

/// Training execution.
pub type TrainingExecution = ExecutionHandle<TrainingRun>;

impl<K: ExecutionKind> ExecutionHandle<K> {
    /// Handle for an execution the server just accepted.
    pub fn new(
        session: Session,
        resource_id: ResourceId,
        group: GroupName,
        execution_id: ExecutionId,
    ) -> Self {
        Self {
            session,
            resource_id,
            group,
            execution_id,
            status: Lifecycle::Execution.initial(),
            last_message: None,
            result_location: None,
            details: None,
            _kind: PhantomData,
        }
    }

    /// Handle for an existing execution, loaded with one describe call.
    pub async fn attach(
        session: Session,
        resource_id: ResourceId,
        group: GroupName,
        execution_id: ExecutionId,
    ) -> Result<Self, SdkError> {
        let mut handle = Self::new(session, resource_id, group, execution_id);
        handle.describe().await?;
        Ok(handle)
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    pub fn group(&self) -> &GroupName {
        &self.group
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    /// Status as of the last fetch.
    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    /// Where [`download_result`](Self::download_result) wrote the result.
    pub fn result_location(&self) -> Option<&Path> {
        self.result_location.as_deref()
    }

    pub fn details(&self) -> Option<&K::Details> {
        self.details.as_ref()
    }

    fn describe_path(&self) -> String {
        format!(
            "{}/describe/{}/{}/{}",
            K::RESOURCE.path_segment(),
            self.group,
            self.resource_id,
            self.execution_id
        )
    }

    fn run_path(&self, action: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            K::RUN_PATH,
            action,
            self.group,
            self.execution_id
        )
    }

    fn apply(&mut self, status: ResourceStatus) -> Result<(), SdkError> {
        self.status = Lifecycle::Execution.transition(self.status, status)?;
        Ok(())
    }

    /// Status and result calls accept 200 and 410. Anything else except
    /// authentication and server faults means the execution is unavailable.
    fn check_run_response(&self, response: ApiResponse, context: &str) -> Result<ApiResponse, SdkError> {
        match response.status {
            200 | 410 => Ok(response),
            401 => Err(classify(&response, K::RESOURCE, context)),
            status if status >= 500 => Err(classify(&response, K::RESOURCE, context)),
            status => {
                let body = response.text();
                error!(
                    execution = %self.target(),
                    status,
                    body = %body,
                    "{}", context
                );
                Err(SdkError::ExecutionUnavailable {
                    target: self.target(),
                    status,
                    body,
                })
            }
        }
    }

    /// Fetch the current status.
    ///
    /// When the execution has just succeeded the description is refreshed
    /// too.
    pub async fn get_status(&mut self) -> Result<StatusReport, SdkError> {
        let response = self
            .session
            .send_authed(ApiRequest::get(self.run_path("status")))
            .await?;
        let response = self.check_run_response(response, "Could not get execution status")?;

        let report = response
            .json::<StatusBody>()?
            .into_report(Lifecycle::Execution)?;
        self.apply(report.status)?;
        self.last_message = report.message.clone();

        if self.status == ResourceStatus::Succeeded {
            self.describe().await?;
        }

        Ok(report)
    }

    /// Fetch the kind-specific description.
    pub async fn describe(&mut self) -> Result<&K::Details, SdkError> {
        let response = self
            .session
            .send_authed(ApiRequest::get(self.describe_path()))
            .await?
            .require_status(&[200], K::RESOURCE, "Could not describe execution")?;

        let details = response.json::<DescriptionBody<K::Details>>()?.description;
        if let Some(status) = parse_status(details.execution_state(), Lifecycle::Execution)? {
            self.apply(status)?;
        }

        Ok(self.details.insert(details))
    }

    /// Poll until the execution leaves the pending set.
    ///
    /// A failed execution is returned as a status, not an error.
    pub async fn wait_complete(&mut self, poller: &StatusPoller) -> Result<ResourceStatus, SdkError> {
        poller.wait(self).await?;
        Ok(self.status)
    }

    /// Error unless the execution succeeded.
    pub fn ensure_succeeded(&self) -> Result<(), SdkError> {
        match self.status {
            ResourceStatus::Succeeded => Ok(()),
            ResourceStatus::Failed => Err(SdkError::ExecutionFailed {
                target: self.target(),
                message: self
                    .last_message
                    .clone()
                    .unwrap_or_else(|| "execution failed".to_string()),
            }),
            status => Err(SdkError::resource(
                K::RESOURCE,
                format!("{} has not finished, status is {status}", self.target()),
            )),
        }
    }

    /// Download the result archive into `destination`.
    ///
    /// A pending execution is refreshed once first. Returns `None` without
    /// writing anything if it is still not finished.
    pub async fn download_result(&mut self, destination: &Path) -> Result<Option<PathBuf>, SdkError> {
        if self.status.is_pending() {
            self.get_status().await?;
        }

        match self.status {
            ResourceStatus::Succeeded => {
                let response = self
                    .session
                    .send_authed(ApiRequest::get(self.run_path("result")))
                    .await?;
                let response = self.check_run_response(response, "Could not download result")?;

                tokio::fs::create_dir_all(destination).await?;
                let path = destination.join(format!("output_{}.zip", self.execution_id));
                tokio::fs::write(&path, &response.body).await?;

                info!(execution = %self.target(), path = %path.display(), "Output saved");
                self.result_location = Some(path.clone());
                Ok(Some(path))
            }
            ResourceStatus::Failed => self.ensure_succeeded().map(|()| None),
            status => {
                info!(execution = %self.target(), status = %status, "Execution not ready");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<K: ExecutionKind> StatusSource for ExecutionHandle<K> {
    fn target(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            K::RUN_PATH,
            self.group,
            self.resource_id,
            self.execution_id
        )
    }

    async fn fetch_status(&mut self) -> Result<StatusReport, SdkError> {
        self.get_status().await
    }
}

impl<K: ExecutionKind> fmt::Display for ExecutionHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} execution {} of {} (status: {})",
            K::LABEL,
            self.execution_id,
            self.resource_id,
            self.status
        )
    }
}

impl<K: ExecutionKind> fmt::Debug for ExecutionHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("kind", &K::LABEL)
            .field("resource_id", &self.resource_id)
            .field("group", &self.group)
            .field("execution_id", &self.execution_id)
            .field("status", &self.status)
            .field("result_location", &self.result_location)
            .finish()
    }
}
