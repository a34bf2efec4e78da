//! Deployment lifecycle of models and preprocessing steps.
//!
//! A [`ResourceLifecycleController`] mirrors one deployment on the server:
//! it uploads and hosts new deployments, waits for them to become ready,
//! and gates every invocation on readiness.

use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;

use async_trait::async_trait;
use modelops_core::{
    ExecutionId, GroupName, InputType, Lifecycle, LogQuery, Operation, PythonVersion, ResourceId,
    ResourceKind, ResourceStatus, SourceKind,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::error::{reject_input, SdkError};
use crate::execution::{AsyncModelRun, ExecutionHandle, ExecutionKind, PreprocessingRun};
use crate::http::{ApiRequest, JsonSource, MultipartForm};
use crate::logs::LogEntry;
use crate::poller::{StatusPoller, StatusReport, StatusSource};
use crate::session::Session;
use crate::wire::{parse_status, DescriptionBody, ExecutionStarted, MessageBody, StatusBody};

/// Static description of a deployable resource.
pub trait DeployableKind: Send + Sync + 'static {
    const RESOURCE: ResourceKind;

    /// Action segment of the upload endpoint.
    const UPLOAD_ACTION: &'static str;

    /// Key of the new id in the upload response.
    const ID_FIELD: &'static str;

    /// Form field naming the entrypoint function.
    const REFERENCE_FIELD: &'static str;

    const PYTHON_VERSIONS: &'static [PythonVersion];

    /// Whether a serialized model artifact must be uploaded.
    const REQUIRES_ARTIFACT: bool;

    /// Multipart field carrying the input file of an async run.
    const ASYNC_INPUT_FIELD: &'static str;

    /// Executions started by async runs.
    type Run: ExecutionKind;

    /// Whether an input schema must be uploaded.
    fn requires_schema(operation: Operation) -> bool;
}

/// Model deployments.
#[derive(Debug, Clone, Copy)]
pub struct ModelDeployment;

/// Preprocessing deployments.
#[derive(Debug, Clone, Copy)]
pub struct PreprocessingDeployment;

impl DeployableKind for ModelDeployment {
    const RESOURCE: ResourceKind = ResourceKind::Model;
    const UPLOAD_ACTION: &'static str = "upload";
    const ID_FIELD: &'static str = "ModelHash";
    const REFERENCE_FIELD: &'static str = "model_reference";
    const PYTHON_VERSIONS: &'static [PythonVersion] = PythonVersion::MODEL;
    const REQUIRES_ARTIFACT: bool = true;
    const ASYNC_INPUT_FIELD: &'static str = "input";
    type Run = AsyncModelRun;

    fn requires_schema(_operation: Operation) -> bool {
        true
    }
}

impl DeployableKind for PreprocessingDeployment {
    const RESOURCE: ResourceKind = ResourceKind::Preprocessing;
    const UPLOAD_ACTION: &'static str = "register";
    const ID_FIELD: &'static str = "Hash";
    const REFERENCE_FIELD: &'static str = "script_reference";
    const PYTHON_VERSIONS: &'static [PythonVersion] = PythonVersion::PREPROCESSING;
    const REQUIRES_ARTIFACT: bool = false;
    const ASYNC_INPUT_FIELD: &'static str = "dataset";
    type Run = PreprocessingRun;

    fn requires_schema(operation: Operation) -> bool {
        operation == Operation::Sync
    }
}

/// Input of an async run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncInput {
    /// File uploaded with the request.
    File(PathBuf),
    /// Hash of a dataset already stored on the server.
    Dataset(String),
}

/// Everything needed to create a deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentRequest {
    pub name: String,
    /// Name of the entrypoint function inside the source file.
    pub reference: String,
    pub source_file: PathBuf,
    pub requirements_file: PathBuf,
    pub model_file: Option<PathBuf>,
    /// Sample input for the entrypoint.
    pub schema: Option<JsonSource>,
    /// Target group. `None` uses the default group.
    pub group: Option<String>,
    pub extra_files: Vec<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Dotted Python version, e.g. `"3.10"`.
    pub python_version: String,
    pub operation: Operation,
    /// Required for async deployments; sync ones always take JSON.
    pub input_type: Option<InputType>,
}

impl DeploymentRequest {
    pub fn new(
        name: impl Into<String>,
        reference: impl Into<String>,
        source_file: impl Into<PathBuf>,
        requirements_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            reference: reference.into(),
            source_file: source_file.into(),
            requirements_file: requirements_file.into(),
            model_file: None,
            schema: None,
            group: None,
            extra_files: Vec::new(),
            env_file: None,
            python_version: "3.8".to_string(),
            operation: Operation::Sync,
            input_type: None,
        }
    }

    pub fn model_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_file = Some(path.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<JsonSource>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn extra_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra_files.push(path.into());
        self
    }

    pub fn env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    pub fn python_version(mut self, version: impl Into<String>) -> Self {
        self.python_version = version.into();
        self
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    pub fn input_type(mut self, input_type: InputType) -> Self {
        self.input_type = Some(input_type);
        self
    }

    /// Check local preconditions and build the upload body.
    fn prepare<K: DeployableKind>(&self) -> Result<MultipartForm, SdkError> {
        let python = PythonVersion::parse_allowed(&self.python_version, K::PYTHON_VERSIONS)?;

        let schema = match (&self.schema, K::requires_schema(self.operation)) {
            (None, true) => {
                return Err(SdkError::Input(format!(
                    "schema is mandatory for {} {} deployments",
                    self.operation,
                    K::RESOURCE
                )))
            }
            (schema, _) => schema.as_ref(),
        };

        if K::REQUIRES_ARTIFACT && self.model_file.is_none() {
            return Err(SdkError::Input("model file is mandatory".to_string()));
        }

        let file_name = self
            .source_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let source = SourceKind::from_file_name(&file_name)?;

        let input_type = match self.operation {
            Operation::Sync => InputType::Json,
            Operation::Async => self.input_type.ok_or_else(|| {
                SdkError::Input(
                    "async deployments must declare an input type: json, csv or parquet"
                        .to_string(),
                )
            })?,
        };

        let mut form = MultipartForm::new()
            .text("name", &self.name)
            .text(K::REFERENCE_FIELD, &self.reference)
            .text("operation", self.operation.as_str())
            .text("input_type", input_type.as_str())
            .text("python_version", python.wire_name())
            .file_as("source", source.upload_name(), &self.source_file)
            .file_as("requirements", "requirements.txt", &self.requirements_file);

        if let Some(model_file) = &self.model_file {
            form = form.file("model", model_file);
        }
        if let Some(schema) = schema {
            form = form.json_source("schema", "schema.json", schema)?;
        }
        if let Some(env) = &self.env_file {
            form = form.file_as("env", ".env", env);
        }
        for extra in &self.extra_files {
            form = form.file("extra", extra);
        }

        Ok(form)
    }
}

/// Describe payload of a deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeploymentDescription {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of a chained preprocessing and model run.
#[derive(Debug)]
pub enum ChainedOutcome {
    /// Preprocessing succeeded and the model run was started.
    Model(ExecutionHandle<AsyncModelRun>),
    /// Preprocessing did not succeed; the model was never called.
    PreprocessingFailed(ExecutionHandle<PreprocessingRun>),
}

/// Local mirror of one deployment.
pub struct ResourceLifecycleController<K: DeployableKind> {
    session: Session,
    id: ResourceId,
    group: GroupName,
    name: Option<String>,
    operation: Operation,
    status: ResourceStatus,
    observed: bool,
    ready: bool,
    last_message: Option<String>,
    group_token: Option<String>,
    description: Option<DeploymentDescription>,
    _kind: PhantomData<K>,
}

pub type ModelController = ResourceLifecycleController<ModelDeployment>;
pub type PreprocessingController = ResourceLifecycleController<PreprocessingDeployment>;

impl<K: DeployableKind> ResourceLifecycleController<K> {
    fn new(session: Session, id: ResourceId, group: GroupName, operation: Operation) -> Self {
        Self {
            session,
            id,
            group,
            name: None,
            operation,
            status: Lifecycle::Deployment.initial(),
            observed: false,
            ready: false,
            last_message: None,
            group_token: None,
            description: None,
            _kind: PhantomData,
        }
    }

    /// Ask the server to build and host an uploaded deployment.
    pub(crate) async fn host_uploaded(
        session: Session,
        id: ResourceId,
        group: GroupName,
        operation: Operation,
        name: String,
    ) -> Result<Self, SdkError> {
        let host = ApiRequest::get(format!(
            "{}/{}/host/{}/{}",
            K::RESOURCE.path_segment(),
            operation.path_segment(),
            group,
            id
        ));
        let response = session.send_authed(host).await?;
        if response.status != 202 {
            return Err(reject_input(&response, K::RESOURCE, "Host error"));
        }
        info!(kind = %K::RESOURCE, id = %id, "Host in process");

        // Starts in Requested with nothing observed yet, so the first poll
        // may report any status of the lifecycle.
        let mut controller = Self::new(session, id, group, operation);
        controller.name = Some(name);
        Ok(controller)
    }

    /// Controller for an existing deployment, without any server call.
    ///
    /// Nothing is known about it yet, not even its operation; the first
    /// status or describe call fills it in. Use [`attach`](Self::attach) to
    /// invoke it.
    pub fn detached(session: Session, id: ResourceId, group: GroupName) -> Self {
        Self::new(session, id, group, Operation::default())
    }

    /// Upload, host and optionally wait for a new deployment.
    ///
    /// Local preconditions are checked before any request is sent. Without
    /// `wait_for_ready` no status call is made and the controller comes back
    /// not ready.
    pub async fn create(
        session: Session,
        request: DeploymentRequest,
        wait_for_ready: bool,
    ) -> Result<Self, SdkError> {
        let form = request.prepare::<K>()?;
        let group = session.resolve_group(request.group.as_deref()).await?;

        let upload = ApiRequest::post(format!(
            "{}/{}/{}",
            K::RESOURCE.path_segment(),
            K::UPLOAD_ACTION,
            group
        ))
        .multipart(form);
        let response = session.send_authed(upload).await?;
        let id = match response.status {
            201 => {
                let body: Value = response.json()?;
                let id = body
                    .get(K::ID_FIELD)
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        SdkError::resource(
                            K::RESOURCE,
                            format!("upload response carries no {}", K::ID_FIELD),
                        )
                    })?;
                let message = body.get("Message").and_then(Value::as_str).unwrap_or_default();
                info!(kind = %K::RESOURCE, id = %id, message, "Uploaded");
                ResourceId::new(id)
            }
            _ => return Err(reject_input(&response, K::RESOURCE, "Upload error")),
        };

        let mut controller =
            Self::host_uploaded(session, id, group, request.operation, request.name).await?;

        if wait_for_ready {
            let poller = controller.session.config().build_poller();
            controller.wait_ready_with(&poller).await?;
            controller.settle()?;
        } else {
            info!(resource = %controller.target(), "Returning before the deployment is ready");
        }

        Ok(controller)
    }

    /// Load an existing deployment.
    pub async fn attach(
        session: Session,
        id: ResourceId,
        group: GroupName,
        wait_for_ready: bool,
    ) -> Result<Self, SdkError> {
        let mut controller = Self::detached(session, id, group);
        controller.refresh_status().await?;

        if wait_for_ready && controller.status.is_pending() {
            let poller = controller.session.config().build_poller();
            controller.wait_ready_with(&poller).await?;
        }
        controller.settle()?;
        controller.describe().await?;

        Ok(controller)
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn group(&self) -> &GroupName {
        &self.group
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Status as of the last fetch.
    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    /// Readiness cached from the last observed status.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    pub fn description(&self) -> Option<&DeploymentDescription> {
        self.description.as_ref()
    }

    /// Store the group token used for invocations.
    pub fn set_group_token(&mut self, token: impl Into<String>) {
        self.group_token = Some(token.into());
        info!(group = %self.group, "Group token added");
    }

    fn path(&self, action: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            K::RESOURCE.path_segment(),
            action,
            self.group,
            self.id
        )
    }

    /// Record a status seen on the server.
    ///
    /// The first observation only has to belong to the lifecycle; later ones
    /// must follow the transition table.
    fn observe(&mut self, status: ResourceStatus) -> Result<(), SdkError> {
        self.status = if self.observed {
            Lifecycle::Deployment.transition(self.status, status)?
        } else {
            Lifecycle::Deployment.check(status)?
        };
        self.observed = true;
        self.ready = self.status == ResourceStatus::Deployed;
        Ok(())
    }

    /// Turn a settled non-deployed status into an error.
    fn settle(&self) -> Result<(), SdkError> {
        match self.status {
            ResourceStatus::Failed => {
                let message = self.last_message.as_deref().unwrap_or("no message");
                error!(resource = %self.target(), message, "Deploy failed");
                Err(SdkError::Resource {
                    kind: K::RESOURCE,
                    message: format!("{} deploy failed: {message}", self.target()),
                    body: self.last_message.clone(),
                })
            }
            ResourceStatus::Disabled | ResourceStatus::Ready => Err(SdkError::resource(
                K::RESOURCE,
                format!(
                    "{} unavailable (disabled or deploy process is incomplete)",
                    self.target()
                ),
            )),
            _ => Ok(()),
        }
    }

    /// Fetch the current status.
    pub async fn refresh_status(&mut self) -> Result<StatusReport, SdkError> {
        let response = self
            .session
            .send_authed(ApiRequest::get(self.path("status")))
            .await?
            .require_status(&[200, 410], K::RESOURCE, "Could not get the status")?;

        let report = response
            .json::<StatusBody>()?
            .into_report(Lifecycle::Deployment)?;
        self.observe(report.status)?;
        self.last_message = report.message.clone();
        Ok(report)
    }

    /// Fetch the full description; also refreshes name, operation and
    /// status.
    pub async fn describe(&mut self) -> Result<&DeploymentDescription, SdkError> {
        let response = self
            .session
            .send_authed(ApiRequest::get(self.path("describe")))
            .await?
            .require_status(&[200], K::RESOURCE, "Could not describe")?;

        let description = response
            .json::<DescriptionBody<DeploymentDescription>>()?
            .description;
        if let Some(status) = parse_status(description.status.as_deref(), Lifecycle::Deployment)? {
            self.observe(status)?;
        }
        if let Some(operation) = &description.operation {
            self.operation = operation.parse()?;
        }
        if let Some(name) = &description.name {
            self.name = Some(name.clone());
        }

        Ok(self.description.insert(description))
    }

    /// Wait at the sustained interval until the deployment settles.
    pub async fn wait_ready(&mut self) -> Result<ResourceStatus, SdkError> {
        let poller = self.session.config().poller();
        self.wait_ready_with(&poller).await
    }

    /// Wait with a caller-supplied poller.
    pub async fn wait_ready_with(&mut self, poller: &StatusPoller) -> Result<ResourceStatus, SdkError> {
        poller.wait(self).await?;
        Ok(self.status)
    }

    /// Make sure the deployment can take requests.
    ///
    /// A cached ready flag is trusted. Otherwise one describe call decides.
    pub async fn ensure_ready(&mut self) -> Result<(), SdkError> {
        if self.ready {
            return Ok(());
        }

        self.describe().await?;
        if self.ready {
            Ok(())
        } else {
            Err(SdkError::resource(
                K::RESOURCE,
                format!(
                    "{} is not available (status {})",
                    self.target(),
                    self.status
                ),
            ))
        }
    }

    fn require_operation(&self, expected: Operation) -> Result<(), SdkError> {
        if self.operation == expected {
            Ok(())
        } else {
            Err(SdkError::resource(
                K::RESOURCE,
                format!(
                    "{} is a {} deployment, this call needs {}",
                    self.target(),
                    self.operation,
                    expected
                ),
            ))
        }
    }

    /// Explicit token, then the stored one, then the configured one.
    fn group_token_for(&self, explicit: Option<&str>) -> Result<String, SdkError> {
        explicit
            .map(str::to_owned)
            .or_else(|| self.group_token.clone())
            .or_else(|| self.session.config().group_token.clone())
            .ok_or_else(|| {
                SdkError::Input(format!("group token not informed for group '{}'", self.group))
            })
    }

    /// Like [`group_token_for`](Self::group_token_for), remembering an
    /// explicit token when none is stored yet.
    fn take_group_token(&mut self, explicit: Option<&str>) -> Result<String, SdkError> {
        let token = self.group_token_for(explicit)?;
        if self.group_token.is_none() && explicit.is_some() {
            self.group_token = Some(token.clone());
        }
        Ok(token)
    }

    async fn sync_run(&self, body: Value, token: &str) -> Result<Value, SdkError> {
        let request = ApiRequest::post(self.path("sync/run")).json(body);
        let response = self
            .session
            .send_with_group_token(request, token)
            .await?
            .require_status(&[200], K::RESOURCE, "Sync run failed")?;
        response.json()
    }

    async fn async_run(
        &self,
        input: AsyncInput,
        token: &str,
    ) -> Result<ExecutionHandle<K::Run>, SdkError> {
        let form = match input {
            AsyncInput::File(path) => MultipartForm::new().file(K::ASYNC_INPUT_FIELD, path),
            AsyncInput::Dataset(hash) => MultipartForm::new().text("dataset_hash", hash),
        };
        let request = ApiRequest::post(self.path("async/run")).multipart(form);
        let response = self
            .session
            .send_with_group_token(request, token)
            .await?
            .require_status(&[202], K::RESOURCE, "Could not start execution")?;

        let started: ExecutionStarted = response.json()?;
        info!(
            resource = %self.target(),
            execution_id = %started.execution_id,
            message = started.message.as_deref().unwrap_or_default(),
            "Execution started"
        );

        let mut handle = ExecutionHandle::new(
            self.session.clone(),
            self.id.clone(),
            self.group.clone(),
            started.execution_id,
        );
        handle.get_status().await?;
        Ok(handle)
    }

    async fn follow(
        &self,
        mut handle: ExecutionHandle<K::Run>,
        wait_complete: bool,
    ) -> Result<ExecutionHandle<K::Run>, SdkError> {
        if wait_complete {
            handle.wait_complete(&self.session.config().poller()).await?;
        }
        if handle.status() == ResourceStatus::Failed {
            handle.ensure_succeeded()?;
        }
        Ok(handle)
    }

    /// Run a sync deployment and return its answer.
    pub async fn invoke_sync(
        &mut self,
        data: Value,
        group_token: Option<&str>,
    ) -> Result<Value, SdkError> {
        self.require_operation(Operation::Sync)?;
        let token = self.take_group_token(group_token)?;
        self.ensure_ready().await?;
        self.sync_run(json!({ "Input": data }), &token).await
    }

    /// Start an async run and refresh its status once.
    ///
    /// The handle is returned whatever that status is.
    pub async fn start_async(
        &mut self,
        input: AsyncInput,
        group_token: Option<&str>,
    ) -> Result<ExecutionHandle<K::Run>, SdkError> {
        self.require_operation(Operation::Async)?;
        let token = self.take_group_token(group_token)?;
        self.ensure_ready().await?;
        self.async_run(input, &token).await
    }

    /// Start an async run, optionally wait for it, and fail if it failed.
    pub async fn invoke_async(
        &mut self,
        input: AsyncInput,
        group_token: Option<&str>,
        wait_complete: bool,
    ) -> Result<ExecutionHandle<K::Run>, SdkError> {
        let handle = self.start_async(input, group_token).await?;
        self.follow(handle, wait_complete).await
    }

    /// Handle on an earlier run of an async deployment.
    pub async fn get_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<ExecutionHandle<K::Run>, SdkError> {
        if self.operation != Operation::Async {
            return Err(SdkError::resource(
                K::RESOURCE,
                "sync deployments don't have executions",
            ));
        }
        ExecutionHandle::attach(
            self.session.clone(),
            self.id.clone(),
            self.group.clone(),
            execution_id,
        )
        .await
    }

    /// Restart the deployment.
    pub async fn restart(&mut self, wait_for_ready: bool) -> Result<ResourceStatus, SdkError> {
        self.session
            .send_authed(ApiRequest::get(self.path("restart")))
            .await?
            .require_status(&[200], K::RESOURCE, "Could not restart")?;
        info!(resource = %self.target(), "Restarting");

        self.refresh_status().await?;
        if wait_for_ready {
            self.wait_ready().await?;
        }
        Ok(self.status)
    }

    /// Disable the deployment and re-read its description.
    pub async fn disable(&mut self) -> Result<Value, SdkError> {
        let response = self
            .session
            .send_authed(ApiRequest::post(self.path("disable")))
            .await?
            .require_status(&[200], K::RESOURCE, "Could not disable")?;
        let body: Value = response.json()?;

        self.describe().await?;
        self.ready = false;
        info!(resource = %self.target(), "Disabled");
        Ok(body)
    }

    /// Delete the deployment. Irreversible.
    pub async fn delete(self) -> Result<Value, SdkError> {
        let response = self
            .session
            .send_authed(ApiRequest::delete(self.path("delete")))
            .await?
            .require_status(&[200], K::RESOURCE, "Could not delete")?;
        warn!(resource = %self.target(), "Deleted");
        response.json()
    }

    /// Health of the running deployment.
    ///
    /// Sync deployments answer their own health endpoint. Async ones have
    /// none, so the server health is checked instead.
    pub async fn health(&self, group_token: Option<&str>) -> Result<String, SdkError> {
        match self.operation {
            Operation::Sync => {
                let token = self.group_token_for(group_token)?;
                let response = self
                    .session
                    .send_with_group_token(ApiRequest::get(self.path("sync/health")), &token)
                    .await?
                    .require_status(&[200], K::RESOURCE, "Could not get the health")?;
                Ok(response.json::<MessageBody>()?.message)
            }
            Operation::Async => {
                self.session.server_health().await?;
                Ok("OK".to_string())
            }
        }
    }

    /// Logs of this deployment.
    pub async fn logs(&self, query: &LogQuery) -> Result<Vec<LogEntry>, SdkError> {
        self.session
            .get_logs(K::RESOURCE, &self.path("logs"), query)
            .await
    }
}

impl ResourceLifecycleController<ModelDeployment> {
    /// Sync prediction with a sync preprocessing step applied server-side.
    pub async fn predict_sync_chained(
        &mut self,
        data: Value,
        preprocessing: &PreprocessingController,
        group_token: Option<&str>,
    ) -> Result<Value, SdkError> {
        self.require_operation(Operation::Sync)?;
        if preprocessing.operation() != Operation::Sync {
            return Err(SdkError::resource(
                ResourceKind::Preprocessing,
                "can only attach sync preprocessing to sync models",
            ));
        }
        let token = self.take_group_token(group_token)?;
        self.ensure_ready().await?;
        self.sync_run(
            json!({ "Input": data, "ScriptHash": preprocessing.id().as_str() }),
            &token,
        )
        .await
    }

    /// Run async preprocessing, then feed its result to this async model.
    ///
    /// The preprocessing run is always waited on. If it does not succeed,
    /// the model is never called and the preprocessing handle is returned.
    pub async fn predict_chained(
        &mut self,
        input: AsyncInput,
        preprocessing: &mut PreprocessingController,
        group_token: Option<&str>,
        wait_complete: bool,
    ) -> Result<ChainedOutcome, SdkError> {
        self.require_operation(Operation::Async)?;
        if preprocessing.operation() != Operation::Async {
            return Err(SdkError::resource(
                ResourceKind::Preprocessing,
                "can only use async preprocessing with async models",
            ));
        }
        let token = self.take_group_token(group_token)?;
        self.ensure_ready().await?;

        preprocessing.set_group_token(token.clone());
        let mut pre_run = preprocessing.start_async(input, Some(&token)).await?;
        pre_run
            .wait_complete(&self.session.config().poller())
            .await?;

        if pre_run.status() != ResourceStatus::Succeeded {
            error!(
                execution = %pre_run,
                "Preprocessing failed, no data sent to the model"
            );
            return Ok(ChainedOutcome::PreprocessingFailed(pre_run));
        }

        let staging = self.session.config().staging_dir.clone();
        let Some(staged) = pre_run.download_result(&staging).await? else {
            return Err(SdkError::resource(
                ResourceKind::Preprocessing,
                format!("result of {pre_run} is not available"),
            ));
        };

        let handle = self.async_run(AsyncInput::File(staged), &token).await?;
        let handle = self.follow(handle, wait_complete).await?;
        Ok(ChainedOutcome::Model(handle))
    }
}

#[async_trait]
impl<K: DeployableKind> StatusSource for ResourceLifecycleController<K> {
    fn target(&self) -> String {
        format!("{}/{}/{}", K::RESOURCE, self.group, self.id)
    }

    async fn fetch_status(&mut self) -> Result<StatusReport, SdkError> {
        self.refresh_status().await
    }
}

impl<K: DeployableKind> fmt::Display for ResourceLifecycleController<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} \"{}\" (group: {}, id: {}, status: {})",
            K::RESOURCE,
            self.name.as_deref().unwrap_or("?"),
            self.group,
            self.id,
            self.status
        )
    }
}

impl<K: DeployableKind> fmt::Debug for ResourceLifecycleController<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLifecycleController")
            .field("kind", &K::RESOURCE)
            .field("id", &self.id)
            .field("group", &self.group)
            .field("operation", &self.operation)
            .field("status", &self.status)
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use modelops_core::CoreError;

    use crate::config::ClientConfig;
    use crate::http::{Method, PartSource, RequestBody};
    use crate::testing::{session_with, test_config, test_session, MockTransport};

    use super::*;

    const UPLOAD: &str = "model/upload/default";
    const HOST_SYNC: &str = "model/sync/host/default/m1";
    const STATUS: &str = "model/status/default/m1";
    const DESCRIBE: &str = "model/describe/default/m1";
    const SYNC_RUN: &str = "model/sync/run/default/m1";
    const ASYNC_RUN: &str = "model/async/run/default/m1";

    fn sync_request() -> DeploymentRequest {
        DeploymentRequest::new("churn", "score", "app.py", "requirements.txt")
            .model_file("model.pkl")
            .schema(json!({"age": 31}))
            .python_version("3.10")
    }

    fn uploaded(mock: &MockTransport) {
        mock.on_json(
            Method::Post,
            UPLOAD,
            201,
            json!({"ModelHash": "m1", "Message": "Model uploaded"}),
        )
        .on(Method::Get, HOST_SYNC, 202, "");
    }

    fn model<K: DeployableKind>(
        session: Session,
        id: &str,
        operation: Operation,
        ready: bool,
    ) -> ResourceLifecycleController<K> {
        let mut controller =
            ResourceLifecycleController::new(session, ResourceId::new(id), GroupName::default(), operation);
        if ready {
            controller.observe(ResourceStatus::Deployed).unwrap();
        }
        controller
    }

    #[tokio::test]
    async fn test_create_without_wait_makes_no_status_calls() {
        let mock = MockTransport::new();
        uploaded(&mock);

        let controller = ModelController::create(test_session(&mock), sync_request(), false)
            .await
            .unwrap();

        assert_eq!(mock.total(), 2);
        assert_eq!(mock.count(Method::Get, STATUS), 0);
        assert!(!controller.is_ready());
        assert_eq!(controller.status(), ResourceStatus::Requested);
        assert_eq!(controller.id().as_str(), "m1");

        let upload = mock.last(Method::Post, UPLOAD).unwrap();
        let RequestBody::Multipart(form) = upload.body else {
            panic!("upload must be multipart");
        };
        assert_eq!(form.field("python_version"), Some("Python310"));
        assert_eq!(form.field("input_type"), Some("json"));
        assert_eq!(form.field("model_reference"), Some("score"));
        assert_eq!(form.part("source").map(|p| p.file_name.as_str()), Some("script.py"));
        assert!(form.part("model").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_with_wait_polls_until_deployed() {
        let mock = MockTransport::new();
        uploaded(&mock);
        mock.on_json(Method::Get, STATUS, 200, json!({"Status": "Building"}))
            .on_json(Method::Get, STATUS, 200, json!({"Status": "Deployed"}));

        let started = tokio::time::Instant::now();
        let controller = ModelController::create(test_session(&mock), sync_request(), true)
            .await
            .unwrap();

        assert_eq!(mock.count(Method::Get, STATUS), 2);
        assert!(controller.is_ready());
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_with_wait_accepts_requested_then_deployed() {
        let mock = MockTransport::new();
        uploaded(&mock);
        mock.on_json(Method::Get, STATUS, 200, json!({"Status": "Requested"}))
            .on_json(Method::Get, STATUS, 200, json!({"Status": "Deployed"}));

        let controller = ModelController::create(test_session(&mock), sync_request(), true)
            .await
            .unwrap();

        assert_eq!(mock.count(Method::Get, STATUS), 2);
        assert_eq!(controller.status(), ResourceStatus::Deployed);
        assert!(controller.is_ready());
    }

    #[tokio::test]
    async fn test_refresh_after_create_without_wait_accepts_requested() {
        let mock = MockTransport::new();
        uploaded(&mock);
        mock.on_json(Method::Get, STATUS, 200, json!({"Status": "Requested"}))
            .on_json(Method::Get, STATUS, 200, json!({"Status": "Building"}));

        let mut controller = ModelController::create(test_session(&mock), sync_request(), false)
            .await
            .unwrap();

        assert_eq!(controller.refresh_status().await.unwrap().status, ResourceStatus::Requested);
        assert_eq!(controller.refresh_status().await.unwrap().status, ResourceStatus::Building);
        assert!(!controller.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failed_build_carries_server_message() {
        let mock = MockTransport::new();
        uploaded(&mock);
        mock.on_json(
            Method::Get,
            STATUS,
            200,
            json!({"Status": "Failed", "Message": "pip install failed"}),
        );

        let err = ModelController::create(test_session(&mock), sync_request(), true)
            .await
            .unwrap_err();

        match err {
            SdkError::Resource { kind, message, body } => {
                assert_eq!(kind, ResourceKind::Model);
                assert!(message.contains("pip install failed"));
                assert_eq!(body.as_deref(), Some("pip install failed"));
            }
            other => panic!("Expected Resource, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_local_validation_never_reaches_network() {
        let mock = MockTransport::new();
        let session = test_session(&mock);

        let cases = [
            sync_request().python_version("3.7"),
            DeploymentRequest::new("churn", "score", "app.py", "requirements.txt")
                .model_file("model.pkl"),
            DeploymentRequest::new("churn", "score", "app.py", "requirements.txt")
                .schema(PathBuf::from("schema.json")),
            DeploymentRequest::new("churn", "score", "app.R", "requirements.txt")
                .model_file("model.pkl")
                .schema(PathBuf::from("schema.json")),
            sync_request().operation(Operation::Async),
        ];

        for request in cases {
            let err = ModelController::create(session.clone(), request, false)
                .await
                .unwrap_err();
            assert!(matches!(err, SdkError::Input(_)), "got {err:?}");
        }
        assert_eq!(mock.total(), 0);
    }

    #[tokio::test]
    async fn test_preprocessing_schema_only_for_sync() {
        let request = DeploymentRequest::new("clean", "parse", "prep.ipynb", "requirements.txt")
            .python_version("3.7")
            .operation(Operation::Async)
            .input_type(InputType::Csv);
        let form = request.prepare::<PreprocessingDeployment>().unwrap();
        assert_eq!(form.field("script_reference"), Some("parse"));
        assert_eq!(form.field("input_type"), Some("csv"));
        assert_eq!(
            form.part("source").map(|p| p.file_name.as_str()),
            Some("notebook.ipynb")
        );

        let sync = DeploymentRequest::new("clean", "parse", "prep.py", "requirements.txt");
        assert!(matches!(
            sync.prepare::<PreprocessingDeployment>(),
            Err(SdkError::Input(_))
        ));
    }

    #[tokio::test]
    async fn test_create_in_unknown_group_uploads_nothing() {
        let mock = MockTransport::new();
        mock.on_json(Method::Get, "groups", 200, json!({"Results": [{"Name": "default"}]}));

        let err = ModelController::create(test_session(&mock), sync_request().group("Fraud Team"), false)
            .await
            .unwrap_err();

        assert!(matches!(err, SdkError::Group(name) if name == "fraud_team"));
        assert_eq!(mock.count(Method::Post, "model/upload/fraud_team"), 0);
    }

    #[tokio::test]
    async fn test_upload_rejection_is_input_error() {
        let mock = MockTransport::new();
        mock.on(Method::Post, UPLOAD, 422, "model_reference not found in source");

        let err = ModelController::create(test_session(&mock), sync_request(), false)
            .await
            .unwrap_err();

        assert!(matches!(err, SdkError::Input(m) if m.contains("model_reference not found")));
    }

    #[tokio::test]
    async fn test_missing_group_token_makes_no_calls() {
        let mock = MockTransport::new();
        let mut controller: ModelController = model(test_session(&mock), "m1", Operation::Sync, false);

        let err = controller.invoke_sync(json!({"age": 31}), None).await.unwrap_err();

        assert!(matches!(err, SdkError::Input(_)));
        assert_eq!(mock.total(), 0);
    }

    #[tokio::test]
    async fn test_invoke_sync_rechecks_stale_readiness_once() {
        let mock = MockTransport::new();
        mock.on_json(
            Method::Get,
            DESCRIBE,
            200,
            json!({"Description": {"Name": "churn", "Status": "Deployed", "Operation": "Sync"}}),
        )
        .on_json(Method::Post, SYNC_RUN, 200, json!({"Pred": 0.7}));
        let mut controller: ModelController = model(test_session(&mock), "m1", Operation::Sync, false);

        let answer = controller
            .invoke_sync(json!({"age": 31}), Some("group-token"))
            .await
            .unwrap();
        assert_eq!(answer, json!({"Pred": 0.7}));

        // cached readiness and stored token are reused
        controller.invoke_sync(json!({"age": 40}), None).await.unwrap();

        assert_eq!(mock.count(Method::Get, DESCRIBE), 1);
        assert_eq!(mock.count(Method::Post, SYNC_RUN), 2);
        let run = mock.last(Method::Post, SYNC_RUN).unwrap();
        assert_eq!(run.bearer.as_deref(), Some("group-token"));
        assert_eq!(run.body, RequestBody::Json(json!({"Input": {"age": 40}})));
        assert_eq!(controller.name(), Some("churn"));
    }

    #[tokio::test]
    async fn test_not_deployed_blocks_invocation() {
        let mock = MockTransport::new();
        mock.on_json(Method::Get, DESCRIBE, 200, json!({"Description": {"Status": "Building"}}));
        let config = ClientConfig {
            group_token: Some("configured".to_string()),
            ..test_config()
        };
        let mut controller: ModelController =
            model(session_with(&mock, config), "m1", Operation::Sync, false);

        let err = controller.invoke_sync(json!({}), None).await.unwrap_err();

        assert!(matches!(err, SdkError::Resource { kind: ResourceKind::Model, .. }));
        assert_eq!(mock.count(Method::Post, SYNC_RUN), 0);
    }

    #[tokio::test]
    async fn test_sync_chained_sends_script_hash() {
        let mock = MockTransport::new();
        mock.on_json(Method::Post, SYNC_RUN, 200, json!({"Pred": 1}));
        let session = test_session(&mock);
        let mut controller: ModelController = model(session.clone(), "m1", Operation::Sync, true);
        let preprocessing: PreprocessingController = model(session, "p1", Operation::Sync, true);

        controller
            .predict_sync_chained(json!({"a": 1}), &preprocessing, Some("tok"))
            .await
            .unwrap();

        let run = mock.last(Method::Post, SYNC_RUN).unwrap();
        assert_eq!(
            run.body,
            RequestBody::Json(json!({"Input": {"a": 1}, "ScriptHash": "p1"}))
        );
    }

    #[tokio::test]
    async fn test_async_run_failing_immediately_is_error() {
        let mock = MockTransport::new();
        mock.on_json(Method::Post, ASYNC_RUN, 202, json!({"ExecutionId": 4, "Message": "queued"}))
            .on_json(
                Method::Get,
                "model/async/status/default/4",
                200,
                json!({"Status": "Failed", "Message": "bad csv"}),
            );
        let mut controller: ModelController = model(test_session(&mock), "m1", Operation::Async, true);

        let err = controller
            .invoke_async(AsyncInput::Dataset("D1".to_string()), Some("tok"), false)
            .await
            .unwrap_err();

        assert!(matches!(err, SdkError::ExecutionFailed { message, .. } if message == "bad csv"));
        let run = mock.last(Method::Post, ASYNC_RUN).unwrap();
        let RequestBody::Multipart(form) = run.body else {
            panic!("async run must be multipart");
        };
        assert_eq!(form.field("dataset_hash"), Some("D1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chained_failed_preprocessing_never_calls_model() {
        let mock = MockTransport::new();
        mock.on_json(
            Method::Post,
            "preprocessing/async/run/default/p1",
            202,
            json!({"ExecutionId": "9"}),
        )
        .on_json(
            Method::Get,
            "preprocessing/async/status/default/9",
            200,
            json!({"Status": "Running"}),
        )
        .on_json(
            Method::Get,
            "preprocessing/async/status/default/9",
            200,
            json!({"Status": "Failed", "Message": "parse error"}),
        );
        let session = test_session(&mock);
        let mut controller: ModelController = model(session.clone(), "m1", Operation::Async, true);
        let mut preprocessing: PreprocessingController =
            model(session, "p1", Operation::Async, true);

        let outcome = controller
            .predict_chained(AsyncInput::File("raw.csv".into()), &mut preprocessing, Some("tok"), false)
            .await
            .unwrap();

        match outcome {
            ChainedOutcome::PreprocessingFailed(run) => {
                assert_eq!(run.status(), ResourceStatus::Failed);
                assert_eq!(run.last_message(), Some("parse error"));
            }
            other => panic!("Expected PreprocessingFailed, got {other:?}"),
        }
        assert_eq!(mock.count(Method::Post, ASYNC_RUN), 0);
        let pre = mock.last(Method::Post, "preprocessing/async/run/default/p1").unwrap();
        let RequestBody::Multipart(form) = pre.body else {
            panic!("async run must be multipart");
        };
        assert!(form.part("dataset").is_some());
    }

    #[tokio::test]
    async fn test_chained_success_forwards_staged_result() {
        let staging = tempfile::tempdir().unwrap();
        let mock = MockTransport::new();
        mock.on_json(
            Method::Post,
            "preprocessing/async/run/default/p1",
            202,
            json!({"ExecutionId": 9}),
        )
        .on_json(
            Method::Get,
            "preprocessing/async/status/default/9",
            200,
            json!({"Status": "Succeeded"}),
        )
        .on_json(
            Method::Get,
            "preprocessing/describe/default/p1/9",
            200,
            json!({"Description": {"ExecutionState": "Succeeded"}}),
        )
        .on(Method::Get, "preprocessing/async/result/default/9", 200, "cleaned")
        .on_json(Method::Post, ASYNC_RUN, 202, json!({"ExecutionId": 2}))
        .on_json(
            Method::Get,
            "model/async/status/default/2",
            200,
            json!({"Status": "Running"}),
        );
        let config = ClientConfig {
            staging_dir: staging.path().to_path_buf(),
            ..test_config()
        };
        let session = session_with(&mock, config);
        let mut controller: ModelController = model(session.clone(), "m1", Operation::Async, true);
        let mut preprocessing: PreprocessingController =
            model(session, "p1", Operation::Async, true);

        let outcome = controller
            .predict_chained(AsyncInput::File("raw.csv".into()), &mut preprocessing, Some("tok"), false)
            .await
            .unwrap();

        let ChainedOutcome::Model(run) = outcome else {
            panic!("expected the model run");
        };
        assert_eq!(run.execution_id(), ExecutionId::new(2));
        assert_eq!(run.status(), ResourceStatus::Running);

        let staged = staging.path().join("output_9.zip");
        assert_eq!(std::fs::read(&staged).unwrap(), b"cleaned");
        let model_run = mock.last(Method::Post, ASYNC_RUN).unwrap();
        let RequestBody::Multipart(form) = model_run.body else {
            panic!("async run must be multipart");
        };
        assert_eq!(form.part("input").map(|p| &p.source), Some(&PartSource::Path(staged)));
    }

    #[tokio::test]
    async fn test_chained_requires_async_preprocessing() {
        let mock = MockTransport::new();
        let session = test_session(&mock);
        let mut controller: ModelController = model(session.clone(), "m1", Operation::Async, true);
        let mut preprocessing: PreprocessingController = model(session, "p1", Operation::Sync, true);

        let err = controller
            .predict_chained(AsyncInput::File("raw.csv".into()), &mut preprocessing, Some("tok"), false)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SdkError::Resource {
                kind: ResourceKind::Preprocessing,
                ..
            }
        ));
        assert_eq!(mock.total(), 0);
    }

    #[tokio::test]
    async fn test_attach_reads_status_then_description() {
        let mock = MockTransport::new();
        mock.on_json(Method::Get, STATUS, 200, json!({"Status": "Deployed"}))
            .on_json(
                Method::Get,
                DESCRIBE,
                200,
                json!({"Description": {"Name": "churn", "Status": "Deployed", "Operation": "Async"}}),
            );

        let controller = ModelController::attach(
            test_session(&mock),
            ResourceId::new("m1"),
            GroupName::default(),
            true,
        )
        .await
        .unwrap();

        assert!(controller.is_ready());
        assert_eq!(controller.operation(), Operation::Async);
        assert_eq!(controller.to_string(), "model \"churn\" (group: default, id: m1, status: Deployed)");
    }

    #[tokio::test]
    async fn test_attach_disabled_is_unavailable() {
        let mock = MockTransport::new();
        mock.on_json(Method::Get, STATUS, 200, json!({"Status": "Disabled"}));

        let err = ModelController::attach(
            test_session(&mock),
            ResourceId::new("m1"),
            GroupName::default(),
            false,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SdkError::Resource { message, .. } if message.contains("unavailable")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_goes_through_building() {
        let mock = MockTransport::new();
        mock.on(Method::Get, "model/restart/default/m1", 200, "{}")
            .on_json(Method::Get, STATUS, 200, json!({"Status": "Building"}))
            .on_json(Method::Get, STATUS, 200, json!({"Status": "Deployed"}));
        let mut controller: ModelController = model(test_session(&mock), "m1", Operation::Sync, true);

        let status = controller.restart(true).await.unwrap();

        assert_eq!(status, ResourceStatus::Deployed);
        assert!(controller.is_ready());
        assert_eq!(mock.count(Method::Get, STATUS), 2);
    }

    #[tokio::test]
    async fn test_disable_clears_readiness() {
        let mock = MockTransport::new();
        mock.on_json(Method::Post, "model/disable/default/m1", 200, json!({"Message": "disabled"}))
            .on_json(Method::Get, DESCRIBE, 200, json!({"Description": {"Status": "Disabled"}}));
        let mut controller: ModelController = model(test_session(&mock), "m1", Operation::Sync, true);

        let body = controller.disable().await.unwrap();

        assert_eq!(body, json!({"Message": "disabled"}));
        assert_eq!(controller.status(), ResourceStatus::Disabled);
        assert!(!controller.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_disable() {
        let mock = MockTransport::new();
        mock.on_json(Method::Post, "model/disable/default/m1", 200, json!({"Message": "disabled"}))
            .on_json(Method::Get, DESCRIBE, 200, json!({"Description": {"Status": "Disabled"}}))
            .on(Method::Get, "model/restart/default/m1", 200, "{}")
            .on_json(Method::Get, STATUS, 200, json!({"Status": "Building"}))
            .on_json(Method::Get, STATUS, 200, json!({"Status": "Deployed"}));
        let mut controller: ModelController = model(test_session(&mock), "m1", Operation::Sync, true);

        controller.disable().await.unwrap();
        assert_eq!(controller.status(), ResourceStatus::Disabled);

        let status = controller.restart(true).await.unwrap();

        assert_eq!(status, ResourceStatus::Deployed);
        assert!(controller.is_ready());
        assert_eq!(mock.count(Method::Get, STATUS), 2);
    }

    #[tokio::test]
    async fn test_illegal_transition_is_core_error() {
        let mock = MockTransport::new();
        mock.on_json(Method::Get, STATUS, 200, json!({"Status": "Requested"}));
        let mut controller: ModelController = model(test_session(&mock), "m1", Operation::Sync, true);

        let err = controller.refresh_status().await.unwrap_err();

        assert!(matches!(
            err,
            SdkError::Core(CoreError::InvalidStateTransition {
                from: ResourceStatus::Deployed,
                to: ResourceStatus::Requested,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_health_and_delete() {
        let mock = MockTransport::new();
        mock.on_json(Method::Get, "model/sync/health/default/m1", 200, json!({"Message": "OK"}))
            .on_json(Method::Delete, "model/delete/default/m1", 200, json!({"Message": "deleted"}));
        let controller: ModelController = model(test_session(&mock), "m1", Operation::Sync, true);

        assert_eq!(controller.health(Some("tok")).await.unwrap(), "OK");
        let health = mock.last(Method::Get, "model/sync/health/default/m1").unwrap();
        assert_eq!(health.bearer.as_deref(), Some("tok"));

        let body = controller.delete().await.unwrap();
        assert_eq!(body, json!({"Message": "deleted"}));
    }

    #[tokio::test]
    async fn test_sync_deployment_has_no_executions() {
        let mock = MockTransport::new();
        let controller: ModelController = model(test_session(&mock), "m1", Operation::Sync, true);

        let err = controller.get_execution(ExecutionId::new(1)).await.unwrap_err();

        assert!(matches!(err, SdkError::Resource { .. }));
        assert_eq!(mock.total(), 0);
    }
}
