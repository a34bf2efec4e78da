//! Training experiments, their runs and promotion of a finished run to a
//! model deployment.

use std::fmt;
use std::path::{Path, PathBuf};

use modelops_core::{
    ExecutionId, GroupName, InputType, ModelType, Operation, PythonVersion, ResourceId,
    ResourceKind, ResourceStatus, SourceKind, TrainingExperiment, TrainingType,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::error::{classify, reject_input, SdkError};
use crate::execution::TrainingExecution;
use crate::http::{ApiRequest, JsonSource, MultipartForm};
use crate::lifecycle::ModelController;
use crate::session::Session;
use crate::wire::DescriptionBody;

/// Data a run trains on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainingData {
    /// File uploaded with the run.
    File(PathBuf),
    /// Hash of a dataset already stored on the server.
    Dataset(String),
}

/// Inputs specific to each training type.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingSpec {
    /// A training script run by the server.
    Custom {
        data: TrainingData,
        source_file: PathBuf,
        requirements_file: PathBuf,
        /// Name of the training function inside the source file.
        reference: String,
        env_file: Option<PathBuf>,
        extra_files: Vec<PathBuf>,
    },
    /// Server-side AutoML.
    AutoMl {
        data: TrainingData,
        configuration: JsonSource,
    },
    /// A model trained elsewhere, registered from its artifacts.
    External {
        features: PathBuf,
        target: PathBuf,
        predictions: Option<PathBuf>,
        model_file: Option<PathBuf>,
        parameters: Option<JsonSource>,
        metrics: Option<JsonSource>,
        requirements_file: Option<PathBuf>,
        env_file: Option<PathBuf>,
        extra_files: Vec<PathBuf>,
        /// Hash of a model already deployed from these artifacts.
        model_hash: Option<String>,
    },
}

impl TrainingSpec {
    pub fn training_type(&self) -> TrainingType {
        match self {
            Self::Custom { .. } => TrainingType::Custom,
            Self::AutoMl { .. } => TrainingType::AutoMl,
            Self::External { .. } => TrainingType::External,
        }
    }
}

/// One training run to upload and execute.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRunRequest {
    pub run_name: String,
    pub description: Option<String>,
    /// Dotted Python version, e.g. `"3.9"`.
    pub python_version: String,
    pub spec: TrainingSpec,
}

impl TrainingRunRequest {
    pub fn new(run_name: impl Into<String>, spec: TrainingSpec) -> Self {
        Self {
            run_name: run_name.into(),
            description: None,
            python_version: "3.8".to_string(),
            spec,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn python_version(mut self, version: impl Into<String>) -> Self {
        self.python_version = version.into();
        self
    }

    fn prepare(&self) -> Result<MultipartForm, SdkError> {
        if self.run_name.trim().is_empty() {
            return Err(SdkError::Input("run name is mandatory".to_string()));
        }
        let python = PythonVersion::parse_allowed(&self.python_version, PythonVersion::PREPROCESSING)?;

        let mut form = MultipartForm::new()
            .text("run_name", &self.run_name)
            .text("training_type", self.spec.training_type().as_str());
        if let Some(description) = &self.description {
            form = form.text("description", description);
        }

        match &self.spec {
            TrainingSpec::Custom {
                data,
                source_file,
                requirements_file,
                reference,
                env_file,
                extra_files,
            } => {
                if reference.trim().is_empty() {
                    return Err(SdkError::Input(
                        "training reference is mandatory on Custom training".to_string(),
                    ));
                }
                let upload_name = match SourceKind::from_file_name(&file_name(source_file))? {
                    SourceKind::Script => "app.py",
                    SourceKind::Notebook => "notebook.ipynb",
                };
                form = with_data(form, data)
                    .file_as("source", upload_name, source_file)
                    .file_as("requirements", "requirements.txt", requirements_file)
                    .text("training_reference", reference)
                    .text("python_version", python.wire_name());
                if let Some(env) = env_file {
                    form = form.file_as("env", ".env", env);
                }
                for extra in extra_files {
                    form = form.file("extra", extra);
                }
            }
            TrainingSpec::AutoMl {
                data,
                configuration,
            } => {
                form = with_data(form, data).json_source("conf_dict", "conf.json", configuration)?;
            }
            TrainingSpec::External {
                features,
                target,
                predictions,
                model_file,
                parameters,
                metrics,
                requirements_file,
                env_file,
                extra_files,
                model_hash,
            } => {
                form = form
                    .file_as("features", "features.parquet", features)
                    .file_as("target", "target.parquet", target)
                    .text("python_version", python.wire_name());
                if let Some(hash) = model_hash {
                    form = form.text("model_hash", hash);
                }
                if let Some(path) = predictions {
                    form = form.file_as("output", "predictions.parquet", path);
                }
                if let Some(path) = model_file {
                    form = form.file("model", path);
                }
                if let Some(source) = parameters {
                    form = form.json_source("parameters", "parameters.json", source)?;
                }
                if let Some(source) = metrics {
                    form = form.json_source("metrics", "metrics.json", source)?;
                }
                if let Some(path) = requirements_file {
                    form = form.file_as("requirements", "requirements.txt", path);
                }
                if let Some(env) = env_file {
                    form = form.file_as("env", ".env", env);
                }
                for extra in extra_files {
                    form = form.file("extra", extra);
                }
            }
        }
        Ok(form)
    }
}

fn with_data(form: MultipartForm, data: &TrainingData) -> MultipartForm {
    match data {
        TrainingData::File(path) => form.file("train_data", path),
        TrainingData::Dataset(hash) => form.text("dataset_hash", hash),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Describe payload of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExperimentDescription {
    pub experiment_name: String,
    pub model_type: ModelType,
    #[serde(default)]
    pub executions: Vec<ExecutionEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One execution listed in an experiment description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecutionEntry {
    pub id: ExecutionId,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Registered {
    training_hash: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UploadedRun {
    execution_id: ExecutionId,
}

/// A training experiment on the server.
#[derive(Debug)]
pub struct TrainingExperimentHandle {
    session: Session,
    experiment: TrainingExperiment,
    description: Option<ExperimentDescription>,
}

impl TrainingExperimentHandle {
    /// Register a new experiment and load it.
    pub async fn create(
        session: Session,
        name: &str,
        model_type: ModelType,
        group: Option<&str>,
    ) -> Result<Self, SdkError> {
        let group = session.resolve_group(group).await?;

        let request = ApiRequest::post(format!("training/register/{group}")).form(vec![
            ("experiment_name".to_string(), name.to_string()),
            ("model_type".to_string(), model_type.as_str().to_string()),
        ]);
        let response = session.send_authed(request).await?;
        let registered: Registered = match response.status {
            201 => response.json()?,
            _ => {
                return Err(classify(
                    &response,
                    ResourceKind::Training,
                    "Could not register the experiment",
                ))
            }
        };
        info!(
            training = %registered.training_hash,
            group = %group,
            message = registered.message.as_deref().unwrap_or_default(),
            "Training experiment registered"
        );

        Self::get(session, ResourceId::new(registered.training_hash), group).await
    }

    /// Load an existing experiment.
    pub async fn get(session: Session, id: ResourceId, group: GroupName) -> Result<Self, SdkError> {
        let experiment = TrainingExperiment::new(id, group, "", ModelType::Classification);
        let mut handle = Self {
            session,
            experiment,
            description: None,
        };
        handle.refresh().await?;
        Ok(handle)
    }

    pub fn id(&self) -> &ResourceId {
        &self.experiment.id
    }

    pub fn group(&self) -> &GroupName {
        &self.experiment.group
    }

    /// Local record, as of the last refresh.
    pub fn experiment(&self) -> &TrainingExperiment {
        &self.experiment
    }

    pub fn description(&self) -> Option<&ExperimentDescription> {
        self.description.as_ref()
    }

    fn path(&self, action: &str) -> String {
        format!("training/{action}/{}/{}", self.experiment.group, self.experiment.id)
    }

    /// Re-read the experiment and its execution list.
    pub async fn refresh(&mut self) -> Result<&TrainingExperiment, SdkError> {
        let response = self
            .session
            .send_authed(ApiRequest::get(self.path("describe")))
            .await?
            .require_status(
                &[200],
                ResourceKind::Training,
                "Could not describe the experiment",
            )?;

        let description = response
            .json::<DescriptionBody<ExperimentDescription>>()?
            .description;
        self.experiment.name = description.experiment_name.clone();
        self.experiment.model_type = description.model_type;
        self.experiment
            .set_executions(description.executions.iter().map(|e| e.id));
        self.description = Some(description);

        Ok(&self.experiment)
    }

    /// Upload a run, start it and optionally wait for it.
    ///
    /// Every local check happens before the upload. A run that ends up
    /// failed is an error.
    pub async fn run_training(
        &mut self,
        request: &TrainingRunRequest,
        wait_complete: bool,
    ) -> Result<TrainingExecution, SdkError> {
        let form = request.prepare()?;

        let upload = ApiRequest::post(self.path("upload")).multipart(form);
        let response = self.session.send_authed(upload).await?;
        if response.status != 201 {
            return Err(reject_input(
                &response,
                ResourceKind::Training,
                "Bad input for training upload",
            ));
        }
        let text = response.text();
        let execution_id = response
            .json::<UploadedRun>()
            .map(|run| run.execution_id)
            .ok()
            .or_else(|| ExecutionId::find_in(&text))
            .ok_or_else(|| SdkError::Resource {
                kind: ResourceKind::Training,
                message: "upload response carries no execution id".to_string(),
                body: Some(text.clone()),
            })?;
        info!(training = %self.experiment.id, execution_id = %execution_id, "{}", text);

        self.session
            .send_authed(ApiRequest::get(format!(
                "{}/{}",
                self.path("execute"),
                execution_id
            )))
            .await?
            .require_status(
                &[200],
                ResourceKind::Training,
                "Invalid parameters for training execution",
            )?;
        info!(training = %self.experiment.id, execution_id = %execution_id, "Model training starting");

        self.refresh().await?;

        let mut run = TrainingExecution::new(
            self.session.clone(),
            self.experiment.id.clone(),
            self.experiment.group.clone(),
            execution_id,
        );
        run.get_status().await?;
        if wait_complete {
            run.wait_complete(&self.session.config().poller()).await?;
        }
        if run.status() == ResourceStatus::Failed {
            run.ensure_succeeded()?;
        }
        Ok(run)
    }

    /// Handle on one run. `None` picks the most recent one.
    pub async fn get_training_execution(
        &mut self,
        execution_id: Option<ExecutionId>,
    ) -> Result<TrainingExecution, SdkError> {
        let execution_id = match execution_id {
            Some(id) => id,
            None => {
                self.refresh().await?;
                let latest = self.experiment.latest_execution().ok_or_else(|| {
                    SdkError::Input(format!(
                        "experiment {} has no executions yet",
                        self.experiment.id
                    ))
                })?;
                info!(execution_id = %latest, "Execution id not informed, using the latest");
                latest
            }
        };

        TrainingExecution::attach(
            self.session.clone(),
            self.experiment.id.clone(),
            self.experiment.group.clone(),
            execution_id,
        )
        .await
    }

    /// Handles on every run, in the order the server lists them.
    pub async fn get_all_training_executions(&mut self) -> Result<Vec<TrainingExecution>, SdkError> {
        self.refresh().await?;
        let mut runs = Vec::with_capacity(self.experiment.executions.len());
        for id in self.experiment.executions.clone() {
            runs.push(self.get_training_execution(Some(id)).await?);
        }
        Ok(runs)
    }
}

impl fmt::Display for TrainingExperimentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "training experiment \"{}\" (group: {}, id: {})",
            self.experiment.name, self.experiment.group, self.experiment.id
        )
    }
}

/// Deployment settings for a promoted run.
#[derive(Debug, Clone, PartialEq)]
pub struct PromoteRequest {
    pub name: String,
    pub operation: Operation,
    /// Required for async deployments; sync ones always take JSON.
    pub input_type: Option<InputType>,
    pub schema: Option<JsonSource>,
    /// Scoring function inside the source file. Not used for AutoML runs.
    pub reference: Option<String>,
    pub source_file: Option<PathBuf>,
    pub requirements_file: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub extra_files: Vec<PathBuf>,
}

impl PromoteRequest {
    pub fn new(name: impl Into<String>, operation: Operation) -> Self {
        Self {
            name: name.into(),
            operation,
            input_type: None,
            schema: None,
            reference: None,
            source_file: None,
            requirements_file: None,
            env_file: None,
            extra_files: Vec::new(),
        }
    }

    pub fn input_type(mut self, input_type: InputType) -> Self {
        self.input_type = Some(input_type);
        self
    }

    pub fn schema(mut self, schema: impl Into<JsonSource>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn entrypoint(mut self, reference: impl Into<String>, source_file: impl Into<PathBuf>) -> Self {
        self.reference = Some(reference.into());
        self.source_file = Some(source_file.into());
        self
    }

    pub fn requirements_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.requirements_file = Some(path.into());
        self
    }

    pub fn env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    pub fn extra_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra_files.push(path.into());
        self
    }

    fn prepare(&self, training_type: TrainingType) -> Result<MultipartForm, SdkError> {
        if self.name.trim().is_empty() {
            return Err(SdkError::Input("model name is mandatory".to_string()));
        }
        let input_type = match self.operation {
            Operation::Sync => InputType::Json,
            Operation::Async => self.input_type.ok_or_else(|| {
                SdkError::Input("input type is mandatory for async promotion".to_string())
            })?,
        };

        let mut form = MultipartForm::new()
            .text("name", &self.name)
            .text("operation", self.operation.as_str())
            .text("input_type", input_type.as_str());

        if training_type != TrainingType::AutoMl {
            let (Some(reference), Some(source), Some(_)) =
                (&self.reference, &self.source_file, &self.schema)
            else {
                return Err(SdkError::Input(format!(
                    "model reference, source file and schema are mandatory on {training_type} promotion"
                )));
            };
            form = form
                .text("model_reference", reference)
                .file_as("source", "app.py", source);
            if let Some(env) = &self.env_file {
                form = form.file_as("env", ".env", env);
            }
            if let Some(requirements) = &self.requirements_file {
                form = form.file_as("requirements", "requirements.txt", requirements);
            }
            for extra in &self.extra_files {
                form = form.file("extra", extra);
            }
        }
        if let Some(schema) = &self.schema {
            form = form.json_source("schema", "schema.json", schema)?;
        }
        Ok(form)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Promoted {
    model_hash: String,
    #[serde(default)]
    message: Option<String>,
}

impl TrainingExecution {
    /// Deploy the model produced by this run.
    ///
    /// The run must have succeeded; a pending one is refreshed once first.
    /// The returned controller is hosted but not ready yet.
    pub async fn promote(&mut self, request: &PromoteRequest) -> Result<ModelController, SdkError> {
        if self.details().and_then(|d| d.training_type).is_none() {
            self.describe().await?;
        }
        let training_type = self
            .details()
            .and_then(|d| d.training_type)
            .ok_or_else(|| {
                SdkError::resource(ResourceKind::Training, "training type of the run is unknown")
            })?;
        let form = request.prepare(training_type)?;

        if self.status().is_pending() {
            self.get_status().await?;
        }
        if self.status() != ResourceStatus::Succeeded {
            error!(execution = %self, "Only succeeded runs can be promoted");
            return Err(SdkError::resource(
                ResourceKind::Training,
                format!(
                    "training execution must be Succeeded to be promoted, current status is {}",
                    self.status()
                ),
            ));
        }

        let path = format!(
            "training/promote/{}/{}/{}",
            self.group(),
            self.resource_id(),
            self.execution_id()
        );
        let response = self
            .session()
            .send_authed(ApiRequest::post(path).multipart(form))
            .await?;
        if response.status != 201 {
            return Err(reject_input(&response, ResourceKind::Model, "Upload error"));
        }
        let promoted: Promoted = response.json()?;
        info!(
            execution = %self,
            model = %promoted.model_hash,
            message = promoted.message.as_deref().unwrap_or_default(),
            "Run promoted"
        );

        ModelController::host_uploaded(
            self.session().clone(),
            ResourceId::new(promoted.model_hash),
            self.group().clone(),
            request.operation,
            request.name.clone(),
        )
        .await
    }
}
