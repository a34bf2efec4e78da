//! Model monitoring: register a configuration, host it and wait for the
//! server to validate it.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use modelops_core::{GroupName, Lifecycle, ResourceId, ResourceKind, ResourceStatus, SourceKind};
use serde::Deserialize;
use tracing::{error, info};

use crate::error::{reject_input, SdkError};
use crate::http::{ApiRequest, JsonSource, MultipartForm};
use crate::lifecycle::ModelController;
use crate::poller::{StatusPoller, StatusReport, StatusSource};
use crate::session::Session;
use crate::wire::StatusBody;

/// Monitoring configuration for a deployed model.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringRequest {
    /// Entrypoint of the preprocessing applied before monitoring.
    pub preprocess_reference: String,
    /// Entrypoint computing SHAP values.
    pub shap_reference: String,
    pub configuration: JsonSource,
    /// Preprocessing source. Without one the model's own script is used.
    pub preprocess_file: Option<PathBuf>,
    pub requirements_file: Option<PathBuf>,
}

impl MonitoringRequest {
    pub fn new(
        preprocess_reference: impl Into<String>,
        shap_reference: impl Into<String>,
        configuration: impl Into<JsonSource>,
    ) -> Self {
        Self {
            preprocess_reference: preprocess_reference.into(),
            shap_reference: shap_reference.into(),
            configuration: configuration.into(),
            preprocess_file: None,
            requirements_file: None,
        }
    }

    pub fn preprocess_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.preprocess_file = Some(path.into());
        self
    }

    pub fn requirements_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.requirements_file = Some(path.into());
        self
    }

    fn prepare(&self) -> Result<MultipartForm, SdkError> {
        let mut form = MultipartForm::new()
            .text("preprocess_reference", &self.preprocess_reference)
            .text("shap_reference", &self.shap_reference)
            .json_source("configuration", "configuration.json", &self.configuration)?;

        let script_type = match &self.preprocess_file {
            Some(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let (script_type, upload_name) = match SourceKind::from_file_name(&name)? {
                    SourceKind::Script => ("PythonScript", "preprocess.py"),
                    SourceKind::Notebook => ("PythonNotebook", "preprocess.ipynb"),
                };
                form = form.file_as("source", upload_name, path);
                script_type
            }
            None => "ModelScript",
        };
        form = form.text("type", script_type);

        if let Some(requirements) = &self.requirements_file {
            form = form.file_as("requirements", "requirements.txt", requirements);
        }
        Ok(form)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Registered {
    model_hash: String,
    #[serde(default)]
    message: Option<String>,
}

/// Validation state of a hosted monitoring configuration.
#[derive(Debug)]
pub struct MonitoringHost {
    session: Session,
    group: GroupName,
    id: ResourceId,
    status: ResourceStatus,
    last_message: Option<String>,
}

impl MonitoringHost {
    pub fn new(session: Session, group: GroupName, id: ResourceId) -> Self {
        Self {
            session,
            group,
            id,
            status: Lifecycle::MonitoringHost.initial(),
            last_message: None,
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    fn path(&self, action: &str) -> String {
        format!("monitoring/{action}/{}/{}", self.group, self.id)
    }

    /// Ask the server to start validating the configuration.
    pub async fn host(&self) -> Result<(), SdkError> {
        let response = self
            .session
            .send_authed(ApiRequest::get(self.path("host")))
            .await?;
        match response.status {
            200 | 202 => {
                info!(monitoring = %self.id, "Model monitoring host started");
                Ok(())
            }
            _ => Err(reject_input(
                &response,
                ResourceKind::Monitoring,
                "Monitoring host error",
            )),
        }
    }

    pub async fn refresh_status(&mut self) -> Result<StatusReport, SdkError> {
        let response = self
            .session
            .send_authed(ApiRequest::get(self.path("status")))
            .await?
            .require_status(
                &[200],
                ResourceKind::Monitoring,
                "Could not get host monitoring status",
            )?;

        let report = response
            .json::<StatusBody>()?
            .into_report(Lifecycle::MonitoringHost)?;
        self.status = Lifecycle::MonitoringHost.transition(self.status, report.status)?;
        self.last_message = report.message.clone();
        Ok(report)
    }

    /// Wait while validating. An invalidated configuration is an error.
    pub async fn wait_validated(&mut self, poller: &StatusPoller) -> Result<(), SdkError> {
        poller.wait(self).await?;
        match self.status {
            ResourceStatus::Validated => {
                info!(monitoring = %self.id, "Model monitoring host validated");
                Ok(())
            }
            _ => {
                let message = self
                    .last_message
                    .clone()
                    .unwrap_or_else(|| "monitoring host failed".to_string());
                error!(monitoring = %self.id, message = %message, "Model monitoring host failed");
                Err(SdkError::ExecutionFailed {
                    target: self.target(),
                    message,
                })
            }
        }
    }
}

#[async_trait]
impl StatusSource for MonitoringHost {
    fn target(&self) -> String {
        format!("monitoring/{}/{}", self.group, self.id)
    }

    async fn fetch_status(&mut self) -> Result<StatusReport, SdkError> {
        self.refresh_status().await
    }
}

impl fmt::Display for MonitoringHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "monitoring {} (status: {})", self.id, self.status)
    }
}

impl ModelController {
    /// Register monitoring for this model, host it and wait until the server
    /// validates it.
    pub async fn register_monitoring(
        &self,
        request: &MonitoringRequest,
    ) -> Result<MonitoringHost, SdkError> {
        let form = request.prepare()?;
        let session = self.session();

        let register = ApiRequest::post(format!(
            "monitoring/register/{}/{}",
            self.group(),
            self.id()
        ))
        .multipart(form);
        let response = session.send_authed(register).await?;
        if response.status != 201 {
            return Err(reject_input(
                &response,
                ResourceKind::Monitoring,
                "Invalid parameters for monitoring registration",
            ));
        }
        let registered: Registered = response.json()?;
        info!(
            model = %self.id(),
            monitoring = %registered.model_hash,
            message = registered.message.as_deref().unwrap_or_default(),
            "Monitoring registered"
        );

        let mut host = MonitoringHost::new(
            session.clone(),
            self.group().clone(),
            ResourceId::new(registered.model_hash),
        );
        host.host().await?;
        host.wait_validated(&session.config().poller()).await?;
        Ok(host)
    }
}
