//! Resource kinds and the deployment options sent with uploads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::status::Lifecycle;

/// Kind of server-managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// A deployed model.
    Model,
    /// A deployed preprocessing step.
    Preprocessing,
    /// A training experiment.
    Training,
    /// A model monitoring host.
    Monitoring,
}

impl ResourceKind {
    /// Leading path segment of this kind's REST endpoints.
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Preprocessing => "preprocessing",
            Self::Training => "training",
            Self::Monitoring => "monitoring",
        }
    }

    /// Lifecycle followed by the resource itself (not its executions).
    pub fn lifecycle(&self) -> Lifecycle {
        match self {
            Self::Model | Self::Preprocessing => Lifecycle::Deployment,
            Self::Training => Lifecycle::Execution,
            Self::Monitoring => Lifecycle::MonitoringHost,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

impl FromStr for ResourceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "model" => Ok(Self::Model),
            "preprocessing" => Ok(Self::Preprocessing),
            "training" => Ok(Self::Training),
            "monitoring" => Ok(Self::Monitoring),
            other => Err(CoreError::InvalidInput(format!(
                "unknown resource kind '{other}'"
            ))),
        }
    }
}

/// Whether a deployment answers inline or through executions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// One request/response cycle per call.
    #[default]
    Sync,
    /// Calls return an execution id that is polled later.
    Async,
}

impl Operation {
    /// Wire name used in form fields (`"Sync"`, `"Async"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "Sync",
            Self::Async => "Async",
        }
    }

    /// Path segment used in endpoint URLs (`"sync"`, `"async"`).
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            other => Err(CoreError::InvalidInput(format!(
                "unknown operation '{other}', expected Sync or Async"
            ))),
        }
    }
}

/// Payload format accepted by an async deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Json,
    Csv,
    Parquet,
}

impl InputType {
    /// Wire name used in form fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }
}

impl FromStr for InputType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "parquet" => Ok(Self::Parquet),
            other => Err(CoreError::InvalidInput(format!(
                "unknown input type '{other}', expected json, csv or parquet"
            ))),
        }
    }
}

/// Python runtime a deployment or training run is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PythonVersion {
    V3_7,
    V3_8,
    V3_9,
    V3_10,
}

impl PythonVersion {
    /// Versions accepted for model deployments.
    pub const MODEL: &'static [PythonVersion] = &[Self::V3_8, Self::V3_9, Self::V3_10];

    /// Versions accepted for preprocessing deployments and training runs.
    pub const PREPROCESSING: &'static [PythonVersion] =
        &[Self::V3_7, Self::V3_8, Self::V3_9, Self::V3_10];

    /// Dotted form, e.g. `"3.10"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V3_7 => "3.7",
            Self::V3_8 => "3.8",
            Self::V3_9 => "3.9",
            Self::V3_10 => "3.10",
        }
    }

    /// Form field value, e.g. `"Python310"`.
    pub fn wire_name(&self) -> String {
        format!("Python{}", self.as_str().replace('.', ""))
    }

    /// Parses a dotted version and checks it against an allowed set.
    pub fn parse_allowed(s: &str, allowed: &[PythonVersion]) -> Result<Self, CoreError> {
        let listed = || {
            allowed
                .iter()
                .map(PythonVersion::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let version: PythonVersion = s.parse().map_err(|_| {
            CoreError::InvalidInput(format!(
                "invalid python version '{s}'. Available versions are {}",
                listed()
            ))
        })?;
        if allowed.contains(&version) {
            Ok(version)
        } else {
            Err(CoreError::InvalidInput(format!(
                "invalid python version '{s}'. Available versions are {}",
                listed()
            )))
        }
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PythonVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "3.7" => Ok(Self::V3_7),
            "3.8" => Ok(Self::V3_8),
            "3.9" => Ok(Self::V3_9),
            "3.10" => Ok(Self::V3_10),
            other => Err(CoreError::InvalidInput(format!(
                "unknown python version '{other}'"
            ))),
        }
    }
}

/// Kind of source file uploaded as the entrypoint of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Script,
    Notebook,
}

impl SourceKind {
    /// Classifies a source file by extension (`py` or `ipynb`).
    pub fn from_file_name(name: &str) -> Result<Self, CoreError> {
        match name.rsplit_once('.').map(|(_, ext)| ext) {
            Some("py") => Ok(Self::Script),
            Some("ipynb") => Ok(Self::Notebook),
            _ => Err(CoreError::InvalidInput(format!(
                "source file '{name}' must be a .py script or an .ipynb notebook"
            ))),
        }
    }

    /// File name the server expects for the `source` multipart field.
    pub fn upload_name(&self) -> &'static str {
        match self {
            Self::Script => "script.py",
            Self::Notebook => "notebook.ipynb",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_version_allowed_sets() {
        assert_eq!(
            PythonVersion::parse_allowed("3.10", PythonVersion::MODEL),
            Ok(PythonVersion::V3_10)
        );
        assert!(PythonVersion::parse_allowed("3.7", PythonVersion::MODEL).is_err());
        assert!(PythonVersion::parse_allowed("3.7", PythonVersion::PREPROCESSING).is_ok());
        assert!(PythonVersion::parse_allowed("3.11", PythonVersion::PREPROCESSING).is_err());
        assert_eq!(PythonVersion::V3_10.wire_name(), "Python310");
    }

    #[test]
    fn test_source_kind_from_extension() {
        assert_eq!(SourceKind::from_file_name("app.py"), Ok(SourceKind::Script));
        assert_eq!(
            SourceKind::from_file_name("train.ipynb"),
            Ok(SourceKind::Notebook)
        );
        assert!(SourceKind::from_file_name("model.pkl").is_err());
        assert!(SourceKind::from_file_name("Makefile").is_err());
    }

    #[test]
    fn test_operation_segments() {
        assert_eq!("ASYNC".parse(), Ok(Operation::Async));
        assert_eq!(Operation::Async.path_segment(), "async");
        assert_eq!(Operation::Sync.as_str(), "Sync");
    }

    #[test]
    fn test_kind_lifecycle() {
        assert_eq!(ResourceKind::Model.lifecycle(), Lifecycle::Deployment);
        assert_eq!(ResourceKind::Monitoring.lifecycle(), Lifecycle::MonitoringHost);
        assert_eq!("Preprocessing".parse(), Ok(ResourceKind::Preprocessing));
    }
}
