//! Training experiment types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{ExecutionId, GroupName, ResourceId};

/// Learning task an experiment is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    Classification,
    Regression,
    Unsupervised,
}

impl ModelType {
    /// Wire name of the model type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "Classification",
            Self::Regression => "Regression",
            Self::Unsupervised => "Unsupervised",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Classification" => Ok(Self::Classification),
            "Regression" => Ok(Self::Regression),
            "Unsupervised" => Ok(Self::Unsupervised),
            other => Err(CoreError::InvalidInput(format!(
                "invalid model type '{other}'. Should be one of: Classification, Regression or Unsupervised"
            ))),
        }
    }
}

/// How a training run produces its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrainingType {
    /// User-supplied training script executed by the server.
    Custom,
    /// Server-side AutoML driven by a configuration file.
    #[serde(rename = "AutoML")]
    AutoMl,
    /// Model trained elsewhere; only its artifacts are registered.
    External,
}

impl TrainingType {
    /// Wire name of the training type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => "Custom",
            Self::AutoMl => "AutoML",
            Self::External => "External",
        }
    }
}

impl fmt::Display for TrainingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrainingType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Custom" => Ok(Self::Custom),
            "AutoML" => Ok(Self::AutoMl),
            "External" => Ok(Self::External),
            other => Err(CoreError::InvalidInput(format!(
                "invalid training type '{other}'. Should be one of: Custom, AutoML or External"
            ))),
        }
    }
}

/// A training experiment and the executions recorded under it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExperiment {
    /// Experiment hash.
    pub id: ResourceId,

    /// Group the experiment belongs to.
    pub group: GroupName,

    /// Experiment name.
    pub name: String,

    /// Learning task of the experiment.
    pub model_type: ModelType,

    /// Execution ids in the order the server listed them.
    pub executions: Vec<ExecutionId>,
}

impl TrainingExperiment {
    /// Create a new experiment record with no executions.
    pub fn new(
        id: ResourceId,
        group: GroupName,
        name: impl Into<String>,
        model_type: ModelType,
    ) -> Self {
        Self {
            id,
            group,
            name: name.into(),
            model_type,
            executions: Vec::new(),
        }
    }

    /// Replace the recorded executions with a fresh server listing.
    pub fn set_executions(&mut self, ids: impl IntoIterator<Item = ExecutionId>) {
        self.executions = ids.into_iter().collect();
    }

    /// Get the most recent execution, if any.
    ///
    /// Most recent means the highest id, not the last one recorded.
    pub fn latest_execution(&self) -> Option<ExecutionId> {
        self.executions.iter().copied().max()
    }
}
