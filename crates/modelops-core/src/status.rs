//! Status model shared by deployments, executions and monitoring hosts.
//!
//! Every status string the server sends is parsed into [`ResourceStatus`], a
//! closed set known at compile time. Which statuses a resource may report,
//! and which moves between them are legal, is decided by its [`Lifecycle`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status of a server-managed resource or execution.
///
/// Wire names are the variant names (`"Deployed"`, `"Succeeded"`, ...).
/// Unknown strings are rejected during deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum ResourceStatus {
    /// Accepted by the server, nothing started yet.
    Requested,
    /// Deployment build in progress.
    Building,
    /// Build finished but the deployment is not serving yet.
    Ready,
    /// Deployment is serving requests.
    Deployed,
    /// Execution in progress.
    Running,
    /// Execution completed successfully.
    Succeeded,
    /// Build or execution failed.
    Failed,
    /// Deployment was disabled.
    Disabled,
    /// A disabled deployment is being recovered.
    DisabledRecovery,
    /// A failed deployment is being recovered.
    FailedRecovery,
    /// Monitoring host is being checked.
    Validating,
    /// Monitoring host check passed.
    Validated,
    /// Monitoring host check failed.
    Invalidated,
}

impl ResourceStatus {
    /// All statuses, in declaration order.
    pub const ALL: [ResourceStatus; 13] = [
        Self::Requested,
        Self::Building,
        Self::Ready,
        Self::Deployed,
        Self::Running,
        Self::Succeeded,
        Self::Failed,
        Self::Disabled,
        Self::DisabledRecovery,
        Self::FailedRecovery,
        Self::Validating,
        Self::Validated,
        Self::Invalidated,
    ];

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "Requested",
            Self::Building => "Building",
            Self::Ready => "Ready",
            Self::Deployed => "Deployed",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Disabled => "Disabled",
            Self::DisabledRecovery => "DisabledRecovery",
            Self::FailedRecovery => "FailedRecovery",
            Self::Validating => "Validating",
            Self::Validated => "Validated",
            Self::Invalidated => "Invalidated",
        }
    }

    /// Returns true if no further automatic transition will happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Deployed
                | Self::Failed
                | Self::Disabled
                | Self::Succeeded
                | Self::Validated
                | Self::Invalidated
        )
    }

    /// Returns true while the server is still working on the resource.
    ///
    /// This is the set the status poller keeps waiting on. `Ready` is
    /// neither pending nor terminal.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::Requested
                | Self::Building
                | Self::Running
                | Self::Validating
                | Self::DisabledRecovery
                | Self::FailedRecovery
        )
    }

    /// Returns true for the terminal success states.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Deployed | Self::Succeeded | Self::Validated)
    }

    /// Returns true for the terminal failure states.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Invalidated)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::UnknownStatus(s.to_owned()))
    }
}

impl TryFrom<String> for ResourceStatus {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ResourceStatus> for &'static str {
    fn from(status: ResourceStatus) -> Self {
        status.as_str()
    }
}

/// The status subset and transition table a resource kind follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Model and preprocessing deployments.
    Deployment,
    /// Async model runs, async preprocessing runs and training runs.
    Execution,
    /// Monitoring host validation.
    MonitoringHost,
}

impl Lifecycle {
    /// Statuses this lifecycle may report.
    pub fn statuses(&self) -> &'static [ResourceStatus] {
        use ResourceStatus::*;
        match self {
            Self::Deployment => &[
                Requested,
                Building,
                Ready,
                Deployed,
                Failed,
                Disabled,
                DisabledRecovery,
                FailedRecovery,
            ],
            Self::Execution => &[Requested, Running, Succeeded, Failed],
            Self::MonitoringHost => &[Validating, Validated, Invalidated],
        }
    }

    /// Status a freshly created resource of this lifecycle starts in.
    pub fn initial(&self) -> ResourceStatus {
        match self {
            Self::Deployment | Self::Execution => ResourceStatus::Requested,
            Self::MonitoringHost => ResourceStatus::Validating,
        }
    }

    /// Rejects statuses outside this lifecycle's set.
    pub fn check(&self, status: ResourceStatus) -> Result<ResourceStatus, CoreError> {
        if self.statuses().contains(&status) {
            Ok(status)
        } else {
            Err(CoreError::StatusNotAllowed {
                status,
                lifecycle: *self,
            })
        }
    }

    /// Returns true if `from -> to` appears in the transition table.
    ///
    /// Observing the same status twice is always allowed.
    pub fn allows(&self, from: ResourceStatus, to: ResourceStatus) -> bool {
        use ResourceStatus::*;

        if from == to {
            return self.statuses().contains(&from);
        }

        match self {
            Self::Deployment => matches!(
                (from, to),
                (Requested, Building)
                    | (Requested, Ready)
                    | (Requested, Deployed)
                    | (Requested, Failed)
                    | (Ready, Building)
                    | (Building, Deployed)
                    | (Building, Ready)
                    | (Ready, Deployed)
                    | (Building, Failed)
                    | (Ready, Failed)
                    | (Deployed, Disabled)
                    | (Deployed, Building)
                    | (Disabled, Building)
                    | (Disabled, Deployed)
                    | (Disabled, DisabledRecovery)
                    | (Failed, FailedRecovery)
                    | (DisabledRecovery, Building)
                    | (DisabledRecovery, Deployed)
                    | (DisabledRecovery, Failed)
                    | (FailedRecovery, Building)
                    | (FailedRecovery, Deployed)
                    | (FailedRecovery, Failed)
            ),
            Self::Execution => matches!(
                (from, to),
                (Requested, Running)
                    | (Requested, Succeeded)
                    | (Requested, Failed)
                    | (Running, Succeeded)
                    | (Running, Failed)
            ),
            Self::MonitoringHost => {
                matches!((from, to), (Validating, Validated) | (Validating, Invalidated))
            }
        }
    }

    /// Validates an observed status change and returns the new status.
    pub fn transition(
        &self,
        from: ResourceStatus,
        to: ResourceStatus,
    ) -> Result<ResourceStatus, CoreError> {
        self.check(to)?;
        if self.allows(from, to) {
            Ok(to)
        } else {
            Err(CoreError::InvalidStateTransition {
                lifecycle: *self,
                from,
                to,
            })
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployment => f.write_str("deployment"),
            Self::Execution => f.write_str("execution"),
            Self::MonitoringHost => f.write_str("monitoring host"),
        }
    }
}
