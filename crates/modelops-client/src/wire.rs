//! JSON bodies exchanged with the server.

use modelops_core::{ExecutionId, Lifecycle, ResourceStatus};
use serde::Deserialize;

use crate::error::SdkError;
use crate::poller::StatusReport;

/// `{"Status": ..., "Message": ...}` from any status endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct StatusBody {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusBody {
    /// Parse the status and check it belongs to `lifecycle`.
    pub fn into_report(self, lifecycle: Lifecycle) -> Result<StatusReport, SdkError> {
        let status: ResourceStatus = self.status.parse()?;
        lifecycle.check(status)?;
        Ok(StatusReport::new(status).with_message(self.message))
    }
}

/// `{"Description": {...}}` from any describe endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescriptionBody<T> {
    pub description: T,
}

/// `{"Message": ...}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct MessageBody {
    pub message: String,
}

/// 202 body of an async run request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ExecutionStarted {
    pub execution_id: ExecutionId,
    #[serde(default)]
    pub message: Option<String>,
}

/// `{"Results": [...]}` from list and search endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ResultsBody<T> {
    pub results: Vec<T>,
}

/// Parse an optional status string reported inside a description.
pub(crate) fn parse_status(
    raw: Option<&str>,
    lifecycle: Lifecycle,
) -> Result<Option<ResourceStatus>, SdkError> {
    raw.map(|s| -> Result<ResourceStatus, SdkError> {
        let status: ResourceStatus = s.parse()?;
        Ok(lifecycle.check(status)?)
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use modelops_core::CoreError;

    use super::*;

    #[test]
    fn test_status_body_rejects_unknown_and_foreign() {
        let body: StatusBody = serde_json::from_str(r#"{"Status": "Exploded"}"#).unwrap();
        let err = body.into_report(Lifecycle::Execution).unwrap_err();
        assert!(matches!(err, SdkError::Core(CoreError::UnknownStatus(s)) if s == "Exploded"));

        let body: StatusBody = serde_json::from_str(r#"{"Status": "Deployed"}"#).unwrap();
        let err = body.into_report(Lifecycle::Execution).unwrap_err();
        assert!(matches!(err, SdkError::Core(CoreError::StatusNotAllowed { .. })));
    }

    #[test]
    fn test_status_body_keeps_message() {
        let body: StatusBody =
            serde_json::from_str(r#"{"Status": "Failed", "Message": "bad input"}"#).unwrap();
        let report = body.into_report(Lifecycle::Execution).unwrap();
        assert_eq!(report.status, ResourceStatus::Failed);
        assert_eq!(report.message.as_deref(), Some("bad input"));
    }

    #[test]
    fn test_execution_started_accepts_string_id() {
        let started: ExecutionStarted =
            serde_json::from_str(r#"{"ExecutionId": "12", "Message": "queued"}"#).unwrap();
        assert_eq!(started.execution_id, ExecutionId::new(12));
    }
}
