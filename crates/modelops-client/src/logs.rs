//! Deployment and execution logs.

use chrono::NaiveDate;
use modelops_core::{LogQuery, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SdkError;
use crate::http::ApiRequest;
use crate::session::Session;
use crate::wire::ResultsBody;

/// One log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogEntry {
    #[serde(default)]
    pub registered_at: Option<String>,
    #[serde(default)]
    pub output_type: Option<String>,
    #[serde(default)]
    pub output_data: Option<String>,
    #[serde(default)]
    pub routine: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    /// Fetch logs from `path` with the date window filled relative to today.
    pub async fn get_logs(
        &self,
        kind: ResourceKind,
        path: &str,
        query: &LogQuery,
    ) -> Result<Vec<LogEntry>, SdkError> {
        let today = chrono::Local::now().date_naive();
        self.get_logs_at(kind, path, query, today).await
    }

    pub(crate) async fn get_logs_at(
        &self,
        kind: ResourceKind,
        path: &str,
        query: &LogQuery,
        today: NaiveDate,
    ) -> Result<Vec<LogEntry>, SdkError> {
        let request = ApiRequest::get(path).query_pairs(query.to_query(today));
        let response = self
            .send_authed(request)
            .await?
            .require_status(&[200], kind, "Could not fetch logs")?;
        Ok(response.json::<ResultsBody<LogEntry>>()?.results)
    }
}
