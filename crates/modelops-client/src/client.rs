//! Entry point of the SDK.

use std::sync::Arc;

use modelops_core::{GroupName, LogQuery, ModelType, ResourceId, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::config::ClientConfig;
use crate::error::SdkError;
use crate::groups::GroupInfo;
use crate::http::{ApiRequest, HttpTransport, Transport};
use crate::lifecycle::{DeploymentRequest, ModelController, PreprocessingController};
use crate::logs::LogEntry;
use crate::session::Session;
use crate::training::TrainingExperimentHandle;
use crate::wire::ResultsBody;

/// Filters of a search call. Text filters match like SQL `LIKE`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub name: Option<String>,
    pub state: Option<String>,
    pub group: Option<String>,
    /// Only deployments that can take requests. Overrides `state`.
    pub only_deployed: bool,
}

impl SearchFilter {
    fn to_query(&self) -> Vec<(String, String)> {
        let state = if self.only_deployed {
            Some("Deployed")
        } else {
            self.state.as_deref()
        };
        [
            ("name", self.name.as_deref()),
            ("state", state),
            ("group", self.group.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v.to_string())))
        .collect()
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceSummary {
    #[serde(alias = "ModelHash", alias = "Hash")]
    pub id: ResourceId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Client for one ModelOps server.
#[derive(Debug, Clone)]
pub struct ModelOpsClient {
    session: Session,
}

impl ModelOpsClient {
    /// Client over HTTP, without contacting the server.
    pub fn new(config: ClientConfig) -> Self {
        let transport = Arc::new(HttpTransport::new(&config.base_url));
        Self::with_transport(transport, config)
    }

    /// Client over any transport.
    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            session: Session::new(transport, config),
        }
    }

    /// Client over HTTP, after checking the server answers and accepts the
    /// token.
    pub async fn connect(config: ClientConfig) -> Result<Self, SdkError> {
        let client = Self::new(config);
        let version = client.server_health().await?;
        info!(
            url = %client.config().base_url,
            version = %version,
            "Successfully connected to ModelOps"
        );
        Ok(client)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        self.session.config()
    }

    /// Server version, if the server is up and the token is accepted.
    pub async fn server_health(&self) -> Result<String, SdkError> {
        self.session.server_health().await
    }

    pub async fn list_groups(&self) -> Result<Vec<GroupInfo>, SdkError> {
        self.session.list_groups().await
    }

    pub async fn create_group(&self, name: &str, description: &str) -> Result<bool, SdkError> {
        self.session.create_group(name, description).await
    }

    pub async fn refresh_group_token(&self, name: &str, force: bool) -> Result<String, SdkError> {
        self.session.refresh_group_token(name, force).await
    }

    pub async fn create_model(
        &self,
        request: DeploymentRequest,
        wait_for_ready: bool,
    ) -> Result<ModelController, SdkError> {
        ModelController::create(self.session.clone(), request, wait_for_ready).await
    }

    pub async fn get_model(
        &self,
        id: &str,
        group: Option<&str>,
        wait_for_ready: bool,
    ) -> Result<ModelController, SdkError> {
        ModelController::attach(
            self.session.clone(),
            ResourceId::new(id),
            group_or_default(group),
            wait_for_ready,
        )
        .await
    }

    pub async fn create_preprocessing(
        &self,
        request: DeploymentRequest,
        wait_for_ready: bool,
    ) -> Result<PreprocessingController, SdkError> {
        PreprocessingController::create(self.session.clone(), request, wait_for_ready).await
    }

    pub async fn get_preprocessing(
        &self,
        id: &str,
        group: Option<&str>,
        wait_for_ready: bool,
    ) -> Result<PreprocessingController, SdkError> {
        PreprocessingController::attach(
            self.session.clone(),
            ResourceId::new(id),
            group_or_default(group),
            wait_for_ready,
        )
        .await
    }

    /// Search models or preprocessing steps.
    pub async fn search(
        &self,
        kind: ResourceKind,
        filter: &SearchFilter,
    ) -> Result<Vec<ResourceSummary>, SdkError> {
        if !matches!(kind, ResourceKind::Model | ResourceKind::Preprocessing) {
            return Err(SdkError::Input(format!("{kind} resources can't be searched")));
        }
        let request = ApiRequest::get(format!("{}/search", kind.path_segment()))
            .query_pairs(filter.to_query());
        let response = self
            .session
            .send_authed(request)
            .await?
            .require_status(&[200], kind, "Could not search")?;
        Ok(response.json::<ResultsBody<ResourceSummary>>()?.results)
    }

    /// Logs of a deployment, without loading it first.
    pub async fn logs(
        &self,
        kind: ResourceKind,
        id: &str,
        group: Option<&str>,
        query: &LogQuery,
    ) -> Result<Vec<LogEntry>, SdkError> {
        let path = format!(
            "{}/logs/{}/{}",
            kind.path_segment(),
            group_or_default(group),
            id
        );
        self.session.get_logs(kind, &path, query).await
    }

    /// Register a training experiment. The model type is checked locally.
    pub async fn create_training_experiment(
        &self,
        name: &str,
        model_type: &str,
        group: Option<&str>,
    ) -> Result<TrainingExperimentHandle, SdkError> {
        let model_type: ModelType = model_type.parse()?;
        TrainingExperimentHandle::create(self.session.clone(), name, model_type, group).await
    }

    pub async fn get_training(
        &self,
        id: &str,
        group: Option<&str>,
    ) -> Result<TrainingExperimentHandle, SdkError> {
        TrainingExperimentHandle::get(
            self.session.clone(),
            ResourceId::new(id),
            group_or_default(group),
        )
        .await
    }
}

fn group_or_default(group: Option<&str>) -> GroupName {
    group.map(GroupName::new).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::http::Method;
    use crate::testing::{test_config, MockTransport};

    use super::*;

    fn client(mock: &Arc<MockTransport>) -> ModelOpsClient {
        ModelOpsClient::with_transport(mock.clone(), test_config())
    }

    #[tokio::test]
    async fn test_search_only_deployed_overrides_state() {
        let mock = MockTransport::new();
        mock.on_json(
            Method::Get,
            "preprocessing/search",
            200,
            json!({"Results": [
                {"Hash": "p1", "Name": "clean", "Group": "default", "Status": "Deployed"}
            ]}),
        );
        let filter = SearchFilter {
            state: Some("Failed".to_string()),
            group: Some("default".to_string()),
            only_deployed: true,
            ..Default::default()
        };

        let hits = client(&mock)
            .search(ResourceKind::Preprocessing, &filter)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, ResourceId::new("p1"));
        assert_eq!(hits[0].name.as_deref(), Some("clean"));
        let request = mock.last(Method::Get, "preprocessing/search").unwrap();
        assert_eq!(
            request.query,
            vec![
                ("state".to_string(), "Deployed".to_string()),
                ("group".to_string(), "default".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_search_models_by_model_hash() {
        let mock = MockTransport::new();
        mock.on_json(
            Method::Get,
            "model/search",
            200,
            json!({"Results": [{"ModelHash": "m1", "Group": "fraud", "Schema": "{}"}]}),
        );

        let hits = client(&mock)
            .search(ResourceKind::Model, &SearchFilter::default())
            .await
            .unwrap();

        assert_eq!(hits[0].id.as_str(), "m1");
        assert_eq!(hits[0].extra.get("Schema"), Some(&json!("{}")));
        assert!(mock.last(Method::Get, "model/search").unwrap().query.is_empty());
    }

    #[tokio::test]
    async fn test_training_search_rejected_locally() {
        let mock = MockTransport::new();

        let err = client(&mock)
            .search(ResourceKind::Training, &SearchFilter::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SdkError::Input(_)));
        assert_eq!(mock.total(), 0);
    }

    #[tokio::test]
    async fn test_bad_model_type_makes_no_calls() {
        let mock = MockTransport::new();

        let err = client(&mock)
            .create_training_experiment("churn", "Clustering", None)
            .await
            .unwrap_err();

        assert!(matches!(err, SdkError::Input(_)));
        assert_eq!(mock.total(), 0);
    }

    #[tokio::test]
    async fn test_server_health_version() {
        let mock = MockTransport::new();
        mock.on_json(Method::Get, "health", 200, json!({"Version": "1.4.2"}));

        assert_eq!(client(&mock).server_health().await.unwrap(), "1.4.2");

        let mock = MockTransport::new();
        mock.on(Method::Get, "health", 401, "bad token");
        assert!(matches!(
            client(&mock).server_health().await,
            Err(SdkError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_get_model_normalizes_group() {
        let mock = MockTransport::new();
        mock.on_json(
            Method::Get,
            "model/status/credit_risk/m1",
            200,
            json!({"Status": "Deployed"}),
        )
        .on_json(
            Method::Get,
            "model/describe/credit_risk/m1",
            200,
            json!({"Description": {"Name": "score", "Status": "Deployed", "Operation": "Sync"}}),
        );

        let model = client(&mock)
            .get_model("m1", Some("Credit Risk"), false)
            .await
            .unwrap();

        assert_eq!(model.group().as_str(), "credit_risk");
        assert!(model.is_ready());
    }
}
