//! Shared connection state handed to every handle and controller.

use std::sync::Arc;

use modelops_core::ResourceKind;
use serde::Deserialize;

use crate::config::ClientConfig;
use crate::error::{classify, SdkError};
use crate::http::{ApiRequest, ApiResponse, Transport};

/// Transport plus resolved configuration.
///
/// Cheap to clone; handles and controllers each keep their own copy.
#[derive(Clone)]
pub struct Session {
    transport: Arc<dyn Transport>,
    config: Arc<ClientConfig>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            transport,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a request exactly as given.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SdkError> {
        self.transport.send(request).await
    }

    /// Send a management request authenticated with the user token.
    pub async fn send_authed(&self, request: ApiRequest) -> Result<ApiResponse, SdkError> {
        self.send(request.bearer(self.config.token.clone())).await
    }

    /// Send an invocation authenticated with a group token.
    pub async fn send_with_group_token(
        &self,
        request: ApiRequest,
        group_token: &str,
    ) -> Result<ApiResponse, SdkError> {
        self.send(request.bearer(group_token)).await
    }

    /// Check the server is up and the user token is accepted.
    ///
    /// Returns the server version.
    pub async fn server_health(&self) -> Result<String, SdkError> {
        let response = self.send_authed(ApiRequest::get("health")).await?;
        match response.status {
            200 => Ok(response.json::<HealthBody>()?.version),
            401 => Err(SdkError::Authentication("invalid credentials".to_string())),
            status if status >= 500 => Err(SdkError::Server {
                status,
                body: response.text(),
            }),
            _ => Err(classify(&response, ResourceKind::Model, "Unexpected health response")),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthBody {
    version: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}
