//! Groups: listing, creation, token refresh and existence checks.

use modelops_core::GroupName;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::SdkError;
use crate::http::{ApiRequest, ApiResponse};
use crate::session::Session;
use crate::wire::{MessageBody, ResultsBody};

/// A group as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Session {
    /// List every group visible to the user.
    pub async fn list_groups(&self) -> Result<Vec<GroupInfo>, SdkError> {
        let response = self.send_authed(ApiRequest::get("groups")).await?;
        if response.status != 200 {
            return Err(group_error(&response, None, "Could not list groups"));
        }
        Ok(response.json::<ResultsBody<GroupInfo>>()?.results)
    }

    /// Create a group. Returns `false` if it already exists.
    ///
    /// The server answers with the group token in its message; it is logged
    /// once and not stored.
    pub async fn create_group(&self, name: &str, description: &str) -> Result<bool, SdkError> {
        let request = ApiRequest::post("groups").form(vec![
            ("name".to_string(), name.to_string()),
            ("description".to_string(), description.to_string()),
        ]);
        let response = self.send_authed(request).await?;

        match response.status {
            201 => {
                let body: MessageBody = response.json()?;
                info!(group = %name, "{}", body.message);
                Ok(true)
            }
            400 => {
                error!(group = %name, "Group already exists, nothing was changed");
                Ok(false)
            }
            _ => Err(group_error(&response, Some(name), "Could not create group")),
        }
    }

    /// Refresh a group's token, optionally forcing expiry of a valid one.
    ///
    /// Returns the server message carrying the new token.
    pub async fn refresh_group_token(&self, name: &str, force: bool) -> Result<String, SdkError> {
        let request = ApiRequest::get(format!("refresh/{name}")).query("force", force.to_string());
        let response = self.send_authed(request).await?;
        match response.status {
            200 | 201 => Ok(response.json::<MessageBody>()?.message),
            _ => Err(group_error(&response, Some(name), "Could not refresh group token")),
        }
    }

    /// Returns true if the normalized group name is listed by the server.
    pub async fn group_exists(&self, group: &GroupName) -> Result<bool, SdkError> {
        Ok(self
            .list_groups()
            .await?
            .iter()
            .any(|g| g.name == group.as_str()))
    }

    /// Normalize an explicit group and check it exists, or fall back to the
    /// default group.
    pub async fn resolve_group(&self, group: Option<&str>) -> Result<GroupName, SdkError> {
        match group {
            Some(raw) => {
                let group = GroupName::new(raw);
                if self.group_exists(&group).await? {
                    Ok(group)
                } else {
                    Err(SdkError::Group(group.to_string()))
                }
            }
            None => {
                let group = GroupName::default();
                info!(group = %group, "Group not informed, using the default group");
                Ok(group)
            }
        }
    }
}

/// Maps a failed group call.
///
/// `404` on a named group means the group is missing. Authentication and
/// server faults keep their kind; anything else is rejected input.
fn group_error(response: &ApiResponse, name: Option<&str>, context: &str) -> SdkError {
    let body = response.text();
    error!(status = response.status, group = name.unwrap_or_default(), body = %body, "{}", context);

    match (response.status, name) {
        (401, _) => SdkError::Authentication(format!("{context}: {body}")),
        (status, _) if status >= 500 => SdkError::Server { status, body },
        (404, Some(name)) => SdkError::Group(name.to_string()),
        _ => SdkError::Input(format!("{context}: {body}")),
    }
}
