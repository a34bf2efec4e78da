//! Error types for the client SDK.
//!
//! Every server response is classified by [`classify`], so the mapping from
//! HTTP status code to error kind lives in exactly one place.

use std::time::Duration;

use modelops_core::{CoreError, ResourceKind};
use thiserror::Error;
use tracing::error;

use crate::http::ApiResponse;

/// Errors that can occur when using the client SDK.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Credentials rejected (HTTP 401) or missing.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Server-side fault (HTTP 5xx).
    #[error("server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    /// Local precondition violated or request rejected as bad input.
    #[error("invalid input: {0}")]
    Input(String),

    /// Resource or execution does not exist (HTTP 404).
    #[error("{kind} not found: {message}")]
    NotFound { kind: ResourceKind, message: String },

    /// Status or result fetch returned neither success nor the expired code.
    #[error("{target} unavailable (HTTP {status}): {body}")]
    ExecutionUnavailable {
        target: String,
        status: u16,
        body: String,
    },

    /// Terminal failure state reached.
    #[error("{target} failed: {message}")]
    ExecutionFailed { target: String, message: String },

    /// Referenced group does not exist.
    #[error("group '{0}' does not exist. Create the group first")]
    Group(String),

    /// Resource-specific failure (model, preprocessing, training, monitoring).
    #[error("{kind} error: {message}")]
    Resource {
        kind: ResourceKind,
        message: String,
        body: Option<String>,
    },

    /// Waiting exceeded the configured maximum.
    #[error("gave up waiting on {target} after {waited:?}")]
    WaitTimeout { target: String, waited: Duration },

    /// Waiting was cancelled by the caller.
    #[error("wait on {target} was cancelled")]
    WaitCancelled { target: String },

    /// Connection-level HTTP failure.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Local file error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Status machine violation.
    #[error(transparent)]
    Core(CoreError),
}

impl From<CoreError> for SdkError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInput(message) => SdkError::Input(message),
            other => SdkError::Core(other),
        }
    }
}

impl SdkError {
    /// Shorthand for a resource-specific error without a server body.
    pub fn resource(kind: ResourceKind, message: impl Into<String>) -> Self {
        SdkError::Resource {
            kind,
            message: message.into(),
            body: None,
        }
    }

    /// Raw server text carried by the error, if any.
    pub fn server_body(&self) -> Option<&str> {
        match self {
            SdkError::Server { body, .. } | SdkError::ExecutionUnavailable { body, .. } => {
                Some(body)
            }
            SdkError::Resource { body, .. } => body.as_deref(),
            _ => None,
        }
    }
}

/// Maps an unexpected response to an error kind.
///
/// `401` is an authentication failure, `>= 500` a server fault, `404` the
/// resource-specific not-found, `400` rejected input. Anything else becomes a
/// resource error with the raw body attached.
pub fn classify(response: &ApiResponse, kind: ResourceKind, context: &str) -> SdkError {
    let body = response.text();
    error!(
        status = response.status,
        kind = %kind,
        body = %body,
        "{}", context
    );

    match response.status {
        401 => SdkError::Authentication(format!("{context}: {body}")),
        status if status >= 500 => SdkError::Server { status, body },
        404 => SdkError::NotFound {
            kind,
            message: format!("{context}: {body}"),
        },
        400 => SdkError::Input(format!("{context}: {body}")),
        _ => SdkError::Resource {
            kind,
            message: context.to_string(),
            body: Some(body),
        },
    }
}

/// Maps a rejected upload or host call.
///
/// Authentication and server faults keep their kind; anything else means the
/// server did not accept what was sent.
pub fn reject_input(response: &ApiResponse, kind: ResourceKind, context: &str) -> SdkError {
    if response.status == 401 || response.status >= 500 {
        return classify(response, kind, context);
    }
    let body = response.text();
    error!(status = response.status, kind = %kind, body = %body, "{}", context);
    SdkError::Input(format!("{context}: {body}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> ApiResponse {
        ApiResponse::new(status, body.as_bytes().to_vec())
    }

    #[test]
    fn test_classify_mapping() {
        let kind = ResourceKind::Model;

        assert!(matches!(
            classify(&response(401, "nope"), kind, "ctx"),
            SdkError::Authentication(_)
        ));
        assert!(matches!(
            classify(&response(503, "down"), kind, "ctx"),
            SdkError::Server { status: 503, .. }
        ));
        assert!(matches!(
            classify(&response(404, "missing"), kind, "ctx"),
            SdkError::NotFound {
                kind: ResourceKind::Model,
                ..
            }
        ));
        assert!(matches!(
            classify(&response(400, "bad"), kind, "ctx"),
            SdkError::Input(_)
        ));

        let err = classify(&response(409, "conflict details"), kind, "Could not restart");
        match &err {
            SdkError::Resource { kind, message, .. } => {
                assert_eq!(*kind, ResourceKind::Model);
                assert_eq!(message, "Could not restart");
            }
            other => panic!("Expected Resource, got {other:?}"),
        }
        assert_eq!(err.server_body(), Some("conflict details"));
    }

    #[test]
    fn test_reject_input_keeps_auth_and_server() {
        let kind = ResourceKind::Preprocessing;
        assert!(matches!(
            reject_input(&response(422, "no reference"), kind, "Upload error"),
            SdkError::Input(m) if m == "Upload error: no reference"
        ));
        assert!(matches!(
            reject_input(&response(404, "missing"), kind, "Host error"),
            SdkError::Input(_)
        ));
        assert!(matches!(
            reject_input(&response(401, "expired"), kind, "Host error"),
            SdkError::Authentication(_)
        ));
        assert!(matches!(
            reject_input(&response(500, "boom"), kind, "Host error"),
            SdkError::Server { status: 500, .. }
        ));
    }

    #[test]
    fn test_core_input_becomes_input_error() {
        let err: SdkError = CoreError::InvalidInput("bad version".to_string()).into();
        assert!(matches!(err, SdkError::Input(m) if m == "bad version"));

        let err: SdkError = CoreError::UnknownStatus("Weird".to_string()).into();
        assert!(matches!(err, SdkError::Core(_)));
    }
}
