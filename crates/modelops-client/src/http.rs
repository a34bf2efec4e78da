//! HTTP exchange with the platform's REST API.
//!
//! Everything above this module talks to the server through the
//! [`Transport`] trait with plain [`ApiRequest`] / [`ApiResponse`] values.
//! [`HttpTransport`] is the reqwest-backed implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use modelops_core::ResourceKind;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{classify, SdkError};

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

/// Where the bytes of a multipart file come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartSource {
    /// Read from disk when the request is sent.
    Path(PathBuf),
    /// Already in memory.
    Bytes(Vec<u8>),
}

/// One file attached to a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub source: PartSource,
}

/// A JSON document given either as a file on disk or inline.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonSource {
    File(PathBuf),
    Inline(Value),
}

impl From<Value> for JsonSource {
    fn from(value: Value) -> Self {
        Self::Inline(value)
    }
}

impl From<PathBuf> for JsonSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

/// Multipart body: plain text fields plus file parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub parts: Vec<FilePart>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a text field.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Attach a file from disk, keeping its own file name.
    pub fn file(self, field: impl Into<String>, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        self.file_as(field, file_name, path)
    }

    /// Attach a file from disk under an explicit upload name.
    pub fn file_as(
        mut self,
        field: impl Into<String>,
        file_name: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Self {
        self.parts.push(FilePart {
            field: field.into(),
            file_name: file_name.into(),
            source: PartSource::Path(path.as_ref().to_path_buf()),
        });
        self
    }

    /// Attach in-memory bytes as a file.
    pub fn bytes(
        mut self,
        field: impl Into<String>,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.parts.push(FilePart {
            field: field.into(),
            file_name: file_name.into(),
            source: PartSource::Bytes(bytes),
        });
        self
    }

    /// Attach a JSON document. Files keep their own name, inline values are
    /// serialized under `inline_name`.
    pub fn json_source(
        self,
        field: impl Into<String>,
        inline_name: impl Into<String>,
        source: &JsonSource,
    ) -> Result<Self, SdkError> {
        Ok(match source {
            JsonSource::File(path) => self.file(field, path),
            JsonSource::Inline(value) => self.bytes(field, inline_name, serde_json::to_vec(value)?),
        })
    }

    /// Value of a text field, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// File part attached under `field`, if any.
    pub fn part(&self, field: &str) -> Option<&FilePart> {
        self.parts.iter().find(|p| p.field == field)
    }
}

/// Body of a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    Multipart(MultipartForm),
}

/// A request relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the base URL, without a leading slash.
    pub path: String,
    pub query: Vec<(String, String)>,
    /// Bearer token sent in the `Authorization` header.
    pub bearer: Option<String>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            bearer: None,
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn query_pairs(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn json(mut self, value: Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(fields);
        self
    }

    pub fn multipart(mut self, form: MultipartForm) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }
}

/// Status code and raw body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Body as (lossy) UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SdkError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Pass the response through if its status is one of `ok`, otherwise
    /// classify it into an error.
    pub fn require_status(
        self,
        ok: &[u16],
        kind: ResourceKind,
        context: &str,
    ) -> Result<Self, SdkError> {
        if ok.contains(&self.status) {
            Ok(self)
        } else {
            Err(classify(&self, kind, context))
        }
    }
}

/// Authenticated request/response exchange with the server.
///
/// Implementations only move bytes. Interpreting status codes is left to the
/// caller so the same error mapping applies to every transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return whatever the server answered.
    ///
    /// Only connection-level failures are errors here.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SdkError>;
}

/// [`Transport`] over reqwest.
pub struct HttpTransport {
    inner: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for an already normalized base URL.
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a transport reusing an existing reqwest client.
    pub fn with_client(inner: reqwest::Client, base_url: &str) -> Self {
        Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn build_multipart(form: MultipartForm) -> Result<reqwest::multipart::Form, SdkError> {
        let mut multipart = reqwest::multipart::Form::new();
        for (name, value) in form.fields {
            multipart = multipart.text(name, value);
        }
        for part in form.parts {
            let bytes = match part.source {
                PartSource::Path(path) => {
                    trace!(path = %path.display(), field = %part.field, "Reading upload");
                    tokio::fs::read(&path).await?
                }
                PartSource::Bytes(bytes) => bytes,
            };
            let file = reqwest::multipart::Part::bytes(bytes).file_name(part.file_name);
            multipart = multipart.part(part.field, file);
        }
        Ok(multipart)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SdkError> {
        let url = self.url(&request.path);
        debug!(method = request.method.as_str(), url = %url, "HTTP request");

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.inner.request(method, &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Form(fields) => builder.form(&fields),
            RequestBody::Multipart(form) => builder.multipart(Self::build_multipart(form).await?),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        debug!(status, bytes = body.len(), url = %url, "HTTP response");

        Ok(ApiResponse::new(status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builder() {
        let request = ApiRequest::post("model/sync/run/default/m1")
            .bearer("group-token")
            .query("force", "true")
            .json(json!({"Input": {"a": 1}}));

        assert_eq!(request.method, Method::Post);
        assert_eq!(request.bearer.as_deref(), Some("group-token"));
        assert_eq!(request.query, vec![("force".into(), "true".into())]);
        assert_eq!(request.body, RequestBody::Json(json!({"Input": {"a": 1}})));
    }

    #[test]
    fn test_multipart_file_name_from_path() {
        let form = MultipartForm::new()
            .text("name", "churn")
            .file("requirements", "/tmp/project/requirements.txt")
            .file_as("source", "script.py", "/tmp/project/app.py");

        assert_eq!(form.field("name"), Some("churn"));
        assert_eq!(
            form.part("requirements").map(|p| p.file_name.as_str()),
            Some("requirements.txt")
        );
        assert_eq!(
            form.part("source").map(|p| &p.source),
            Some(&PartSource::Path(PathBuf::from("/tmp/project/app.py")))
        );
        assert!(form.part("schema").is_none());
    }

    #[test]
    fn test_json_source_inline_is_serialized() {
        let form = MultipartForm::new()
            .json_source("conf_dict", "conf.json", &JsonSource::Inline(json!({"max_trials": 5})))
            .unwrap()
            .json_source("schema", "schema.json", &JsonSource::File("/tmp/sample.csv".into()))
            .unwrap();

        let conf = form.part("conf_dict").unwrap();
        assert_eq!(conf.file_name, "conf.json");
        assert_eq!(conf.source, PartSource::Bytes(br#"{"max_trials":5}"#.to_vec()));
        assert_eq!(form.part("schema").unwrap().file_name, "sample.csv");
    }

    #[test]
    fn test_require_status_passes_listed_codes() {
        let ok = ApiResponse::new(201, b"{}".to_vec());
        assert!(ok.require_status(&[201], ResourceKind::Model, "upload").is_ok());

        let err = ApiResponse::new(404, b"no such model".to_vec())
            .require_status(&[200], ResourceKind::Model, "describe")
            .unwrap_err();
        assert!(matches!(err, SdkError::NotFound { .. }));
    }

    #[test]
    fn test_transport_url_join() {
        let transport = HttpTransport::new("https://ops.example.com/api/");
        assert_eq!(transport.base_url(), "https://ops.example.com/api");
        assert_eq!(
            transport.url("/model/status/default/m1"),
            "https://ops.example.com/api/model/status/default/m1"
        );
    }
}
