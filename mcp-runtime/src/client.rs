//! HTTP client for the buildlog.ai API.

use std::future::Future;

use buildlog_core::WorkflowDocument;
use buildlog_core::error::codes;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::util::client;

pub const DEFAULT_API_URL: &str = "https://buildlog.ai/api";

/// The three remote operations the tools depend on.
pub trait WorkflowRemote: Send + Sync {
    fn search(
        &self,
        query: &SearchQuery,
    ) -> impl Future<Output = Result<SearchResponse, RemoteError>> + Send;

    /// `slug` may also be a full buildlog URL.
    fn get(&self, slug: &str) -> impl Future<Output = Result<WorkflowDocument, RemoteError>> + Send;

    /// Posts `document` exactly as given; fields this crate does not model
    /// must reach the service untouched.
    fn upload(
        &self,
        document: &Map<String, Value>,
        public: bool,
    ) -> impl Future<Output = Result<UploadResponse, RemoteError>> + Send;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    pub language: Option<String>,
    pub framework: Option<String>,
    pub limit: Option<u64>,
}

impl SearchQuery {
    fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("q", self.query.clone())];
        if let Some(language) = &self.language {
            pairs.push(("language", language.clone()));
        }
        if let Some(framework) = &self.framework {
            pairs.push(("framework", framework.clone()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub buildlogs: Vec<SearchResult>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub slug: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub step_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl SearchResult {
    /// Username when known, else display name.
    pub fn author_label(&self) -> Option<&str> {
        let author = self.author.as_ref()?;
        author.username.as_deref().or(author.name.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadResponse {
    pub slug: String,
    pub url: String,
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOperation {
    Search,
    Get,
    Upload,
}

impl std::fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RemoteOperation::Search => "search buildlogs",
            RemoteOperation::Get => "get buildlog",
            RemoteOperation::Upload => "upload buildlog",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteErrorKind {
    #[error("Buildlog not found: {slug}")]
    NotFound { slug: String },
    #[error("Authentication required. Set BUILDLOG_API_KEY environment variable.")]
    AuthRequired,
    #[error("API error: {status} {detail}")]
    Status { status: u16, detail: String },
    #[error("{0}")]
    Transport(String),
    #[error("invalid response body: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to {operation}: {kind}")]
pub struct RemoteError {
    pub operation: RemoteOperation,
    pub kind: RemoteErrorKind,
}

impl RemoteError {
    pub fn new(operation: RemoteOperation, kind: RemoteErrorKind) -> Self {
        Self { operation, kind }
    }

    pub fn code(&self) -> &'static str {
        match self.kind {
            RemoteErrorKind::NotFound { .. } => codes::REMOTE_NOT_FOUND,
            RemoteErrorKind::AuthRequired => codes::REMOTE_AUTH_REQUIRED,
            RemoteErrorKind::Status { .. }
            | RemoteErrorKind::Transport(_)
            | RemoteErrorKind::InvalidResponse(_) => codes::REMOTE_TRANSPORT_ERROR,
        }
    }
}

/// Accepts a bare slug or a URL containing `/b/<slug>` or `/buildlogs/<slug>`.
pub fn extract_slug(input: &str) -> String {
    let trimmed = input.trim();
    let path = match url::Url::parse(trimmed) {
        Ok(url) if url.has_host() => url.path().to_string(),
        _ => trimmed.to_string(),
    };
    let segments: Vec<&str> = path.split('/').collect();
    for pair in segments.windows(2) {
        if !matches!(pair[0], "b" | "buildlogs") {
            continue;
        }
        let slug: String = pair[1]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if !slug.is_empty() {
            return slug;
        }
    }
    trimmed.to_string()
}

#[derive(Debug, Clone)]
pub struct BuildlogApiClient {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl BuildlogApiClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            http: client(),
        }
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        operation: RemoteOperation,
    ) -> Result<reqwest::RequestBuilder, RemoteError> {
        let mut url = reqwest::Url::parse(&format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            path
        ))
        .map_err(|e| {
            RemoteError::new(
                operation,
                RemoteErrorKind::Transport(format!("Invalid API URL/path: {e}")),
            )
        })?;
        if !query.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (k, v) in query {
                qp.append_pair(k, v);
            }
        }

        let mut request = self
            .http
            .request(method, url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        Ok(request)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        operation: RemoteOperation,
    ) -> Result<reqwest::Response, RemoteError> {
        request.send().await.map_err(|e| {
            tracing::warn!(%operation, error = %e, base_url = %self.base_url, "buildlog API unreachable");
            RemoteError::new(operation, RemoteErrorKind::Transport(e.to_string()))
        })
    }
}

fn status_error(operation: RemoteOperation, status: StatusCode, detail: String) -> RemoteError {
    tracing::warn!(%operation, status = status.as_u16(), "buildlog API returned an error");
    RemoteError::new(
        operation,
        RemoteErrorKind::Status {
            status: status.as_u16(),
            detail,
        },
    )
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation: RemoteOperation,
) -> Result<T, RemoteError> {
    response
        .json::<T>()
        .await
        .map_err(|e| RemoteError::new(operation, RemoteErrorKind::InvalidResponse(e.to_string())))
}

impl WorkflowRemote for BuildlogApiClient {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, RemoteError> {
        let operation = RemoteOperation::Search;
        tracing::debug!(query = %query.query, "searching buildlogs");
        let request = self.request(Method::GET, "/buildlogs/search", &query.to_pairs(), operation)?;
        let response = self.send(request, operation).await?;
        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or_default().to_string();
            return Err(status_error(operation, status, reason));
        }
        decode(response, operation).await
    }

    async fn get(&self, slug: &str) -> Result<WorkflowDocument, RemoteError> {
        let operation = RemoteOperation::Get;
        let slug = extract_slug(slug);
        tracing::debug!(%slug, "fetching buildlog");
        let request = self.request(Method::GET, &format!("/buildlogs/{slug}"), &[], operation)?;
        let response = self.send(request, operation).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::new(operation, RemoteErrorKind::NotFound { slug }));
        }
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or_default().to_string();
            return Err(status_error(operation, status, reason));
        }
        decode(response, operation).await
    }

    async fn upload(
        &self,
        document: &Map<String, Value>,
        public: bool,
    ) -> Result<UploadResponse, RemoteError> {
        let operation = RemoteOperation::Upload;
        let title = document
            .get("metadata")
            .and_then(|metadata| metadata.get("title"))
            .and_then(|title| title.as_str())
            .unwrap_or_default();
        tracing::debug!(title, public, "uploading buildlog");
        let request = self
            .request(Method::POST, "/buildlogs/upload", &[], operation)?
            .json(&json!({
                "buildlog": document,
                "public": public,
            }));
        let response = self.send(request, operation).await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(RemoteError::new(operation, RemoteErrorKind::AuthRequired));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(operation, status, format!("- {body}")));
        }
        decode(response, operation).await
    }
}
