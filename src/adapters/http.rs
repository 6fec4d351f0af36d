//! HTTP generation backend.
//!
//! Each task kind is submitted to its own endpoint with `POST`; deferred
//! jobs are polled with `GET` on the returned status handle.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::job::{
    parse_poll, parse_submission, JobBackend, JobParam, JobRequest, PollStatus, StatusHandle,
    Submission,
};
use crate::domain::{TaskError, TaskKind};

const BODY_PREVIEW_LIMIT: usize = 512;

/// Where a task kind is submitted and what it accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Path relative to the base URL, or an absolute URL
    pub path: String,

    /// Optional parameters this endpoint understands
    #[serde(default)]
    pub supports: Vec<JobParam>,
}

impl EndpointConfig {
    pub fn new(path: impl Into<String>, supports: &[JobParam]) -> Self {
        Self {
            path: path.into(),
            supports: supports.to_vec(),
        }
    }
}

/// Default endpoint layout for every remote task kind
pub fn default_endpoints() -> HashMap<TaskKind, EndpointConfig> {
    let image = [JobParam::AspectRatio, JobParam::Seed, JobParam::GuidanceScale];
    let derived = [
        JobParam::AspectRatio,
        JobParam::Seed,
        JobParam::GuidanceScale,
        JobParam::SourceImages,
    ];
    let video = [
        JobParam::AspectRatio,
        JobParam::Duration,
        JobParam::Seed,
        JobParam::SourceImages,
    ];

    HashMap::from([
        (
            TaskKind::PrimaryImage,
            EndpointConfig::new("/v1/images/generations", &image),
        ),
        (
            TaskKind::VariantImage,
            EndpointConfig::new("/v1/images/edits", &derived),
        ),
        (
            TaskKind::CompositeImage,
            EndpointConfig::new("/v1/images/edits", &derived),
        ),
        (TaskKind::Video, EndpointConfig::new("/v1/videos", &video)),
    ])
}

/// Generation backend speaking JSON over HTTP
pub struct HttpJobBackend {
    base_url: String,
    endpoints: HashMap<TaskKind, EndpointConfig>,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpJobBackend {
    /// Create a backend with a per-request timeout
    pub fn new(
        base_url: impl Into<String>,
        endpoints: HashMap<TaskKind, EndpointConfig>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            endpoints,
            api_key,
            client,
        })
    }

    fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    fn status_url(&self, kind: TaskKind, handle: &StatusHandle) -> String {
        match handle {
            StatusHandle::Url(url) => self.resolve(url),
            StatusHandle::Id(id) => format!("{}/status/{}", self.endpoint(kind), id),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl JobBackend for HttpJobBackend {
    fn name(&self) -> &str {
        "http"
    }

    fn endpoint(&self, kind: TaskKind) -> String {
        self.endpoints
            .get(&kind)
            .map(|e| self.resolve(&e.path))
            .unwrap_or_default()
    }

    async fn submit(&self, request: &JobRequest) -> Result<Submission, TaskError> {
        let endpoint = self.endpoints.get(&request.kind).ok_or_else(|| TaskError::Submission {
            status: None,
            message: format!("no endpoint configured for {}", request.kind),
        })?;
        let url = self.resolve(&endpoint.path);
        let body = request.to_body(&endpoint.supports);

        debug!(task = %request.task_id, %url, "Submitting job");

        let response = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| TaskError::Submission {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| TaskError::Submission {
            status: Some(status.as_u16()),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(TaskError::Submission {
                status: Some(status.as_u16()),
                message: preview_body(&text),
            });
        }

        let value: Value = serde_json::from_str(&text).map_err(|e| TaskError::Submission {
            status: Some(status.as_u16()),
            message: format!("invalid response body: {} | body={}", e, preview_body(&text)),
        })?;

        parse_submission(&value).ok_or_else(|| TaskError::Submission {
            status: Some(status.as_u16()),
            message: "response carried neither output nor status handle".to_string(),
        })
    }

    async fn poll(&self, kind: TaskKind, handle: &StatusHandle) -> Result<PollStatus> {
        let url = self.status_url(kind, handle);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .with_context(|| format!("Failed to poll {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Poll error ({}): {}", status, preview_body(&text));
        }

        let value: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse poll response from {}", url))?;

        Ok(parse_poll(&value))
    }
}

fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }
    if trimmed.len() <= BODY_PREVIEW_LIMIT {
        return trimmed.to_string();
    }
    let mut end = BODY_PREVIEW_LIMIT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
