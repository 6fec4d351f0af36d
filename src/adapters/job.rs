//! Submit/poll protocol types shared by every generation backend.
//!
//! A job is submitted once. The service either answers with output
//! references right away or with a status handle that must be polled
//! until it reports completion or failure.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{GenerationTask, TaskError, TaskKind};

/// Optional request parameters an endpoint may declare as supported.
///
/// The prompt is always sent; everything else is omitted unless declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobParam {
    AspectRatio,
    Duration,
    Seed,
    GuidanceScale,
    SourceImages,
}

/// Fixed-interval polling with a hard attempt cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Delay before each poll in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Maximum polls before giving up
    pub max_attempts: u32,
}

fn default_interval_ms() -> u64 {
    2000
}

impl PollPolicy {
    /// Image-class jobs: 2s x 60 (2 minutes)
    pub fn image() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_attempts: 60,
        }
    }

    /// Video-class jobs: 2s x 90 (3 minutes)
    pub fn video() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_attempts: 90,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Longest time a job can spend polling
    pub fn max_wait(&self) -> Duration {
        self.interval() * self.max_attempts
    }
}

/// One generation call, built from a task and its resolved sources
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub task_id: String,
    pub kind: TaskKind,
    pub prompt: String,
    pub aspect_ratio: Option<String>,
    pub duration_secs: Option<u32>,
    pub seed: Option<u64>,
    pub guidance_scale: Option<f32>,

    /// Source artifact references (URLs or data URIs), in dependency order
    pub sources: Vec<String>,
}

impl JobRequest {
    /// Build a request from a task payload plus sources gathered upstream
    pub fn from_task(task: &GenerationTask, upstream: Vec<String>) -> Self {
        let payload = &task.payload;
        let mut sources = payload.sources.clone();
        sources.extend(upstream);

        Self {
            task_id: task.id.clone(),
            kind: task.kind,
            prompt: payload.prompt.clone().unwrap_or_default(),
            aspect_ratio: payload.aspect_ratio.clone(),
            duration_secs: payload.duration_secs,
            seed: payload.seed,
            guidance_scale: payload.guidance_scale,
            sources,
        }
    }

    /// Minimal request carrying only a prompt
    pub fn prompt(task_id: impl Into<String>, kind: TaskKind, prompt: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            kind,
            prompt: prompt.into(),
            aspect_ratio: None,
            duration_secs: None,
            seed: None,
            guidance_scale: None,
            sources: Vec::new(),
        }
    }

    /// JSON body with only the parameters the endpoint supports.
    ///
    /// Unsupported or absent parameters are left out entirely rather than
    /// sent with a default.
    pub fn to_body(&self, supports: &[JobParam]) -> Value {
        let mut body = Map::new();
        body.insert("prompt".to_string(), Value::from(self.prompt.clone()));

        let supported = |p: JobParam| supports.contains(&p);

        if let (true, Some(ratio)) = (supported(JobParam::AspectRatio), &self.aspect_ratio) {
            body.insert("aspect_ratio".to_string(), Value::from(ratio.clone()));
        }
        if let (true, Some(duration)) = (supported(JobParam::Duration), self.duration_secs) {
            body.insert("duration".to_string(), Value::from(duration));
        }
        if let (true, Some(seed)) = (supported(JobParam::Seed), self.seed) {
            body.insert("seed".to_string(), Value::from(seed));
        }
        if let (true, Some(scale)) = (supported(JobParam::GuidanceScale), self.guidance_scale) {
            body.insert("guidance_scale".to_string(), Value::from(scale));
        }
        if supported(JobParam::SourceImages) && !self.sources.is_empty() {
            body.insert("image_urls".to_string(), Value::from(self.sources.clone()));
        }

        Value::Object(body)
    }
}

/// Where to ask for a deferred job's status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusHandle {
    /// Absolute status URL
    Url(String),

    /// Request id, resolved against the submitting endpoint
    Id(String),
}

/// Answer to a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Output available immediately
    Completed(Vec<String>),

    /// Must be polled
    Deferred(StatusHandle),
}

/// Answer to a single poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Processing,
    Completed(Vec<String>),
    Failed(String),
}

/// Trait for remote generation services
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Endpoint a job of this kind is submitted to (for telemetry)
    fn endpoint(&self, kind: TaskKind) -> String;

    /// Submit a job. Fails with `TaskError::Submission` on non-2xx or transport errors.
    async fn submit(&self, request: &JobRequest) -> Result<Submission, TaskError>;

    /// Check a deferred job once
    async fn poll(&self, kind: TaskKind, handle: &StatusHandle) -> Result<PollStatus>;
}

/// Extract output references from a response body.
///
/// Accepts `output` (string or list), `outputs`, `images[].url`,
/// `video.url` and a top-level `url`.
pub fn parse_outputs(body: &Value) -> Vec<String> {
    let mut outputs = Vec::new();

    for key in ["output", "outputs"] {
        match body.get(key) {
            Some(Value::String(s)) => outputs.push(s.clone()),
            Some(Value::Array(items)) => outputs.extend(items.iter().filter_map(url_of)),
            Some(obj @ Value::Object(_)) => outputs.extend(url_of(obj)),
            _ => {}
        }
    }

    if let Some(Value::Array(images)) = body.get("images") {
        outputs.extend(images.iter().filter_map(url_of));
    }

    if let Some(video) = body.get("video") {
        outputs.extend(url_of(video));
    }

    if outputs.is_empty() {
        if let Some(Value::String(url)) = body.get("url") {
            outputs.push(url.clone());
        }
    }

    outputs
}

fn url_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("url").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Interpret a submission response body
pub fn parse_submission(body: &Value) -> Option<Submission> {
    let outputs = parse_outputs(body);
    if !outputs.is_empty() {
        return Some(Submission::Completed(outputs));
    }

    if let Some(url) = body.get("status_url").and_then(Value::as_str) {
        return Some(Submission::Deferred(StatusHandle::Url(url.to_string())));
    }

    ["request_id", "id"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(|id| Submission::Deferred(StatusHandle::Id(id.to_string())))
}

/// Interpret a poll response body.
///
/// Unknown status words count as still processing.
pub fn parse_poll(body: &Value) -> PollStatus {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();

    match status.as_str() {
        "completed" | "complete" | "succeeded" | "success" | "done" | "ok" => {
            PollStatus::Completed(parse_outputs(body))
        }
        "failed" | "failure" | "error" | "cancelled" | "canceled" => {
            let reason = ["error", "message", "detail"]
                .iter()
                .find_map(|key| body.get(*key).and_then(Value::as_str))
                .unwrap_or(status.as_str())
                .to_string();
            PollStatus::Failed(reason)
        }
        _ => PollStatus::Processing,
    }
}
