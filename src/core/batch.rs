//! Batch endpoint: independent generation jobs run concurrently.
//!
//! A batch has no dependencies between its jobs. Every job is submitted at
//! once and results come back in input order.

use std::collections::HashSet;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use super::job_client::JobClient;
use super::progress::CancelFlag;
use crate::adapters::JobRequest;
use crate::domain::TaskKind;

/// Largest accepted batch
pub const MAX_BATCH_JOBS: usize = 100;

/// Batch validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("Batch contains no jobs")]
    Empty,

    #[error("Batch has {count} jobs, at most {max} are allowed")]
    TooManyJobs { count: usize, max: usize },

    #[error("Duplicate job ID: {0}")]
    DuplicateJobId(String),

    #[error("Job '{id}' has unsupported kind '{kind}'")]
    UnsupportedKind { id: String, kind: TaskKind },
}

/// One job in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,

    #[serde(default = "default_kind")]
    pub kind: TaskKind,

    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f32>,

    /// Source references for derived images and videos
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

fn default_kind() -> TaskKind {
    TaskKind::PrimaryImage
}

impl BatchJob {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: default_kind(),
            prompt: prompt.into(),
            aspect_ratio: None,
            duration_secs: None,
            seed: None,
            guidance_scale: None,
            sources: Vec::new(),
        }
    }

    fn to_request(&self) -> JobRequest {
        JobRequest {
            task_id: self.id.clone(),
            kind: self.kind,
            prompt: self.prompt.clone(),
            aspect_ratio: self.aspect_ratio.clone(),
            duration_secs: self.duration_secs,
            seed: self.seed,
            guidance_scale: self.guidance_scale,
            sources: self.sources.clone(),
        }
    }
}

/// Batch request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Caller-provided correlation id, echoed back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,

    pub jobs: Vec<BatchJob>,
}

/// Outcome of one batch job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJobResult {
    pub id: String,

    pub success: bool,

    /// First output reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,

    /// One entry per job, in request order
    pub results: Vec<BatchJobResult>,

    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
}

/// Runs batches through a `JobClient`
#[derive(Clone)]
pub struct BatchRunner {
    client: JobClient,
    cancel: CancelFlag,
}

impl BatchRunner {
    pub fn new(client: JobClient) -> Self {
        Self {
            client,
            cancel: CancelFlag::new(),
        }
    }

    /// Stop submitting new batch jobs once `cancel` is set
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Check size, id uniqueness and job kinds
    pub fn validate(request: &BatchRequest) -> Result<(), BatchError> {
        if request.jobs.is_empty() {
            return Err(BatchError::Empty);
        }
        if request.jobs.len() > MAX_BATCH_JOBS {
            return Err(BatchError::TooManyJobs {
                count: request.jobs.len(),
                max: MAX_BATCH_JOBS,
            });
        }

        let mut seen = HashSet::new();
        for job in &request.jobs {
            if !seen.insert(job.id.as_str()) {
                return Err(BatchError::DuplicateJobId(job.id.clone()));
            }
            if !job.kind.is_remote() {
                return Err(BatchError::UnsupportedKind {
                    id: job.id.clone(),
                    kind: job.kind,
                });
            }
        }

        Ok(())
    }

    /// Validate and run every job concurrently
    #[instrument(skip(self, request), fields(jobs = request.jobs.len()))]
    pub async fn run(&self, request: BatchRequest) -> Result<BatchResponse, BatchError> {
        Self::validate(&request)?;
        let started = Instant::now();

        let results = join_all(request.jobs.iter().map(|job| self.run_job(job))).await;

        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        info!(succeeded, failed, "Batch finished");

        Ok(BatchResponse {
            context_id: request.context_id,
            results,
            succeeded,
            failed,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn run_job(&self, job: &BatchJob) -> BatchJobResult {
        let outcome = self.client.run(&job.to_request(), &self.cancel).await;

        match outcome.result {
            Ok(outputs) => BatchJobResult {
                id: job.id.clone(),
                success: true,
                output: outputs.first().cloned(),
                outputs,
                error: None,
            },
            Err(e) => BatchJobResult {
                id: job.id.clone(),
                success: false,
                output: None,
                outputs: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }
}
