//! Shared fixtures for the integration tests.
//!
//! `ScriptedBackend` stands in for the generation service: each task id is
//! given a behavior, and every submission, completion and poll is recorded
//! against tokio's clock so tests can run with paused time.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use shotgraph::adapters::{
    ArtifactLoader, ExportRequest, Exporter, GenerationRecorder, JobBackend, JobRequest,
    PollPolicy, PollStatus, StatusHandle, Submission,
};
use shotgraph::core::JobClient;
use shotgraph::domain::{GenerationRecord, TaskError, TaskKind};

/// How the scripted service answers for one task
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer the submission with output after `delay`
    Immediate { delay: Duration },

    /// Answer the submission right away with a main and an alternate output
    Alternates,

    /// Accept the submission and report completion on the given poll
    Deferred { polls_until_done: u32 },

    /// Reject the submission with HTTP 500
    SubmitError,

    /// Accept, then report failure on the first poll
    RemoteFailure,

    /// Accept, then report processing forever
    NeverFinishes,
}

#[derive(Default)]
struct Journal {
    submitted: HashMap<String, Instant>,
    completed: HashMap<String, Instant>,
    sources: HashMap<String, Vec<String>>,
    polls: HashMap<String, u32>,
    order: Vec<String>,
}

pub struct ScriptedBackend {
    behaviors: HashMap<String, Behavior>,
    fallback: Behavior,
    journal: Mutex<Journal>,
}

impl ScriptedBackend {
    /// Every task answers immediately unless scripted otherwise
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            fallback: Behavior::Immediate {
                delay: Duration::ZERO,
            },
            journal: Mutex::new(Journal::default()),
        }
    }

    pub fn with(mut self, task_id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(task_id.to_string(), behavior);
        self
    }

    pub fn with_fallback(mut self, behavior: Behavior) -> Self {
        self.fallback = behavior;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn behavior(&self, task_id: &str) -> Behavior {
        self.behaviors
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn complete(&self, task_id: &str) -> Vec<String> {
        self.journal
            .lock()
            .unwrap()
            .completed
            .insert(task_id.to_string(), Instant::now());
        vec![output_for(task_id)]
    }

    pub fn submitted_at(&self, task_id: &str) -> Option<Instant> {
        self.journal.lock().unwrap().submitted.get(task_id).copied()
    }

    pub fn completed_at(&self, task_id: &str) -> Option<Instant> {
        self.journal.lock().unwrap().completed.get(task_id).copied()
    }

    pub fn was_submitted(&self, task_id: &str) -> bool {
        self.submitted_at(task_id).is_some()
    }

    pub fn sources_of(&self, task_id: &str) -> Vec<String> {
        self.journal
            .lock()
            .unwrap()
            .sources
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn polls_of(&self, task_id: &str) -> u32 {
        self.journal
            .lock()
            .unwrap()
            .polls
            .get(task_id)
            .copied()
            .unwrap_or(0)
    }

    /// Task ids in submission order
    pub fn submission_order(&self) -> Vec<String> {
        self.journal.lock().unwrap().order.clone()
    }
}

#[async_trait]
impl JobBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn endpoint(&self, kind: TaskKind) -> String {
        format!("scripted://{}", kind)
    }

    async fn submit(&self, request: &JobRequest) -> Result<Submission, TaskError> {
        {
            let mut journal = self.journal.lock().unwrap();
            journal
                .submitted
                .insert(request.task_id.clone(), Instant::now());
            journal
                .sources
                .insert(request.task_id.clone(), request.sources.clone());
            journal.order.push(request.task_id.clone());
        }

        match self.behavior(&request.task_id) {
            Behavior::Immediate { delay } => {
                sleep(delay).await;
                Ok(Submission::Completed(self.complete(&request.task_id)))
            }
            Behavior::Alternates => {
                let mut outputs = self.complete(&request.task_id);
                outputs.push(alternate_for(&request.task_id));
                Ok(Submission::Completed(outputs))
            }
            Behavior::SubmitError => Err(TaskError::Submission {
                status: Some(500),
                message: "boom".to_string(),
            }),
            Behavior::Deferred { .. } | Behavior::RemoteFailure | Behavior::NeverFinishes => Ok(
                Submission::Deferred(StatusHandle::Id(request.task_id.clone())),
            ),
        }
    }

    async fn poll(&self, _kind: TaskKind, handle: &StatusHandle) -> Result<PollStatus> {
        let task_id = match handle {
            StatusHandle::Id(id) | StatusHandle::Url(id) => id.clone(),
        };

        let polls = {
            let mut journal = self.journal.lock().unwrap();
            let count = journal.polls.entry(task_id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        Ok(match self.behavior(&task_id) {
            Behavior::Deferred { polls_until_done } if polls >= polls_until_done => {
                PollStatus::Completed(self.complete(&task_id))
            }
            Behavior::RemoteFailure => PollStatus::Failed("content policy".to_string()),
            _ => PollStatus::Processing,
        })
    }
}

/// Output reference the scripted service returns for a task
pub fn output_for(task_id: &str) -> String {
    format!("https://cdn/{}.png", task_id)
}

/// Second output returned by `Behavior::Alternates`
pub fn alternate_for(task_id: &str) -> String {
    format!("https://cdn/{}-alt.png", task_id)
}

/// Client with short poll intervals so paused-time tests stay readable
pub fn client(backend: Arc<ScriptedBackend>, max_attempts: u32) -> JobClient {
    let policy = PollPolicy {
        interval_ms: 1000,
        max_attempts,
    };
    JobClient::new(backend).with_policies(policy, policy)
}

/// Recorder that keeps every record in memory
#[derive(Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<GenerationRecord>>,
}

impl MemoryRecorder {
    pub fn records(&self) -> Vec<GenerationRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl GenerationRecorder for MemoryRecorder {
    fn record(&self, record: GenerationRecord) {
        self.records.lock().unwrap().push(record);
    }
}

/// Loader returning the same bytes for every reference
pub struct FixedLoader(pub &'static [u8]);

#[async_trait]
impl ArtifactLoader for FixedLoader {
    async fn load(&self, _reference: &str) -> Result<Vec<u8>> {
        Ok(self.0.to_vec())
    }
}

/// Loader that takes `delay` before answering
pub struct SlowLoader {
    pub delay: Duration,
}

#[async_trait]
impl ArtifactLoader for SlowLoader {
    async fn load(&self, _reference: &str) -> Result<Vec<u8>> {
        sleep(self.delay).await;
        Ok(b"img".to_vec())
    }
}

/// Exporter remembering what it was asked to export
#[derive(Default)]
pub struct MemoryExporter {
    requests: Mutex<Vec<ExportRequest>>,
}

impl MemoryExporter {
    pub fn requests(&self) -> Vec<ExportRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Exporter for MemoryExporter {
    fn name(&self) -> &str {
        "memory"
    }

    async fn export(&self, request: &ExportRequest) -> Result<String, TaskError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(format!("bin://{}", request.clip_name))
    }
}
