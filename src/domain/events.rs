//! Events pushed to observers during a run, and generation telemetry records.
//!
//! Observers never touch run state directly; they consume these
//! immutable values from a single-writer stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::run::ProgressSnapshot;
use super::summary::RunSummary;
use super::task::{GenerationTask, TaskKind};

/// A state transition observed by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum RunEvent {
    /// A run has started
    RunStarted { run_id: Uuid, total: usize },

    /// A task was launched
    TaskStarted { task_id: String, kind: TaskKind },

    /// A task reached `done` or `error`
    TaskFinished { task: GenerationTask },

    /// Progress after a transition
    Progress(ProgressSnapshot),

    /// Cancellation was observed by the coordinator
    CancelObserved { run_id: Uuid },

    /// Every task is terminal
    RunFinished { run_id: Uuid, summary: RunSummary },
}

/// Telemetry for one finished remote generation call.
///
/// Carries a hash of the prompt, never the prompt itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Unique identifier for this record
    pub id: Uuid,

    /// When the job finished
    pub timestamp: DateTime<Utc>,

    pub run_id: Uuid,

    pub task_id: String,

    pub kind: TaskKind,

    /// Endpoint the job was submitted to
    pub endpoint: String,

    /// First 16 hex chars of the prompt's SHA-256
    pub prompt_hash: String,

    pub success: bool,

    /// Polls observed (0 for synchronous results)
    pub polls: u32,

    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationRecord {
    /// Create a record with the current timestamp
    pub fn new(
        run_id: Uuid,
        task_id: impl Into<String>,
        kind: TaskKind,
        endpoint: impl Into<String>,
        prompt: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            task_id: task_id.into(),
            kind,
            endpoint: endpoint.into(),
            prompt_hash: hash_prompt(prompt),
            success: false,
            polls: 0,
            duration_ms: 0,
            outputs: Vec::new(),
            error: None,
        }
    }

    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.success = true;
        self.outputs = outputs;
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.success = false;
        self.error = Some(error);
        self
    }

    pub fn with_timing(mut self, polls: u32, duration_ms: u64) -> Self {
        self.polls = polls;
        self.duration_ms = duration_ms;
        self
    }
}

/// Hash prompt text (first 16 chars of SHA256)
pub fn hash_prompt(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::Phase;

    #[test]
    fn test_prompt_hash_consistency() {
        let hash1 = hash_prompt("portrait of alice");
        let hash2 = hash_prompt("portrait of alice");
        let hash3 = hash_prompt("portrait of bob");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16);
    }

    #[test]
    fn test_record_never_carries_prompt() {
        let record = GenerationRecord::new(
            Uuid::new_v4(),
            "alice/primary",
            TaskKind::PrimaryImage,
            "https://api.example.com/image",
            "secret prompt text",
        )
        .with_outputs(vec!["https://cdn/alice.png".to_string()])
        .with_timing(3, 6000);

        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("secret prompt text"));
        assert!(record.success);
        assert_eq!(record.polls, 3);
    }

    #[test]
    fn test_event_serialization() {
        let event = RunEvent::Progress(ProgressSnapshot {
            completed: 2,
            total: 5,
            phase: Phase::Variant,
            active_count: 3,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"progress\""));

        let parsed: RunEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, RunEvent::Progress(p) if p.active_count == 3));
    }
}
