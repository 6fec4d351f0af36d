//! Generation tasks: one unit of orchestrated work each.
//!
//! A task maps to exactly one remote generation call (images, videos),
//! one aggregation (collections) or one hand-off (exports).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of work a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// First, reference-establishing image of an entity
    PrimaryImage,

    /// Image derived from an entity's primary
    VariantImage,

    /// Scene-level image combining several entities' primaries
    CompositeImage,

    /// Aggregate of several image outputs
    Collection,

    /// Video clip
    Video,

    /// Hand-off of a finished video to an editing application
    Export,
}

impl TaskKind {
    /// Whether this kind produces a still image
    pub fn is_image(self) -> bool {
        matches!(
            self,
            Self::PrimaryImage | Self::VariantImage | Self::CompositeImage
        )
    }

    /// Whether this kind is executed through the remote job client
    pub fn is_remote(self) -> bool {
        self.is_image() || self == Self::Video
    }

    /// Reporting phase for this kind
    pub fn phase(self) -> Phase {
        match self {
            Self::PrimaryImage => Phase::Primary,
            Self::VariantImage => Phase::Variant,
            Self::CompositeImage => Phase::Composite,
            Self::Collection => Phase::Collection,
            Self::Video => Phase::Video,
            Self::Export => Phase::Export,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrimaryImage => "primary_image",
            Self::VariantImage => "variant_image",
            Self::CompositeImage => "composite_image",
            Self::Collection => "collection",
            Self::Video => "video",
            Self::Export => "export",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress phase label.
///
/// Phases order the report, they never gate execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Primary,
    Variant,
    Composite,
    Collection,
    Video,
    Export,
    Finished,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Primary => "primary",
            Self::Variant => "variant",
            Self::Composite => "composite",
            Self::Collection => "collection",
            Self::Video => "video",
            Self::Export => "export",
            Self::Finished => "finished",
        };
        f.write_str(label)
    }
}

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies
    Pending,

    /// Launched, remote work in flight
    Running,

    /// Finished with a result
    Done,

    /// Failed, propagated, or never launched
    Error,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// How a task treats its dependencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum DependencyPolicy {
    /// Every dependency must be done; any failure propagates
    RequireAll,

    /// Wait for every dependency to be terminal, then proceed when at
    /// least `min_sources` of them are done
    Partial { min_sources: usize },
}

impl Default for DependencyPolicy {
    fn default() -> Self {
        Self::RequireAll
    }
}

/// Kind-specific input for a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Prompt text (absent for collections and exports)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,

    /// Clip duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f32>,

    /// Human-readable name (collection name, clip name on export)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Source artifact references known before execution
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl TaskPayload {
    /// Payload carrying only a prompt
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Default::default()
        }
    }

    /// Payload carrying only a label
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Default::default()
        }
    }
}

/// Why a task ended in `error`
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum TaskError {
    /// Non-2xx or transport failure while submitting
    #[error("submission failed{}: {message}", http_status_suffix(.status))]
    Submission { status: Option<u16>, message: String },

    /// The service reported the job as failed
    #[error("remote job failed: {0}")]
    RemoteFailure(String),

    /// Poll attempt cap exceeded
    #[error("timeout")]
    Timeout { attempts: u32 },

    /// A required dependency failed; never attempted
    #[error("upstream dependency failed")]
    UpstreamDependencyFailed,

    /// A collection had too few usable sources
    #[error("no source artifacts available")]
    AggregationEmpty,

    /// Export hand-off failed
    #[error("export failed: {0}")]
    ExportFailed(String),

    /// Run was cancelled before this task was launched
    #[error("cancelled")]
    Cancelled,
}

fn http_status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

/// One unit of remote work and its current state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationTask {
    /// Unique, stable identifier
    pub id: String,

    pub kind: TaskKind,

    #[serde(default)]
    pub status: TaskStatus,

    /// Tasks that must finish before this one may start (ordered, no duplicates)
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub policy: DependencyPolicy,

    /// Task group this task feeds (for collections)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default)]
    pub payload: TaskPayload,

    /// Primary output reference once done
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Every output reference once done (collections: the gathered sources)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,

    /// Failure reason once in error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl GenerationTask {
    /// Create a pending task with no dependencies
    pub fn new(id: impl Into<String>, kind: TaskKind, payload: TaskPayload) -> Self {
        Self {
            id: id.into(),
            kind,
            status: TaskStatus::Pending,
            depends_on: Vec::new(),
            policy: DependencyPolicy::RequireAll,
            group: None,
            payload,
            result: None,
            artifacts: Vec::new(),
            error: None,
        }
    }

    /// Add a dependency, keeping `depends_on` an ordered set
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    /// Add several dependencies in order
    pub fn depends_on_all<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            self = self.depends_on(id);
        }
        self
    }

    pub fn with_policy(mut self, policy: DependencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Human-readable failure reason, if any
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }

    /// References this task hands to its dependents.
    ///
    /// A job hands over its single `result`; a collection hands over every
    /// member it gathered.
    pub fn outputs(&self) -> Vec<String> {
        match self.kind {
            TaskKind::Collection => self.artifacts.clone(),
            _ => self.result.iter().cloned().collect(),
        }
    }
}
