//! Adapter interfaces for external systems.
//!
//! The orchestrator only reaches the outside world through these seams:
//! - `JobBackend`: remote generation service (submit/poll)
//! - `CollectionSink`: canvas layer receiving assembled collections
//! - `GenerationRecorder`: fire-and-forget telemetry
//! - `ArtifactLoader`: storage layer resolving artifact references to bytes
//! - `Exporter`: editing application receiving finished clips

pub mod http;
pub mod job;
pub mod recorder;
pub mod resolve;
pub mod storage;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::domain::{GenerationRecord, TaskError};

// Re-export the concrete adapters
pub use http::{default_endpoints, EndpointConfig, HttpJobBackend};
pub use job::{JobBackend, JobParam, JobRequest, PollPolicy, PollStatus, StatusHandle, Submission};
pub use recorder::JsonlGenerationLog;
pub use resolve::ResolveExporter;
pub use storage::HttpArtifactLoader;

/// Receives assembled collections (canvas/UI layer)
#[async_trait]
pub trait CollectionSink: Send + Sync {
    /// Populate a named collection; `false` means the sink refused it
    async fn populate_collection(&self, collection_id: &str, sources: &[String]) -> bool;
}

/// Receives generation telemetry.
///
/// Implementations must return immediately and must never fail the caller.
pub trait GenerationRecorder: Send + Sync {
    fn record(&self, record: GenerationRecord);
}

/// Resolves an artifact reference to its bytes
#[async_trait]
pub trait ArtifactLoader: Send + Sync {
    async fn load(&self, reference: &str) -> Result<Vec<u8>>;
}

/// A finished clip to hand off to an editing application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub task_id: String,

    /// Reference of the video to export
    pub video: String,

    /// Clip name inside the editing application
    pub clip_name: String,
}

/// Hands finished clips to an editing application
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Human-readable exporter name
    fn name(&self) -> &str;

    /// Export one clip, returning where it landed
    async fn export(&self, request: &ExportRequest) -> Result<String, TaskError>;
}

/// Collection sink for runs without a canvas attached
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedCollectionSink;

#[async_trait]
impl CollectionSink for DetachedCollectionSink {
    async fn populate_collection(&self, collection_id: &str, sources: &[String]) -> bool {
        debug!(collection = collection_id, sources = sources.len(), "No canvas attached");
        true
    }
}

/// Recorder that drops every record
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecorder;

impl GenerationRecorder for NullRecorder {
    fn record(&self, _record: GenerationRecord) {}
}
