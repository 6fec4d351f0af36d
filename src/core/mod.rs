//! Core orchestration logic.
//!
//! This module contains:
//! - Graph: brief -> validated task graph
//! - JobClient: submit/poll driver for remote jobs
//! - Executor: dependency-driven fan-out scheduler
//! - Aggregate: collection assembly
//! - Progress: snapshots, events and cancellation
//! - Orchestrator: run lifecycle
//! - Batch: independent concurrent jobs

pub mod aggregate;
pub mod batch;
pub mod executor;
pub mod graph;
pub mod job_client;
pub mod orchestrator;
pub mod progress;

// Re-export commonly used types
pub use batch::{BatchError, BatchJob, BatchJobResult, BatchRequest, BatchResponse, BatchRunner};
pub use executor::PhaseExecutor;
pub use graph::{BuildOptions, GraphBuilder, GraphError, TaskGraph};
pub use job_client::{JobClient, JobOutcome};
pub use orchestrator::{load_report, save_report, Orchestrator};
pub use progress::{CancelFlag, ProgressTracker};
