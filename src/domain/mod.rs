//! Domain types for the shotgraph orchestrator.
//!
//! This module contains the core data structures:
//! - Brief: Declarative entity definitions
//! - Task: Generation tasks and their failure taxonomy
//! - Run: Per-invocation state and progress snapshots
//! - Events: Observer events and generation telemetry
//! - Summary: Terminal counters

pub mod brief;
pub mod events;
pub mod run;
pub mod summary;
pub mod task;

// Re-export commonly used types
pub use brief::{Brief, ClipSource, ClipSpec, EntityKind, EntitySpec, ShotSpec, ViewSpec};
pub use events::{hash_prompt, GenerationRecord, RunEvent};
pub use run::{ProgressSnapshot, RunReport, RunState};
pub use summary::RunSummary;
pub use task::{
    DependencyPolicy, GenerationTask, Phase, TaskError, TaskKind, TaskPayload, TaskStatus,
};
