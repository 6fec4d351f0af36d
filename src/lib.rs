//! shotgraph - Dependency-driven generation orchestrator
//!
//! Turns a creative brief (characters, backgrounds, composite shots and
//! video clips) into a graph of remote generation jobs and drives it to
//! completion with maximal fan-out.
//!
//! # Architecture
//!
//! The system is built around a single-writer coordinator:
//! - The brief is compiled into a validated task graph up front
//! - Tasks launch as soon as their own dependencies allow, with no level barrier
//! - Failures propagate to required dependents; collections tolerate partial input
//! - Observers only ever see snapshots and events
//!
//! # Modules
//!
//! - `adapters`: External systems (generation service, canvas, telemetry, storage, Resolve)
//! - `core`: Orchestration logic (graph, job client, executor, aggregation, batch)
//! - `domain`: Data structures (brief, task, run state, summary, events)
//! - `cli`: Command-line interface
//! - `server`: HTTP batch endpoint
//!
//! # Usage
//!
//! ```bash
//! # Inspect the task graph for a brief
//! shotgraph plan brief.yaml
//!
//! # Execute it
//! shotgraph run brief.yaml
//!
//! # Serve the batch endpoint
//! shotgraph serve --address 127.0.0.1:9000
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod server;

// Re-export main types at crate root for convenience
pub use core::{GraphBuilder, Orchestrator, TaskGraph};
pub use domain::{Brief, GenerationTask, RunReport, RunState, RunSummary, TaskError, TaskKind};
