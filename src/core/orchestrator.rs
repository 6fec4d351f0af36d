//! Main orchestrator for brief execution.
//!
//! Owns the collaborators for a run, creates the run state, drives the
//! fan-out executor and reduces the terminal task set into a report.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument};
use uuid::Uuid;

use super::executor::PhaseExecutor;
use super::graph::{GraphBuilder, GraphError, TaskGraph};
use super::job_client::JobClient;
use super::progress::ProgressTracker;
use crate::adapters::{
    ArtifactLoader, CollectionSink, DetachedCollectionSink, Exporter, GenerationRecorder,
    NullRecorder,
};
use crate::domain::{Brief, RunEvent, RunReport, RunState, RunSummary};

/// Main generation orchestrator
pub struct Orchestrator {
    client: JobClient,
    sink: Arc<dyn CollectionSink>,
    recorder: Arc<dyn GenerationRecorder>,

    /// Set when sources are sent inline as data URIs
    inline_loader: Option<Arc<dyn ArtifactLoader>>,

    exporter: Option<Arc<dyn Exporter>>,
}

impl Orchestrator {
    /// Create an orchestrator with no canvas, recorder or exporter attached
    pub fn new(client: JobClient) -> Self {
        Self {
            client,
            sink: Arc::new(DetachedCollectionSink),
            recorder: Arc::new(NullRecorder),
            inline_loader: None,
            exporter: None,
        }
    }

    pub fn with_collection_sink(mut self, sink: Arc<dyn CollectionSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn GenerationRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Load sources through `loader` and send them as data URIs
    pub fn with_inline_sources(mut self, loader: Arc<dyn ArtifactLoader>) -> Self {
        self.inline_loader = Some(loader);
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Build the graph for a brief and execute it
    pub async fn run_brief(
        &self,
        brief: &Brief,
        builder: &GraphBuilder,
        tracker: &ProgressTracker,
    ) -> Result<RunReport, GraphError> {
        let graph = builder.build(brief)?;
        Ok(self.run(&brief.name, &graph, tracker).await)
    }

    /// Execute a validated graph until every task is terminal.
    ///
    /// Task failures never escape: they are recorded on the tasks and
    /// counted in the summary.
    #[instrument(skip(self, graph, tracker), fields(tasks = graph.len()))]
    pub async fn run(&self, brief_name: &str, graph: &TaskGraph, tracker: &ProgressTracker) -> RunReport {
        let run_id = Uuid::new_v4();
        info!(%run_id, "Starting run");

        let mut state = RunState::new(run_id, brief_name, graph.tasks().to_vec());
        tracker.emit(RunEvent::RunStarted {
            run_id,
            total: state.len(),
        });

        let mut executor = PhaseExecutor::new(
            &self.client,
            self.sink.as_ref(),
            self.recorder.as_ref(),
            tracker,
        );
        if let Some(loader) = &self.inline_loader {
            executor = executor.with_inline_sources(loader.as_ref());
        }
        if let Some(exporter) = &self.exporter {
            executor = executor.with_exporter(exporter.as_ref());
        }

        executor.execute(graph, &mut state).await;

        let summary = RunSummary::from_tasks(state.tasks(), state.elapsed());
        info!(%run_id, cancelled = state.cancelled, %summary, "Run finished");
        tracker.emit(RunEvent::RunFinished {
            run_id,
            summary: summary.clone(),
        });

        state.into_report(summary)
    }
}

/// Persist a report as `<runs_dir>/<run_id>/report.json`
pub async fn save_report(report: &RunReport, runs_dir: &Path) -> Result<PathBuf> {
    let run_dir = runs_dir.join(report.run_id.to_string());
    tokio::fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

    let path = run_dir.join("report.json");
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("Failed to write report: {}", path.display()))?;

    Ok(path)
}

/// Load a report written by `save_report`
pub async fn load_report(path: &Path) -> Result<RunReport> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read report: {}", path.display()))?;

    serde_json::from_str(&content).with_context(|| format!("Failed to parse report: {}", path.display()))
}
