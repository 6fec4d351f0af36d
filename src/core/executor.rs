//! Dependency-driven fan-out executor.
//!
//! The coordinator owns the `RunState` and is its only writer. Launched
//! units own their inputs and hand back an outcome, which the coordinator
//! applies before re-evaluating only the finished task's direct dependents.
//! There is no level barrier: a dependent launches as soon as its own
//! dependencies allow it, concurrently with everything else in flight.

use std::collections::VecDeque;

use futures::future::try_join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::aggregate::{self, Gathered};
use super::graph::TaskGraph;
use super::job_client::JobClient;
use super::progress::ProgressTracker;
use crate::adapters::storage::to_data_uri;
use crate::adapters::{
    ArtifactLoader, CollectionSink, ExportRequest, Exporter, GenerationRecorder, JobRequest,
};
use crate::domain::{
    DependencyPolicy, GenerationRecord, GenerationTask, RunEvent, RunState, TaskError, TaskKind,
    TaskStatus,
};

/// Whether a pending task may launch
#[derive(Debug, Clone, PartialEq, Eq)]
enum Readiness {
    Ready,
    Waiting,
    Blocked(TaskError),
}

/// A task handed to a unit, with the outputs gathered from its dependencies
struct Launch {
    task: GenerationTask,
    gathered: Gathered,
}

/// What a successful unit produced
struct Completion {
    artifacts: Vec<String>,
    result: Option<String>,
}

impl Completion {
    fn outputs(artifacts: Vec<String>) -> Self {
        Self {
            artifacts,
            result: None,
        }
    }
}

/// Drives every task of a graph to a terminal state
pub struct PhaseExecutor<'a> {
    client: &'a JobClient,
    sink: &'a dyn CollectionSink,
    recorder: &'a dyn GenerationRecorder,
    tracker: &'a ProgressTracker,
    inline_loader: Option<&'a dyn ArtifactLoader>,
    exporter: Option<&'a dyn Exporter>,
}

impl<'a> PhaseExecutor<'a> {
    pub fn new(
        client: &'a JobClient,
        sink: &'a dyn CollectionSink,
        recorder: &'a dyn GenerationRecorder,
        tracker: &'a ProgressTracker,
    ) -> Self {
        Self {
            client,
            sink,
            recorder,
            tracker,
            inline_loader: None,
            exporter: None,
        }
    }

    /// Send sources as base64 data URIs loaded through `loader`
    pub fn with_inline_sources(mut self, loader: &'a dyn ArtifactLoader) -> Self {
        self.inline_loader = Some(loader);
        self
    }

    pub fn with_exporter(mut self, exporter: &'a dyn Exporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Run until every task in `state` is terminal
    pub async fn execute(&self, graph: &TaskGraph, state: &mut RunState) {
        let run_id = state.id;
        let mut in_flight = FuturesUnordered::new();

        let seeds = graph.tasks().iter().map(|t| t.id.clone()).collect();
        let launches = self.advance(graph, state, seeds);
        in_flight.extend(launches.into_iter().map(|l| self.run_unit(run_id, l)));
        self.tracker.publish(state.progress());

        while let Some((id, outcome)) = in_flight.next().await {
            self.apply(state, &id, outcome);

            let launches = self.advance(graph, state, graph.dependents(&id).to_vec());
            in_flight.extend(launches.into_iter().map(|l| self.run_unit(run_id, l)));
            self.tracker.publish(state.progress());
        }

        self.cancel_remaining(state);
        self.tracker.publish(state.progress());
    }

    /// Evaluate tasks, propagating failures transitively and collecting
    /// the tasks that may launch now
    fn advance(&self, graph: &TaskGraph, state: &mut RunState, seeds: Vec<String>) -> Vec<Launch> {
        let mut worklist: VecDeque<String> = seeds.into();
        let mut launches = Vec::new();

        while let Some(id) = worklist.pop_front() {
            let task = match state.get(&id) {
                Some(task) if task.status == TaskStatus::Pending => task.clone(),
                _ => continue,
            };

            match readiness(state, &task) {
                Readiness::Waiting => {}
                Readiness::Blocked(error) => {
                    if error == TaskError::Cancelled {
                        self.observe_cancel(state);
                    }
                    warn!(task = %id, reason = %error, "Task will not run");
                    state.mark_error(&id, error);
                    self.finished(state, &id);
                    worklist.extend(graph.dependents(&id).iter().cloned());
                }
                Readiness::Ready => {
                    if self.observe_cancel(state) {
                        continue;
                    }

                    let gathered = aggregate::gather(state, &task);
                    state.mark_running(&id);
                    info!(task = %id, kind = %task.kind, "Task started");
                    self.tracker.emit(RunEvent::TaskStarted {
                        task_id: id.clone(),
                        kind: task.kind,
                    });
                    launches.push(Launch { task, gathered });
                }
            }
        }

        launches
    }

    /// Record a unit's outcome
    fn apply(&self, state: &mut RunState, id: &str, outcome: Result<Completion, TaskError>) {
        match outcome {
            Ok(completion) => {
                state.mark_done(id, completion.artifacts, completion.result);
                info!(task = %id, "Task done");
            }
            Err(TaskError::Cancelled) => {
                info!(task = %id, "Task cancelled before submission");
                state.mark_error(id, TaskError::Cancelled);
            }
            Err(e) => {
                error!(task = %id, error = %e, "Task failed");
                state.mark_error(id, e);
            }
        }
        self.finished(state, id);
    }

    fn finished(&self, state: &RunState, id: &str) {
        if let Some(task) = state.get(id) {
            self.tracker.emit(RunEvent::TaskFinished { task: task.clone() });
        }
    }

    /// Returns true when the run is cancelled, recording it the first time
    fn observe_cancel(&self, state: &mut RunState) -> bool {
        if !self.tracker.is_cancelled() {
            return false;
        }
        if !state.cancelled {
            state.cancelled = true;
            info!(run_id = %state.id, "Cancellation observed, no new tasks will launch");
            self.tracker.emit(RunEvent::CancelObserved { run_id: state.id });
        }
        true
    }

    /// Tasks still pending once nothing is in flight were held back by
    /// cancellation
    fn cancel_remaining(&self, state: &mut RunState) {
        let pending: Vec<String> = state
            .tasks()
            .filter(|t| !t.is_terminal())
            .map(|t| t.id.clone())
            .collect();

        if pending.is_empty() {
            return;
        }
        if !self.observe_cancel(state) {
            warn!(count = pending.len(), "Tasks left pending without cancellation");
            state.cancelled = true;
        }

        for id in pending {
            state.mark_error(&id, TaskError::Cancelled);
            self.finished(state, &id);
        }
    }

    async fn run_unit(&self, run_id: Uuid, launch: Launch) -> (String, Result<Completion, TaskError>) {
        let Launch { task, gathered } = launch;

        let outcome = match task.kind {
            TaskKind::PrimaryImage
            | TaskKind::VariantImage
            | TaskKind::CompositeImage
            | TaskKind::Video => self.run_job(run_id, &task, gathered.sources).await,
            TaskKind::Collection => match aggregate::assemble(self.sink, &task, gathered).await {
                Some(sources) => Ok(Completion {
                    artifacts: sources,
                    result: Some(aggregate::collection_handle(&task.id)),
                }),
                None => Err(TaskError::AggregationEmpty),
            },
            TaskKind::Export => self.run_export(&task, gathered.sources).await,
        };

        (task.id, outcome)
    }

    async fn run_job(
        &self,
        run_id: Uuid,
        task: &GenerationTask,
        sources: Vec<String>,
    ) -> Result<Completion, TaskError> {
        let sources = self.resolve_sources(sources).await.map_err(|e| TaskError::Submission {
            status: None,
            message: format!("failed to load source: {:#}", e),
        })?;

        let request = JobRequest::from_task(task, sources);
        let outcome = self.client.run(&request, self.tracker.cancel_flag()).await;

        if outcome.result != Err(TaskError::Cancelled) {
            let record = GenerationRecord::new(
                run_id,
                task.id.as_str(),
                task.kind,
                self.client.endpoint(task.kind),
                &request.prompt,
            )
            .with_timing(outcome.polls, outcome.duration.as_millis() as u64);

            self.recorder.record(match &outcome.result {
                Ok(outputs) => record.with_outputs(outputs.clone()),
                Err(e) => record.with_error(e.to_string()),
            });
        }

        debug!(task = %task.id, polls = outcome.polls, "Job finished");
        outcome.result.map(Completion::outputs)
    }

    async fn resolve_sources(&self, sources: Vec<String>) -> anyhow::Result<Vec<String>> {
        let Some(loader) = self.inline_loader else {
            return Ok(sources);
        };

        try_join_all(sources.into_iter().map(|source| async move {
            if source.starts_with("data:") {
                return Ok::<_, anyhow::Error>(source);
            }
            let bytes = loader.load(&source).await?;
            Ok(to_data_uri(&source, &bytes))
        }))
        .await
    }

    async fn run_export(
        &self,
        task: &GenerationTask,
        sources: Vec<String>,
    ) -> Result<Completion, TaskError> {
        let exporter = self
            .exporter
            .ok_or_else(|| TaskError::ExportFailed("export target not configured".to_string()))?;

        let video = sources
            .into_iter()
            .next()
            .ok_or_else(|| TaskError::ExportFailed("no video to export".to_string()))?;

        let request = ExportRequest {
            task_id: task.id.clone(),
            video,
            clip_name: task.payload.label.clone().unwrap_or_else(|| task.id.clone()),
        };

        debug!(task = %task.id, exporter = exporter.name(), "Exporting clip");
        let location = exporter.export(&request).await?;
        Ok(Completion::outputs(vec![location]))
    }
}

/// Decide whether a pending task can launch given its dependencies
fn readiness(state: &RunState, task: &GenerationTask) -> Readiness {
    let mut done = 0;
    let mut failed = 0;
    let mut cancelled = false;
    let mut waiting = false;

    for dep in task.depends_on.iter().filter_map(|id| state.get(id)) {
        match dep.status {
            TaskStatus::Done => done += 1,
            TaskStatus::Error => {
                failed += 1;
                cancelled |= dep.error == Some(TaskError::Cancelled);
            }
            TaskStatus::Pending | TaskStatus::Running => waiting = true,
        }
    }

    // A dependency that never ran because of cancellation cancels its dependents
    let blocked = || {
        if cancelled {
            Readiness::Blocked(TaskError::Cancelled)
        } else {
            Readiness::Blocked(TaskError::UpstreamDependencyFailed)
        }
    };

    match task.policy {
        DependencyPolicy::RequireAll if failed > 0 => blocked(),
        DependencyPolicy::RequireAll if waiting => Readiness::Waiting,
        DependencyPolicy::RequireAll => Readiness::Ready,
        DependencyPolicy::Partial { .. } if waiting => Readiness::Waiting,
        // Collections enforce their own minimum while assembling
        DependencyPolicy::Partial { .. } if task.kind == TaskKind::Collection => Readiness::Ready,
        DependencyPolicy::Partial { .. } => {
            let required = aggregate::required_sources(task).min(task.depends_on.len());
            if done >= required {
                Readiness::Ready
            } else {
                blocked()
            }
        }
    }
}
