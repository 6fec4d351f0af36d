//! Run state for one orchestration invocation.
//!
//! A `RunState` is owned by exactly one invocation. Observers only ever see
//! cloned snapshots of it (`ProgressSnapshot`, `RunReport`).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use super::summary::RunSummary;
use super::task::{GenerationTask, Phase, TaskError, TaskStatus};

/// Mutable state of an in-progress run
#[derive(Debug, Clone)]
pub struct RunState {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Name of the brief being executed
    pub brief_name: String,

    /// task id -> task
    tasks: HashMap<String, GenerationTask>,

    /// Task ids in graph order (for stable reporting)
    order: Vec<String>,

    /// Tasks currently running (observability only)
    pub active_count: usize,

    /// Set once cancellation has been observed; never cleared
    pub cancelled: bool,

    /// Wall-clock start
    pub started_at: DateTime<Utc>,

    started: Instant,
}

impl RunState {
    /// Create run state from tasks in graph order
    pub fn new(id: Uuid, brief_name: impl Into<String>, tasks: Vec<GenerationTask>) -> Self {
        let order = tasks.iter().map(|t| t.id.clone()).collect();
        let tasks = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();

        Self {
            id,
            brief_name: brief_name.into(),
            tasks,
            order,
            active_count: 0,
            cancelled: false,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&GenerationTask> {
        self.tasks.get(id)
    }

    /// Tasks in graph order
    pub fn tasks(&self) -> impl Iterator<Item = &GenerationTask> {
        self.order.iter().filter_map(move |id| self.tasks.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of terminal tasks
    pub fn completed(&self) -> usize {
        self.tasks.values().filter(|t| t.is_terminal()).count()
    }

    /// Whether every task is terminal
    pub fn is_finished(&self) -> bool {
        self.tasks.values().all(|t| t.is_terminal())
    }

    /// Lowest phase that still has unfinished tasks
    pub fn phase(&self) -> Phase {
        self.tasks
            .values()
            .filter(|t| !t.is_terminal())
            .map(|t| t.kind.phase())
            .min()
            .unwrap_or(Phase::Finished)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Current progress snapshot
    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.completed(),
            total: self.len(),
            phase: self.phase(),
            active_count: self.active_count,
        }
    }

    /// Transition a pending task to running
    pub fn mark_running(&mut self, id: &str) -> bool {
        match self.tasks.get_mut(id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Running;
                self.active_count += 1;
                true
            }
            _ => false,
        }
    }

    /// Record a successful outcome
    pub fn mark_done(&mut self, id: &str, artifacts: Vec<String>, result: Option<String>) {
        if let Some(task) = self.tasks.get_mut(id) {
            if task.status == TaskStatus::Running {
                self.active_count = self.active_count.saturating_sub(1);
            }
            task.status = TaskStatus::Done;
            task.result = result.or_else(|| artifacts.first().cloned());
            task.artifacts = artifacts;
            task.error = None;
        }
    }

    /// Record a failure (own, propagated or cancelled)
    pub fn mark_error(&mut self, id: &str, error: TaskError) {
        if let Some(task) = self.tasks.get_mut(id) {
            if task.status == TaskStatus::Running {
                self.active_count = self.active_count.saturating_sub(1);
            }
            task.status = TaskStatus::Error;
            task.error = Some(error);
        }
    }

    /// Consume the state into a serializable report
    pub fn into_report(self, summary: RunSummary) -> RunReport {
        let tasks = self
            .order
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect();

        RunReport {
            run_id: self.id,
            brief_name: self.brief_name,
            started_at: self.started_at,
            completed_at: Utc::now(),
            cancelled: self.cancelled,
            tasks,
            summary,
        }
    }
}

/// Read-only progress view pushed to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Terminal tasks
    pub completed: usize,

    pub total: usize,

    pub phase: Phase,

    /// Tasks currently running
    pub active_count: usize,
}

impl ProgressSnapshot {
    pub fn empty(total: usize) -> Self {
        Self {
            completed: 0,
            total,
            phase: if total == 0 { Phase::Finished } else { Phase::Primary },
            active_count: 0,
        }
    }
}

/// Final, serializable outcome of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub brief_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub cancelled: bool,
    pub tasks: Vec<GenerationTask>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn task(&self, id: &str) -> Option<&GenerationTask> {
        self.tasks.iter().find(|t| t.id == id)
    }
}
