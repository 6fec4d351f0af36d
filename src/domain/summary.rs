//! Aggregate counters reduced from a terminal task set.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::task::{GenerationTask, TaskError, TaskKind, TaskStatus};

/// Terminal report counters for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub images_done: usize,
    pub images_failed: usize,
    pub videos_done: usize,
    pub videos_failed: usize,
    pub collections_done: usize,
    pub collections_failed: usize,
    pub exported: usize,
    pub export_failed: usize,

    /// Tasks never launched because the run was cancelled
    pub cancelled: usize,

    pub elapsed_ms: u64,
}

impl RunSummary {
    /// Reduce a task set into counters.
    ///
    /// Non-terminal tasks are ignored; cancelled tasks only count under
    /// `cancelled`.
    pub fn from_tasks<'a, I>(tasks: I, elapsed: Duration) -> Self
    where
        I: IntoIterator<Item = &'a GenerationTask>,
    {
        let mut summary = Self {
            elapsed_ms: elapsed.as_millis() as u64,
            ..Default::default()
        };

        for task in tasks {
            let done = match task.status {
                TaskStatus::Done => true,
                TaskStatus::Error if task.error == Some(TaskError::Cancelled) => {
                    summary.cancelled += 1;
                    continue;
                }
                TaskStatus::Error => false,
                TaskStatus::Pending | TaskStatus::Running => continue,
            };

            let (ok, failed) = match task.kind {
                k if k.is_image() => (&mut summary.images_done, &mut summary.images_failed),
                TaskKind::Video => (&mut summary.videos_done, &mut summary.videos_failed),
                TaskKind::Collection => {
                    (&mut summary.collections_done, &mut summary.collections_failed)
                }
                _ => (&mut summary.exported, &mut summary.export_failed),
            };

            if done {
                *ok += 1;
            } else {
                *failed += 1;
            }
        }

        summary
    }

    pub fn failed(&self) -> usize {
        self.images_failed + self.videos_failed + self.collections_failed + self.export_failed
    }

    /// Whether every task succeeded
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.cancelled == 0
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "images {}/{} ok, videos {}/{} ok, collections {}/{} ok, exported {}",
            self.images_done,
            self.images_done + self.images_failed,
            self.videos_done,
            self.videos_done + self.videos_failed,
            self.collections_done,
            self.collections_done + self.collections_failed,
            self.exported,
        )?;
        if self.cancelled > 0 {
            write!(f, ", cancelled {}", self.cancelled)?;
        }
        write!(f, " in {}ms", self.elapsed_ms)
    }
}
