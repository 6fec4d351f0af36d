//! Aggregation: gathering upstream outputs into collections.

use tracing::{debug, warn};

use crate::adapters::CollectionSink;
use crate::domain::{DependencyPolicy, GenerationTask, RunState, TaskStatus};

/// Outputs gathered from a task's dependencies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gathered {
    /// The `result` of each `done` job dependency, or every member of a
    /// `done` collection, in `depends_on` order
    pub sources: Vec<String>,

    /// Dependencies that finished `done`
    pub done: usize,

    /// Dependencies that finished in `error`
    pub failed: usize,
}

/// Collect the results of every `done` dependency, skipping failures
pub fn gather(state: &RunState, task: &GenerationTask) -> Gathered {
    let mut gathered = Gathered::default();

    for dep in task.depends_on.iter().filter_map(|id| state.get(id)) {
        match dep.status {
            TaskStatus::Done => {
                gathered.done += 1;
                gathered.sources.extend(dep.outputs());
            }
            TaskStatus::Error => gathered.failed += 1,
            TaskStatus::Pending | TaskStatus::Running => {}
        }
    }

    gathered
}

/// Minimum done dependencies a task needs
pub fn required_sources(task: &GenerationTask) -> usize {
    match task.policy {
        DependencyPolicy::Partial { min_sources } => min_sources.max(1),
        DependencyPolicy::RequireAll => task.depends_on.len().max(1),
    }
}

/// Result handle of an assembled collection
pub fn collection_handle(task_id: &str) -> String {
    format!("collection://{}", task_id)
}

/// Assemble a collection from its gathered sources.
///
/// Returns the collected references, or `None` when too few dependencies
/// succeeded. The sink is only informed about collections that assemble;
/// a refusal from the sink is logged and does not fail the collection.
pub async fn assemble(
    sink: &dyn CollectionSink,
    task: &GenerationTask,
    gathered: Gathered,
) -> Option<Vec<String>> {
    let required = required_sources(task);
    if gathered.done < required || gathered.sources.is_empty() {
        warn!(
            collection = %task.id,
            done = gathered.done,
            failed = gathered.failed,
            required,
            "Not enough sources for collection"
        );
        return None;
    }

    if gathered.failed > 0 {
        debug!(
            collection = %task.id,
            done = gathered.done,
            failed = gathered.failed,
            "Assembling partial collection"
        );
    }

    if !sink.populate_collection(&task.id, &gathered.sources).await {
        warn!(collection = %task.id, "Collection sink refused collection");
    }

    Some(gathered.sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskError, TaskKind, TaskPayload};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        accept: bool,
    }

    #[async_trait]
    impl CollectionSink for RecordingSink {
        async fn populate_collection(&self, collection_id: &str, sources: &[String]) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push((collection_id.to_string(), sources.to_vec()));
            self.accept
        }
    }

    fn collection_state(outcomes: &[bool]) -> RunState {
        let mut tasks = Vec::new();
        let mut ids = Vec::new();
        for (n, _) in outcomes.iter().enumerate() {
            let id = format!("a/view-{}", n);
            ids.push(id.clone());
            tasks.push(GenerationTask::new(id, TaskKind::VariantImage, TaskPayload::default()));
        }
        tasks.push(
            GenerationTask::new("a/collection", TaskKind::Collection, TaskPayload::labelled("a"))
                .depends_on_all(ids.clone())
                .with_policy(DependencyPolicy::Partial { min_sources: 1 }),
        );

        let mut state = RunState::new(Uuid::new_v4(), "test", tasks);
        for (id, ok) in ids.iter().zip(outcomes) {
            if *ok {
                state.mark_done(id, vec![format!("https://cdn/{}.png", id)], None);
            } else {
                state.mark_error(id, TaskError::RemoteFailure("nope".to_string()));
            }
        }
        state
    }

    #[tokio::test]
    async fn test_partial_collection() {
        let state = collection_state(&[true, false, true, true]);
        let task = state.get("a/collection").unwrap().clone();

        let gathered = gather(&state, &task);
        assert_eq!(gathered.done, 3);
        assert_eq!(gathered.failed, 1);

        let sink = RecordingSink::default();
        let sources = assemble(&sink, &task, gathered).await.unwrap();
        assert_eq!(
            sources,
            vec![
                "https://cdn/a/view-0.png",
                "https://cdn/a/view-2.png",
                "https://cdn/a/view-3.png"
            ]
        );

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "a/collection");
    }

    #[test]
    fn test_gather_takes_one_result_per_job() {
        let mut state = collection_state(&[true, true]);
        state.mark_done(
            "a/view-0",
            vec![
                "https://cdn/a/view-0.png".to_string(),
                "https://cdn/a/view-0-alt.png".to_string(),
            ],
            None,
        );
        let task = state.get("a/collection").unwrap().clone();

        let gathered = gather(&state, &task);
        assert_eq!(gathered.done, 2);
        assert_eq!(
            gathered.sources,
            vec!["https://cdn/a/view-0.png", "https://cdn/a/view-1.png"]
        );
    }

    #[test]
    fn test_gather_passes_collection_members_through() {
        let mut state = collection_state(&[true, true]);
        let video = GenerationTask::new("clip/video", TaskKind::Video, TaskPayload::default())
            .depends_on("a/collection");
        let members = vec![
            "https://cdn/a/view-0.png".to_string(),
            "https://cdn/a/view-1.png".to_string(),
        ];
        state.mark_done(
            "a/collection",
            members.clone(),
            Some(collection_handle("a/collection")),
        );

        assert_eq!(gather(&state, &video).sources, members);
    }

    #[tokio::test]
    async fn test_empty_collection_fails_without_sink_call() {
        let state = collection_state(&[false, false, false, false]);
        let task = state.get("a/collection").unwrap().clone();

        let sink = RecordingSink::default();
        assert!(assemble(&sink, &task, gather(&state, &task)).await.is_none());
        assert!(sink.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_minimum_sources() {
        let state = collection_state(&[true, false, false, true]);
        let mut task = state.get("a/collection").unwrap().clone();
        task.policy = DependencyPolicy::Partial { min_sources: 3 };

        let sink = RecordingSink::default();
        assert!(assemble(&sink, &task, gather(&state, &task)).await.is_none());
    }

    #[test]
    fn test_required_sources() {
        let task = GenerationTask::new("v", TaskKind::Video, TaskPayload::default())
            .depends_on_all(["a", "b"]);
        assert_eq!(required_sources(&task), 2);
        assert_eq!(
            required_sources(&task.with_policy(DependencyPolicy::Partial { min_sources: 0 })),
            1
        );
        assert_eq!(collection_handle("a/collection"), "collection://a/collection");
    }
}
