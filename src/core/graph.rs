//! Task graph construction and validation.
//!
//! `GraphBuilder` turns a brief into a dependency graph of generation tasks.
//! Construction is pure: the same brief always yields the same task ids,
//! dependencies and order.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

use crate::domain::{
    Brief, ClipSpec, DependencyPolicy, GenerationTask, ShotSpec, TaskKind, TaskPayload, ViewSpec,
};

/// Errors raised while building or validating a task graph.
///
/// All of these are detected before anything is executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Duplicate task ID: {0}")]
    DuplicateTaskId(String),

    #[error("Dependency not found: task '{task_id}' depends on '{missing_dep}'")]
    DependencyNotFound { task_id: String, missing_dep: String },

    #[error("Circular dependency detected: {0}")]
    CyclicDependency(String),

    #[error("Duplicate entity ID: {0}")]
    DuplicateEntity(String),

    #[error("'{referenced_by}' references unknown entity '{entity}'")]
    UnknownEntity { referenced_by: String, entity: String },

    #[error("Clip '{clip}' references unknown shot '{shot}'")]
    UnknownShot { clip: String, shot: String },

    #[error("Entity '{0}' has no views")]
    EmptyViews(String),

    #[error("Invalid clip '{clip}': {reason}")]
    InvalidClip { clip: String, reason: String },
}

/// Validated dependency graph of generation tasks
#[derive(Debug, Clone)]
pub struct TaskGraph {
    /// Tasks in construction order
    tasks: Vec<GenerationTask>,

    /// task_id -> position in `tasks`
    index: HashMap<String, usize>,

    /// task_id -> tasks that depend on it (in construction order)
    reverse_edges: HashMap<String, Vec<String>>,
}

impl TaskGraph {
    /// Build and validate a graph from an arbitrary task list
    pub fn from_tasks(tasks: Vec<GenerationTask>) -> Result<Self, GraphError> {
        let mut index = HashMap::new();
        let mut reverse_edges: HashMap<String, Vec<String>> = HashMap::new();

        for (pos, task) in tasks.iter().enumerate() {
            if index.insert(task.id.clone(), pos).is_some() {
                return Err(GraphError::DuplicateTaskId(task.id.clone()));
            }

            for dep in &task.depends_on {
                reverse_edges
                    .entry(dep.clone())
                    .or_default()
                    .push(task.id.clone());
            }
        }

        let graph = Self {
            tasks,
            index,
            reverse_edges,
        };
        graph.validate()?;

        Ok(graph)
    }

    fn validate(&self) -> Result<(), GraphError> {
        for task in &self.tasks {
            for dep in &task.depends_on {
                if !self.index.contains_key(dep) {
                    return Err(GraphError::DependencyNotFound {
                        task_id: task.id.clone(),
                        missing_dep: dep.clone(),
                    });
                }
            }
        }

        if let Some(cycle) = self.detect_cycle() {
            return Err(GraphError::CyclicDependency(cycle));
        }

        Ok(())
    }

    /// Detect circular dependencies using DFS, visiting tasks in order so
    /// the reported path is stable
    fn detect_cycle(&self) -> Option<String> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for task in &self.tasks {
            if !visited.contains(task.id.as_str()) && self.dfs_cycle(&task.id, &mut visited, &mut stack)
            {
                return Some(stack.join(" -> "));
            }
        }

        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> bool {
        visited.insert(node);
        stack.push(node);

        if let Some(task) = self.get(node) {
            for dep in &task.depends_on {
                if let Some(pos) = stack.iter().position(|x| *x == dep.as_str()) {
                    stack.push(dep.as_str());
                    *stack = stack[pos..].to_vec();
                    return true;
                }

                if !visited.contains(dep.as_str()) && self.dfs_cycle(dep, visited, stack) {
                    return true;
                }
            }
        }

        stack.pop();
        false
    }

    /// Tasks in construction order
    pub fn tasks(&self) -> &[GenerationTask] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&GenerationTask> {
        self.index.get(id).map(|&pos| &self.tasks[pos])
    }

    /// Direct dependents of a task
    pub fn dependents(&self, id: &str) -> &[String] {
        self.reverse_edges
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Tasks with no dependencies
    pub fn roots(&self) -> impl Iterator<Item = &GenerationTask> {
        self.tasks.iter().filter(|t| t.depends_on.is_empty())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task groups: group name -> member ids, in construction order
    pub fn groups(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for task in &self.tasks {
            if let Some(group) = &task.group {
                groups.entry(group.as_str()).or_default().push(task.id.as_str());
            }
        }
        groups
    }

    /// Number of tasks per kind
    pub fn count_by_kind(&self) -> BTreeMap<TaskKind, usize> {
        let mut counts = BTreeMap::new();
        for task in &self.tasks {
            *counts.entry(task.kind).or_insert(0) += 1;
        }
        counts
    }
}

/// Knobs applied while turning a brief into tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Minimum done sources for a collection to succeed
    pub collection_min_sources: usize,

    /// Policy applied to composite frames
    pub composite_policy: DependencyPolicy,

    /// Emit export tasks for clips that request them
    pub include_exports: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            collection_min_sources: 1,
            composite_policy: DependencyPolicy::RequireAll,
            include_exports: true,
        }
    }
}

/// Deterministic brief -> task graph builder
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    options: BuildOptions,
}

impl GraphBuilder {
    pub fn new(options: BuildOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Build the task graph for a brief
    pub fn build(&self, brief: &Brief) -> Result<TaskGraph, GraphError> {
        self.validate_entities(brief)?;

        let mut tasks = Vec::new();

        for (_, entity) in brief.entities() {
            let mut members = Vec::with_capacity(entity.views.len());

            for (n, view) in entity.views.iter().enumerate() {
                let task = if n == 0 {
                    GenerationTask::new(
                        primary_id(&entity.id),
                        TaskKind::PrimaryImage,
                        view_payload(view, &entity.id),
                    )
                } else {
                    GenerationTask::new(
                        format!("{}/variant-{}", entity.id, n),
                        TaskKind::VariantImage,
                        view_payload(view, &entity.id),
                    )
                    .depends_on(primary_id(&entity.id))
                };
                members.push(task.id.clone());
                tasks.push(task.in_group(entity.id.as_str()));
            }

            if entity.collect {
                tasks.push(self.collection(&entity.id, members));
            }
        }

        for shot in &brief.shots {
            tasks.extend(self.shot_tasks(brief, shot)?);
        }

        for clip in &brief.clips {
            tasks.extend(self.clip_tasks(brief, clip)?);
        }

        TaskGraph::from_tasks(tasks)
    }

    fn validate_entities(&self, brief: &Brief) -> Result<(), GraphError> {
        let mut seen = HashSet::new();
        for (_, entity) in brief.entities() {
            if !seen.insert(entity.id.as_str()) {
                return Err(GraphError::DuplicateEntity(entity.id.clone()));
            }
            if entity.views.is_empty() {
                return Err(GraphError::EmptyViews(entity.id.clone()));
            }
        }
        Ok(())
    }

    fn collection(&self, group: &str, members: Vec<String>) -> GenerationTask {
        GenerationTask::new(
            collection_id(group),
            TaskKind::Collection,
            TaskPayload::labelled(group),
        )
        .depends_on_all(members)
        .with_policy(DependencyPolicy::Partial {
            min_sources: self.options.collection_min_sources.max(1),
        })
        .in_group(group)
    }

    fn shot_tasks(&self, brief: &Brief, shot: &ShotSpec) -> Result<Vec<GenerationTask>, GraphError> {
        for entity in &shot.entities {
            if brief.entity(entity).is_none() {
                return Err(GraphError::UnknownEntity {
                    referenced_by: shot.id.clone(),
                    entity: entity.clone(),
                });
            }
        }

        let primaries: Vec<String> = shot.entities.iter().map(|e| primary_id(e)).collect();
        let frames = [
            (first_frame_id(&shot.id), &shot.first_frame),
            (last_frame_id(&shot.id), &shot.last_frame),
        ];

        let mut tasks = Vec::new();
        let mut members = Vec::new();
        for (id, view) in frames {
            members.push(id.clone());
            tasks.push(
                GenerationTask::new(id, TaskKind::CompositeImage, view_payload(view, &shot.id))
                    .depends_on_all(primaries.iter().cloned())
                    .with_policy(self.options.composite_policy)
                    .in_group(shot.id.as_str()),
            );
        }

        if shot.collect {
            tasks.push(self.collection(&shot.id, members));
        }

        Ok(tasks)
    }

    fn clip_tasks(&self, brief: &Brief, clip: &ClipSpec) -> Result<Vec<GenerationTask>, GraphError> {
        let invalid = |reason: &str| GraphError::InvalidClip {
            clip: clip.id.clone(),
            reason: reason.to_string(),
        };

        let mut deps = Vec::new();

        if clip.source.uses_collections() {
            if clip.entities.is_empty() {
                return Err(invalid("collections source needs at least one entity"));
            }
            for id in &clip.entities {
                let entity = brief.entity(id).ok_or_else(|| GraphError::UnknownEntity {
                    referenced_by: clip.id.clone(),
                    entity: id.clone(),
                })?;
                if !entity.collect {
                    return Err(invalid(&format!("entity '{}' has no collection", id)));
                }
                deps.push(collection_id(id));
            }
        } else if !clip.entities.is_empty() {
            return Err(invalid("entities are only used with a collections source"));
        }

        if clip.source.uses_frames() {
            let shot_id = clip
                .shot
                .as_deref()
                .ok_or_else(|| invalid("frames source needs a shot"))?;
            if brief.shot(shot_id).is_none() {
                return Err(GraphError::UnknownShot {
                    clip: clip.id.clone(),
                    shot: shot_id.to_string(),
                });
            }
            deps.push(first_frame_id(shot_id));
            deps.push(last_frame_id(shot_id));
        } else if clip.shot.is_some() {
            return Err(invalid("shot is only used with a frames source"));
        }

        let payload = TaskPayload {
            prompt: Some(clip.prompt.clone()),
            aspect_ratio: clip.aspect_ratio.clone(),
            duration_secs: clip.duration_secs,
            seed: clip.seed,
            label: Some(clip.id.clone()),
            ..Default::default()
        };

        let video_id = format!("{}/video", clip.id);
        let mut tasks = vec![GenerationTask::new(video_id.clone(), TaskKind::Video, payload)
            .depends_on_all(deps)
            .in_group(clip.id.as_str())];

        if clip.export && self.options.include_exports {
            tasks.push(
                GenerationTask::new(
                    format!("{}/export", clip.id),
                    TaskKind::Export,
                    TaskPayload::labelled(clip.id.as_str()),
                )
                .depends_on(video_id)
                .in_group(clip.id.as_str()),
            );
        }

        Ok(tasks)
    }
}

fn view_payload(view: &ViewSpec, label: &str) -> TaskPayload {
    TaskPayload {
        prompt: Some(view.prompt.clone()),
        aspect_ratio: view.aspect_ratio.clone(),
        seed: view.seed,
        guidance_scale: view.guidance_scale,
        label: Some(label.to_string()),
        ..Default::default()
    }
}

fn primary_id(entity: &str) -> String {
    format!("{}/primary", entity)
}

fn collection_id(group: &str) -> String {
    format!("{}/collection", group)
}

fn first_frame_id(shot: &str) -> String {
    format!("{}/first-frame", shot)
}

fn last_frame_id(shot: &str) -> String {
    format!("{}/last-frame", shot)
}
