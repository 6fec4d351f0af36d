//! Integration tests for building task graphs from brief files.

use std::io::Write;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use shotgraph::core::{BuildOptions, GraphBuilder, GraphError};
use shotgraph::domain::{Brief, DependencyPolicy, GenerationTask, TaskKind, TaskStatus};

const BRIEF: &str = r#"
name: rooftop
characters:
  - id: bo
    views:
      - prompt: bo portrait
        aspect_ratio: "3:4"
        seed: 7
      - prompt: bo crouching
  - id: kai
    collect: false
    views:
      - prompt: kai portrait
backgrounds:
  - id: roof
    views:
      - prompt: rooftop at night
shots:
  - id: s1
    entities: [bo, kai, roof]
    collect: true
    first_frame:
      prompt: bo and kai face off
    last_frame:
      prompt: kai jumps away
clips:
  - id: chase
    prompt: kai leaps across the rooftops
    source: both
    entities: [bo, roof]
    shot: s1
    export: true
"#;

fn brief_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(BRIEF.as_bytes()).unwrap();
    file
}

fn ids(tasks: &[GenerationTask]) -> Vec<&str> {
    tasks.iter().map(|t| t.id.as_str()).collect()
}

#[test]
fn test_graph_from_brief_file() {
    let file = brief_file();
    let brief = Brief::from_file(file.path()).unwrap();
    let graph = GraphBuilder::default().build(&brief).unwrap();

    assert_eq!(
        ids(graph.tasks()),
        vec![
            "bo/primary",
            "bo/variant-1",
            "bo/collection",
            "kai/primary",
            "roof/primary",
            "roof/collection",
            "s1/first-frame",
            "s1/last-frame",
            "s1/collection",
            "chase/video",
            "chase/export",
        ]
    );
    assert!(graph.tasks().iter().all(|t| t.status == TaskStatus::Pending));

    let first_frame = graph.get("s1/first-frame").unwrap();
    assert_eq!(first_frame.kind, TaskKind::CompositeImage);
    assert_eq!(
        first_frame.depends_on,
        vec!["bo/primary", "kai/primary", "roof/primary"]
    );
    assert_eq!(first_frame.policy, DependencyPolicy::RequireAll);

    let video = graph.get("chase/video").unwrap();
    assert_eq!(
        video.depends_on,
        vec![
            "bo/collection",
            "roof/collection",
            "s1/first-frame",
            "s1/last-frame"
        ]
    );
    assert_eq!(video.payload.label.as_deref(), Some("chase"));

    let primary = graph.get("bo/primary").unwrap();
    assert_eq!(primary.payload.aspect_ratio.as_deref(), Some("3:4"));
    assert_eq!(primary.payload.seed, Some(7));

    assert_eq!(graph.dependents("bo/primary").len(), 4);
    assert_eq!(
        graph.roots().map(|t| t.id.as_str()).collect::<Vec<_>>(),
        vec!["bo/primary", "kai/primary", "roof/primary"]
    );
}

#[test]
fn test_build_is_deterministic() {
    let brief = Brief::from_yaml(BRIEF).unwrap();
    let builder = GraphBuilder::default();

    let first = builder.build(&brief).unwrap();
    for _ in 0..5 {
        let again = builder.build(&brief).unwrap();
        assert_eq!(again.tasks(), first.tasks());
    }
}

#[test]
fn test_options_shape_the_graph() {
    let brief = Brief::from_yaml(BRIEF).unwrap();
    let builder = GraphBuilder::new(BuildOptions {
        collection_min_sources: 2,
        composite_policy: DependencyPolicy::Partial { min_sources: 2 },
        include_exports: false,
    });

    let graph = builder.build(&brief).unwrap();
    assert!(graph.get("chase/export").is_none());
    assert_eq!(
        graph.get("s1/last-frame").unwrap().policy,
        DependencyPolicy::Partial { min_sources: 2 }
    );
    assert_eq!(
        graph.get("bo/collection").unwrap().policy,
        DependencyPolicy::Partial { min_sources: 2 }
    );
    assert_eq!(graph.count_by_kind().get(&TaskKind::Export), None);
}

#[test]
fn test_invalid_briefs_fail_before_execution() {
    let mut brief = Brief::from_yaml(BRIEF).unwrap();
    brief.clips[0].entities.push("kai".to_string());
    assert_eq!(
        GraphBuilder::default().build(&brief).unwrap_err(),
        GraphError::InvalidClip {
            clip: "chase".to_string(),
            reason: "entity 'kai' has no collection".to_string(),
        }
    );

    let mut brief = Brief::from_yaml(BRIEF).unwrap();
    brief.clips[0].shot = Some("s9".to_string());
    assert_eq!(
        GraphBuilder::default().build(&brief).unwrap_err(),
        GraphError::UnknownShot {
            clip: "chase".to_string(),
            shot: "s9".to_string(),
        }
    );

    let mut brief = Brief::from_yaml(BRIEF).unwrap();
    brief.shots[0].entities.push("ghost".to_string());
    let err = GraphBuilder::default().build(&brief).unwrap_err();
    assert_eq!(err.to_string(), "'s1' references unknown entity 'ghost'");
}

#[test]
fn test_plan_json_round_trip() {
    let brief = Brief::from_yaml(BRIEF).unwrap();
    let graph = GraphBuilder::default().build(&brief).unwrap();

    let json = serde_json::to_string_pretty(graph.tasks()).unwrap();
    let tasks: Vec<GenerationTask> = serde_json::from_str(&json).unwrap();
    assert_eq!(tasks.as_slice(), graph.tasks());
}
