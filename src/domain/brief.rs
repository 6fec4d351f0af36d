//! Creative brief: the declarative entity definitions a run is built from.
//!
//! Briefs are written in YAML. They list characters and backgrounds
//! (each with an ordered list of views), composite shots referencing those
//! entities, and video clips fed by collections and/or shot frames.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A complete brief
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Brief {
    /// Brief name (used in logs and reports)
    pub name: String,

    #[serde(default)]
    pub characters: Vec<EntitySpec>,

    #[serde(default)]
    pub backgrounds: Vec<EntitySpec>,

    #[serde(default)]
    pub shots: Vec<ShotSpec>,

    #[serde(default)]
    pub clips: Vec<ClipSpec>,
}

impl Brief {
    /// Load a brief from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read brief file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a brief from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse brief YAML")
    }

    /// All image-producing entities, characters first, in declaration order
    pub fn entities(&self) -> impl Iterator<Item = (EntityKind, &EntitySpec)> {
        self.characters
            .iter()
            .map(|e| (EntityKind::Character, e))
            .chain(self.backgrounds.iter().map(|e| (EntityKind::Background, e)))
    }

    /// Find an entity by id
    pub fn entity(&self, id: &str) -> Option<&EntitySpec> {
        self.entities().map(|(_, e)| e).find(|e| e.id == id)
    }

    /// Find a shot by id
    pub fn shot(&self, id: &str) -> Option<&ShotSpec> {
        self.shots.iter().find(|s| s.id == id)
    }
}

/// Entity category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Character,
    Background,
}

/// A character or background with its ordered views
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySpec {
    /// Unique id across characters and backgrounds
    pub id: String,

    /// Ordered views; the first establishes the primary image
    pub views: Vec<ViewSpec>,

    /// Gather every view of this entity into a collection
    #[serde(default = "default_true")]
    pub collect: bool,
}

/// One image prompt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewSpec {
    pub prompt: String,

    #[serde(default)]
    pub aspect_ratio: Option<String>,

    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub guidance_scale: Option<f32>,
}

/// A composite shot: two frames combining several entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShotSpec {
    pub id: String,

    /// Entities whose primaries feed both frames
    pub entities: Vec<String>,

    pub first_frame: ViewSpec,

    pub last_frame: ViewSpec,

    /// Gather both frames into a collection
    #[serde(default)]
    pub collect: bool,
}

/// A video clip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipSpec {
    pub id: String,

    pub prompt: String,

    #[serde(default)]
    pub duration_secs: Option<u32>,

    #[serde(default)]
    pub aspect_ratio: Option<String>,

    #[serde(default)]
    pub seed: Option<u64>,

    /// Which upstream artifacts feed the clip
    #[serde(default)]
    pub source: ClipSource,

    /// Entities whose collections feed the clip (collections/both modes)
    #[serde(default)]
    pub entities: Vec<String>,

    /// Shot whose frames feed the clip (frames/both modes)
    #[serde(default)]
    pub shot: Option<String>,

    /// Hand the finished clip to the editing application
    #[serde(default)]
    pub export: bool,
}

/// Where a clip takes its source images from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipSource {
    /// Entity collections
    Collections,

    /// First/last composite frames of a shot
    Frames,

    /// Both of the above
    Both,
}

impl Default for ClipSource {
    fn default() -> Self {
        Self::Collections
    }
}

impl ClipSource {
    pub fn uses_collections(self) -> bool {
        matches!(self, Self::Collections | Self::Both)
    }

    pub fn uses_frames(self) -> bool {
        matches!(self, Self::Frames | Self::Both)
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BRIEF_YAML: &str = r#"
name: forest chase
characters:
  - id: alice
    views:
      - prompt: portrait of alice
        aspect_ratio: "3:4"
      - prompt: alice running
backgrounds:
  - id: forest
    collect: false
    views:
      - prompt: misty forest
shots:
  - id: s1
    entities: [alice, forest]
    first_frame:
      prompt: alice enters the forest
    last_frame:
      prompt: alice disappears in the mist
clips:
  - id: c1
    prompt: slow dolly forward
    duration_secs: 5
    source: both
    entities: [alice]
    shot: s1
    export: true
"#;

    #[test]
    fn test_brief_parsing() {
        let brief = Brief::from_yaml(TEST_BRIEF_YAML).unwrap();

        assert_eq!(brief.name, "forest chase");
        assert_eq!(brief.characters.len(), 1);
        assert_eq!(brief.characters[0].views.len(), 2);
        assert_eq!(brief.characters[0].views[0].aspect_ratio.as_deref(), Some("3:4"));
        assert!(brief.characters[0].collect);
        assert!(!brief.backgrounds[0].collect);
        assert!(!brief.shots[0].collect);
        assert_eq!(brief.clips[0].source, ClipSource::Both);
        assert!(brief.clips[0].export);
    }

    #[test]
    fn test_entity_lookup() {
        let brief = Brief::from_yaml(TEST_BRIEF_YAML).unwrap();

        assert!(brief.entity("forest").is_some());
        assert!(brief.entity("bob").is_none());
        assert!(brief.shot("s1").is_some());

        let kinds: Vec<EntityKind> = brief.entities().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![EntityKind::Character, EntityKind::Background]);
    }

    #[test]
    fn test_clip_source_defaults_to_collections() {
        let yaml = r#"
name: minimal
clips:
  - id: c1
    prompt: hold
    entities: [alice]
"#;
        let brief = Brief::from_yaml(yaml).unwrap();
        assert_eq!(brief.clips[0].source, ClipSource::Collections);
        assert!(brief.clips[0].source.uses_collections());
        assert!(!brief.clips[0].source.uses_frames());
    }
}
