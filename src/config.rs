//! Configuration for shotgraph.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SHOTGRAPH_HOME, SHOTGRAPH_BASE_URL)
//! 2. Config file (.shotgraph/config.yaml)
//! 3. Defaults (~/.shotgraph)
//!
//! Config file discovery:
//! - Searches current directory and parents for .shotgraph/config.yaml
//! - Paths in config file are relative to the .shotgraph/ directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::{default_endpoints, EndpointConfig, PollPolicy};
use crate::core::BuildOptions;
use crate::domain::{DependencyPolicy, TaskKind};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_API_KEY_ENV: &str = "SHOTGRAPH_API_KEY";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub polling: Option<PollingConfig>,
    #[serde(default)]
    pub aggregation: Option<AggregationConfig>,
    #[serde(default)]
    pub composite: Option<CompositeConfig>,
    #[serde(default)]
    pub export: Option<ExportConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .shotgraph/)
    pub home: Option<String>,
    /// Where exported clips are downloaded (relative to .shotgraph/)
    pub exports: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteConfig {
    pub base_url: Option<String>,
    /// Environment variable holding the bearer token
    pub api_key_env: Option<String>,
    pub request_timeout_seconds: Option<u64>,
    /// Send sources as base64 data URIs instead of references
    pub inline_sources: Option<bool>,
    /// Per-kind endpoint overrides
    #[serde(default)]
    pub endpoints: HashMap<TaskKind, EndpointConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollingConfig {
    pub image: Option<PollPolicy>,
    pub video: Option<PollPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregationConfig {
    pub min_sources: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompositeConfig {
    pub allow_partial: Option<bool>,
    pub min_sources: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportConfig {
    pub enabled: Option<bool>,
    pub python: Option<String>,
    /// Path to the DaVinci Resolve bridge script (relative to .shotgraph/)
    pub bridge_script: Option<String>,
    pub target_folder: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to shotgraph home (engine state)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub remote: RemoteSettings,
    pub polling: PollingSettings,
    /// Minimum done sources for a collection
    pub collection_min_sources: usize,
    pub composite: CompositeSettings,
    pub export: ExportSettings,
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: String,
    pub api_key_env: String,
    pub request_timeout: Duration,
    pub inline_sources: bool,
    pub endpoints: HashMap<TaskKind, EndpointConfig>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            request_timeout: Duration::from_secs(60),
            inline_sources: false,
            endpoints: default_endpoints(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingSettings {
    pub image: PollPolicy,
    pub video: PollPolicy,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            image: PollPolicy::image(),
            video: PollPolicy::video(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeSettings {
    pub allow_partial: bool,
    pub min_sources: usize,
}

impl Default for CompositeSettings {
    fn default() -> Self {
        Self {
            allow_partial: false,
            min_sources: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub enabled: bool,
    pub python: String,
    pub bridge_script: Option<PathBuf>,
    pub target_folder: Option<String>,
    pub output_dir: PathBuf,
    pub timeout: Duration,
}

impl ExportSettings {
    fn defaults(home: &Path) -> Self {
        Self {
            enabled: false,
            python: "python3".to_string(),
            bridge_script: None,
            target_folder: None,
            output_dir: home.join("exports"),
            timeout: Duration::from_secs(120),
        }
    }
}

impl ResolvedConfig {
    /// Defaults rooted at `home`
    pub fn with_home(home: PathBuf) -> Self {
        Self {
            export: ExportSettings::defaults(&home),
            home,
            config_file: None,
            remote: RemoteSettings::default(),
            polling: PollingSettings::default(),
            collection_min_sources: 1,
            composite: CompositeSettings::default(),
        }
    }

    /// Get the runs directory ($SHOTGRAPH_HOME/runs)
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    /// Get the generation log path ($SHOTGRAPH_HOME/generations.jsonl)
    pub fn generation_log(&self) -> PathBuf {
        self.home.join("generations.jsonl")
    }

    /// Bearer token from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.remote.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }

    /// Graph construction options derived from this configuration
    pub fn build_options(&self) -> BuildOptions {
        let composite_policy = if self.composite.allow_partial {
            DependencyPolicy::Partial {
                min_sources: self.composite.min_sources.max(1),
            }
        } else {
            DependencyPolicy::RequireAll
        };

        BuildOptions {
            collection_min_sources: self.collection_min_sources.max(1),
            composite_policy,
            include_exports: self.export.enabled,
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".shotgraph").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed config file over the defaults.
///
/// `config_dir` is the `.shotgraph/` directory relative paths resolve against.
fn resolve_config(file: ConfigFile, config_dir: &Path, default_home: PathBuf) -> ResolvedConfig {
    let home = file
        .paths
        .home
        .as_deref()
        .map(|p| resolve_path(config_dir, p))
        .unwrap_or(default_home);

    let mut resolved = ResolvedConfig::with_home(home);

    if let Some(exports) = &file.paths.exports {
        resolved.export.output_dir = resolve_path(config_dir, exports);
    }

    if let Some(remote) = file.remote {
        if let Some(base_url) = remote.base_url {
            resolved.remote.base_url = base_url;
        }
        if let Some(env) = remote.api_key_env {
            resolved.remote.api_key_env = env;
        }
        if let Some(secs) = remote.request_timeout_seconds {
            resolved.remote.request_timeout = Duration::from_secs(secs);
        }
        if let Some(inline) = remote.inline_sources {
            resolved.remote.inline_sources = inline;
        }
        resolved.remote.endpoints.extend(remote.endpoints);
    }

    if let Some(polling) = file.polling {
        if let Some(image) = polling.image {
            resolved.polling.image = image;
        }
        if let Some(video) = polling.video {
            resolved.polling.video = video;
        }
    }

    if let Some(min) = file.aggregation.and_then(|a| a.min_sources) {
        resolved.collection_min_sources = min;
    }

    if let Some(composite) = file.composite {
        resolved.composite.allow_partial = composite.allow_partial.unwrap_or(false);
        if let Some(min) = composite.min_sources {
            resolved.composite.min_sources = min;
        }
    }

    if let Some(export) = file.export {
        // A configured bridge script enables export unless explicitly disabled
        resolved.export.enabled = export.enabled.unwrap_or(export.bridge_script.is_some());
        if let Some(python) = export.python {
            resolved.export.python = python;
        }
        resolved.export.bridge_script = export
            .bridge_script
            .as_deref()
            .map(|p| resolve_path(config_dir, p));
        resolved.export.target_folder = export.target_folder;
        if let Some(secs) = export.timeout_seconds {
            resolved.export.timeout = Duration::from_secs(secs);
        }
    }

    resolved
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    // Default home directory
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".shotgraph");

    let config_file = find_config_file();

    let mut config = if let Some(ref config_path) = config_file {
        let file = load_config_file(config_path)?;
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        let mut config = resolve_config(file, config_dir, default_home);
        config.config_file = Some(config_path.clone());
        config
    } else {
        ResolvedConfig::with_home(default_home)
    };

    if let Ok(env_home) = std::env::var("SHOTGRAPH_HOME") {
        let home = PathBuf::from(env_home);
        if config.export.output_dir == config.home.join("exports") {
            config.export.output_dir = home.join("exports");
        }
        config.home = home;
    }
    if let Ok(base_url) = std::env::var("SHOTGRAPH_BASE_URL") {
        config.remote.base_url = base_url;
    }

    Ok(config)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::JobParam;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ResolvedConfig::with_home(PathBuf::from("/test/.shotgraph"));

        assert_eq!(config.runs_dir(), PathBuf::from("/test/.shotgraph/runs"));
        assert_eq!(config.export.output_dir, PathBuf::from("/test/.shotgraph/exports"));
        assert_eq!(config.polling.image.max_attempts, 60);
        assert_eq!(config.polling.video.max_attempts, 90);
        assert_eq!(config.remote.endpoints.len(), 4);

        let options = config.build_options();
        assert_eq!(options.collection_min_sources, 1);
        assert_eq!(options.composite_policy, DependencyPolicy::RequireAll);
        assert!(!options.include_exports);
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(".shotgraph");
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./state
remote:
  base_url: https://gen.example.com
  inline_sources: true
  endpoints:
    video:
      path: /v2/video
      supports: [duration, source_images]
polling:
  video:
    interval_ms: 5000
    max_attempts: 40
aggregation:
  min_sources: 2
composite:
  allow_partial: true
export:
  bridge_script: ./davinci-resolve-bridge.py
  target_folder: shotgraph
"#
        )
        .unwrap();

        let file = load_config_file(&config_path).unwrap();
        assert_eq!(file.version.as_deref(), Some("1.0"));

        let config = resolve_config(file, &config_dir, PathBuf::from("/unused"));
        assert_eq!(config.home, config_dir.join("state"));
        assert_eq!(config.remote.base_url, "https://gen.example.com");
        assert!(config.remote.inline_sources);
        assert_eq!(
            config.remote.endpoints[&TaskKind::Video],
            EndpointConfig::new("/v2/video", &[JobParam::Duration, JobParam::SourceImages])
        );
        assert!(config.remote.endpoints.contains_key(&TaskKind::PrimaryImage));
        assert_eq!(
            config.polling.video,
            PollPolicy {
                interval_ms: 5000,
                max_attempts: 40
            }
        );
        assert_eq!(config.polling.image, PollPolicy::image());

        let options = config.build_options();
        assert_eq!(options.collection_min_sources, 2);
        assert_eq!(
            options.composite_policy,
            DependencyPolicy::Partial { min_sources: 1 }
        );
        assert!(options.include_exports);
        assert_eq!(
            config.export.bridge_script,
            Some(config_dir.join("davinci-resolve-bridge.py"))
        );
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
