//! DaVinci Resolve export adapter.
//!
//! Finished clips are downloaded next to the run, then imported into the
//! Resolve media pool through the Python scripting bridge:
//!
//! ```text
//! <python> <bridge script> import <file> <target folder> <clip name> <metadata json>
//! ```
//!
//! The bridge prints a single JSON object `{"success": bool, "error": ...}`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use super::{ArtifactLoader, ExportRequest, Exporter};
use crate::domain::TaskError;

/// Reply printed by the bridge script
#[derive(Debug, Deserialize)]
struct BridgeReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Exporter driving the Resolve scripting bridge
pub struct ResolveExporter {
    /// Python interpreter (default: "python3")
    python: String,

    /// Path to the bridge script
    script: PathBuf,

    /// Media pool folder clips are imported into
    target_folder: Option<String>,

    /// Where downloaded clips are written
    output_dir: PathBuf,

    bridge_timeout: Duration,

    loader: Arc<dyn ArtifactLoader>,
}

impl ResolveExporter {
    pub fn new(
        script: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        loader: Arc<dyn ArtifactLoader>,
    ) -> Self {
        Self {
            python: "python3".to_string(),
            script: script.into(),
            target_folder: None,
            output_dir: output_dir.into(),
            bridge_timeout: Duration::from_secs(120),
            loader,
        }
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn with_target_folder(mut self, folder: Option<String>) -> Self {
        self.target_folder = folder;
        self
    }

    pub fn with_timeout(mut self, bridge_timeout: Duration) -> Self {
        self.bridge_timeout = bridge_timeout;
        self
    }

    /// Ask the bridge whether Resolve is reachable
    pub async fn health_check(&self) -> Result<()> {
        let reply = self.invoke(&["status".to_string()]).await?;
        if !reply.success {
            anyhow::bail!(
                "Resolve bridge unavailable: {}",
                reply.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }

    async fn invoke(&self, args: &[String]) -> Result<BridgeReply> {
        let child = Command::new(&self.python)
            .arg(&self.script)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn bridge script {}", self.script.display()))?;

        let output = timeout(self.bridge_timeout, child.wait_with_output())
            .await
            .with_context(|| format!("Resolve bridge timed out after {:?}", self.bridge_timeout))?
            .context("Failed to wait for bridge script")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");

        match serde_json::from_str::<BridgeReply>(line) {
            Ok(reply) => Ok(reply),
            Err(_) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                anyhow::bail!(
                    "Bridge script failed with exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                )
            }
            Err(e) => Err(e).with_context(|| format!("Unexpected bridge output: {}", line)),
        }
    }

    async fn download(&self, request: &ExportRequest) -> Result<PathBuf> {
        let bytes = self
            .loader
            .load(&request.video)
            .await
            .with_context(|| format!("Failed to load video {}", request.video))?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;

        let path = self
            .output_dir
            .join(format!("{}.{}", file_stem(&request.clip_name), extension(&request.video)));
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(path)
    }
}

#[async_trait]
impl Exporter for ResolveExporter {
    fn name(&self) -> &str {
        "resolve"
    }

    async fn export(&self, request: &ExportRequest) -> Result<String, TaskError> {
        let path = self
            .download(request)
            .await
            .map_err(|e| TaskError::ExportFailed(format!("{:#}", e)))?;

        let metadata = serde_json::json!({
            "Comments": format!("Generated by shotgraph ({})", request.task_id),
            "Keywords": "shotgraph",
        });
        let args = [
            "import".to_string(),
            path.display().to_string(),
            self.target_folder.clone().unwrap_or_default(),
            request.clip_name.clone(),
            metadata.to_string(),
        ];

        debug!(task = %request.task_id, file = %path.display(), "Importing into Resolve");

        let reply = self
            .invoke(&args)
            .await
            .map_err(|e| TaskError::ExportFailed(format!("{:#}", e)))?;

        if !reply.success {
            return Err(TaskError::ExportFailed(
                reply.error.unwrap_or_else(|| "bridge reported failure".to_string()),
            ));
        }

        info!(task = %request.task_id, clip = %request.clip_name, "Clip imported into Resolve");
        Ok(path.display().to_string())
    }
}

fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "clip".to_string()
    } else {
        stem
    }
}

fn extension(reference: &str) -> &str {
    let name = reference.rsplit('/').next().unwrap_or(reference);
    let name = name.split('?').next().unwrap_or(name);
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4")
}
