//! Append-only generation log with file-based persistence.
//!
//! Records are stored as newline-delimited JSON (JSONL). Writes happen on a
//! background task so `record` never blocks the orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::GenerationRecorder;
use crate::domain::GenerationRecord;

/// JSONL generation log fed through a channel
pub struct JsonlGenerationLog {
    path: PathBuf,
    tx: Mutex<Option<mpsc::UnboundedSender<GenerationRecord>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl JsonlGenerationLog {
    /// Open (or create) a log and start its writer task
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_records(path.clone(), rx));

        Ok(Self {
            path,
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Get the path to the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting records and wait for pending writes
    pub async fn close(&self) {
        drop(self.tx.lock().ok().and_then(|mut tx| tx.take()));

        let writer = self.writer.lock().ok().and_then(|mut w| w.take());
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "Generation log writer ended abnormally");
            }
        }
    }

    /// Read every record in order
    pub async fn read_records(path: &Path) -> Result<Vec<GenerationRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open generation log: {}", path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut records = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: GenerationRecord = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse generation record: {}", line))?;
            records.push(record);
        }

        Ok(records)
    }
}

impl GenerationRecorder for JsonlGenerationLog {
    fn record(&self, record: GenerationRecord) {
        let sent = match self.tx.lock() {
            Ok(tx) => tx.as_ref().map(|tx| tx.send(record).is_ok()).unwrap_or(false),
            Err(_) => false,
        };
        if !sent {
            debug!("Generation log closed, record dropped");
        }
    }
}

async fn write_records(path: PathBuf, mut rx: mpsc::UnboundedReceiver<GenerationRecord>) {
    while let Some(record) = rx.recv().await {
        if let Err(e) = append(&path, &record).await {
            warn!(path = %path.display(), error = %e, "Failed to write generation record");
        }
    }
}

async fn append(path: &Path, record: &GenerationRecord) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open generation log: {}", path.display()))?;

    let json = serde_json::to_string(record).context("Failed to serialize record")?;
    file.write_all(format!("{}\n", json).as_bytes())
        .await
        .context("Failed to write record")?;
    file.flush().await.context("Failed to flush record")?;

    Ok(())
}
