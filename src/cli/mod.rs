//! Command-line interface for shotgraph.
//!
//! Provides commands for planning and running briefs, running batch files,
//! serving the batch endpoint and inspecting configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::warn;

use crate::adapters::{
    ArtifactLoader, HttpArtifactLoader, HttpJobBackend, JsonlGenerationLog, ResolveExporter,
};
use crate::config::{self, ResolvedConfig};
use crate::core::{
    save_report, BatchRequest, BatchRunner, CancelFlag, GraphBuilder, JobClient, Orchestrator,
    ProgressTracker,
};
use crate::domain::{Brief, DependencyPolicy, GenerationTask, RunEvent, RunReport, TaskStatus};
use crate::server;

/// shotgraph - Dependency-driven generation orchestrator
#[derive(Parser, Debug)]
#[command(name = "shotgraph")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build and print the task graph for a brief
    Plan {
        /// Brief file (YAML)
        brief: PathBuf,

        /// Print tasks as JSON
        #[arg(long)]
        json: bool,
    },

    /// Execute a brief
    Run {
        /// Brief file (YAML)
        brief: PathBuf,

        /// Skip export tasks even when export is configured
        #[arg(long)]
        no_export: bool,
    },

    /// Run a batch file of independent jobs
    Batch {
        /// Batch request file (JSON)
        file: PathBuf,
    },

    /// Start the HTTP server for the batch endpoint
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = "127.0.0.1:9000")]
        address: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Plan { brief, json } => plan(&brief, json),
            Commands::Run { brief, no_export } => run_brief(&brief, no_export).await,
            Commands::Batch { file } => run_batch(&file).await,
            Commands::Serve { address } => serve(&address).await,
            Commands::Config => show_config(),
        }
    }
}

/// Build the remote job client from configuration
fn job_client(cfg: &ResolvedConfig) -> Result<JobClient> {
    let backend = HttpJobBackend::new(
        &cfg.remote.base_url,
        cfg.remote.endpoints.clone(),
        cfg.api_key(),
        cfg.remote.request_timeout,
    )?;

    Ok(JobClient::new(Arc::new(backend)).with_policies(cfg.polling.image, cfg.polling.video))
}

/// Print the task graph without executing anything
fn plan(brief_path: &Path, json: bool) -> Result<()> {
    let cfg = config::config()?;
    let brief = Brief::from_file(brief_path)?;
    let graph = GraphBuilder::new(cfg.build_options())
        .build(&brief)
        .with_context(|| format!("Invalid brief: {}", brief_path.display()))?;

    if json {
        let out = serde_json::to_string_pretty(graph.tasks()).context("Failed to serialize tasks")?;
        println!("{}", out);
        return Ok(());
    }

    println!("Brief: {} ({} tasks)", brief.name, graph.len());
    println!();
    println!("{:<28} {:<16} {:<12} DEPENDS ON", "TASK", "KIND", "POLICY");
    println!("{}", "-".repeat(90));

    for task in graph.tasks() {
        let policy = match task.policy {
            DependencyPolicy::RequireAll => "all".to_string(),
            DependencyPolicy::Partial { min_sources } => format!("partial({})", min_sources),
        };
        println!(
            "{:<28} {:<16} {:<12} {}",
            task.id,
            task.kind,
            policy,
            task.depends_on.join(", ")
        );
    }

    println!();
    for (kind, count) in graph.count_by_kind() {
        println!("  {:<16} {}", kind, count);
    }

    Ok(())
}

/// Execute a brief and write its report
async fn run_brief(brief_path: &Path, no_export: bool) -> Result<()> {
    let cfg = config::config()?;
    let brief = Brief::from_file(brief_path)?;

    let mut options = cfg.build_options();
    if no_export {
        options.include_exports = false;
    }
    let graph = GraphBuilder::new(options)
        .build(&brief)
        .with_context(|| format!("Invalid brief: {}", brief_path.display()))?;

    let recorder = Arc::new(JsonlGenerationLog::open(cfg.generation_log()).await?);
    let loader: Arc<dyn ArtifactLoader> =
        Arc::new(HttpArtifactLoader::new(cfg.remote.request_timeout)?);

    let mut orchestrator = Orchestrator::new(job_client(cfg)?).with_recorder(recorder.clone());
    if cfg.remote.inline_sources {
        orchestrator = orchestrator.with_inline_sources(loader.clone());
    }
    if options.include_exports {
        match &cfg.export.bridge_script {
            Some(script) => {
                let exporter = ResolveExporter::new(script, &cfg.export.output_dir, loader.clone())
                    .with_python(cfg.export.python.as_str())
                    .with_target_folder(cfg.export.target_folder.clone())
                    .with_timeout(cfg.export.timeout);
                if let Err(e) = exporter.health_check().await {
                    warn!(error = %e, "Resolve bridge not reachable, exports will likely fail");
                }
                orchestrator = orchestrator.with_exporter(Arc::new(exporter));
            }
            None => warn!("Export enabled but no bridge script configured"),
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancelFlag::new();
    let tracker = ProgressTracker::new()
        .with_cancel(cancel.clone())
        .with_events(tx);

    // Ctrl-C stops new launches; submitted jobs finish on their own
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, waiting for in-flight jobs");
            cancel.cancel();
        }
    });

    let progress = tokio::spawn(async move {
        let mut last = None;
        while let Some(event) = rx.recv().await {
            if let RunEvent::Progress(p) = event {
                if last != Some(p.completed) {
                    eprintln!(
                        "[{}/{}] phase: {} ({} active)",
                        p.completed, p.total, p.phase, p.active_count
                    );
                    last = Some(p.completed);
                }
            }
        }
    });

    let report = orchestrator.run(&brief.name, &graph, &tracker).await;

    drop(tracker);
    let _ = progress.await;
    recorder.close().await;

    let report_path = save_report(&report, &cfg.runs_dir()).await?;
    print_report(&report);
    eprintln!("\n[Report written to {}]", report_path.display());

    if !report.summary.is_success() {
        std::process::exit(1);
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Run {} ({})", report.run_id, report.brief_name);
    println!();
    for task in &report.tasks {
        println!("  {:<28} {:<6} {}", task.id, status_label(task), task_detail(task));
    }
    println!();
    println!("{}", report.summary);
}

fn status_label(task: &GenerationTask) -> &'static str {
    match task.status {
        TaskStatus::Done => "done",
        TaskStatus::Error => "error",
        TaskStatus::Running => "running",
        TaskStatus::Pending => "pending",
    }
}

fn task_detail(task: &GenerationTask) -> String {
    task.error_message()
        .or_else(|| task.result.clone())
        .unwrap_or_default()
}

/// Run a batch file and print the response
async fn run_batch(path: &Path) -> Result<()> {
    let cfg = config::config()?;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch file: {}", path.display()))?;
    let request: BatchRequest = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse batch file: {}", path.display()))?;

    let response = BatchRunner::new(job_client(cfg)?).run(request).await?;

    let out = serde_json::to_string_pretty(&response).context("Failed to serialize response")?;
    println!("{}", out);

    if response.failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

/// Start the HTTP server
async fn serve(address: &str) -> Result<()> {
    let cfg = config::config()?;
    let address: SocketAddr = address
        .parse()
        .with_context(|| format!("Invalid address: {}", address))?;

    server::serve(address, BatchRunner::new(job_client(cfg)?)).await
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("shotgraph configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:            {}", cfg.home.display());
    println!("  Runs:            {}", cfg.runs_dir().display());
    println!("  Generation log:  {}", cfg.generation_log().display());
    println!("  Exports:         {}", cfg.export.output_dir.display());
    println!();
    println!("Remote:");
    println!("  Base URL:        {}", cfg.remote.base_url);
    println!(
        "  API key:         ${} ({})",
        cfg.remote.api_key_env,
        if cfg.api_key().is_some() { "set" } else { "unset" }
    );
    println!("  Request timeout: {:?}", cfg.remote.request_timeout);
    println!("  Inline sources:  {}", cfg.remote.inline_sources);

    let mut endpoints: Vec<_> = cfg.remote.endpoints.iter().collect();
    endpoints.sort_by_key(|(kind, _)| **kind);
    for (kind, endpoint) in endpoints {
        println!("  {:<16} {}", kind, endpoint.path);
    }
    println!();
    println!("Polling:");
    println!(
        "  Image: every {}ms, {} attempts",
        cfg.polling.image.interval_ms, cfg.polling.image.max_attempts
    );
    println!(
        "  Video: every {}ms, {} attempts",
        cfg.polling.video.interval_ms, cfg.polling.video.max_attempts
    );
    println!();
    println!("Aggregation:");
    println!("  Collection min sources: {}", cfg.collection_min_sources);
    println!(
        "  Composite partial:      {} (min {})",
        cfg.composite.allow_partial, cfg.composite.min_sources
    );
    println!();
    println!("Export:");
    println!("  Enabled:         {}", cfg.export.enabled);
    println!(
        "  Bridge script:   {}",
        cfg.export
            .bridge_script
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );

    Ok(())
}
