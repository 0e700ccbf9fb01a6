//! Command-line interface for mediarun.
//!
//! Provides commands for creating events, attaching input videos, running an
//! event's pipeline and inspecting recorded results.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{self, ResolvedConfig};
use crate::core::{Executor, FileEventRepository, FileLedger, Ledger, NewEvent, StepRegistry};
use crate::domain::{OrderedMap, RunRecord, RunStatus, StepStatus, STEP_CATALOG};

/// mediarun - per-event media pipeline runner
#[derive(Parser, Debug)]
#[command(name = "mediarun")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every enabled step of an event
    Run {
        /// Event ID (directory name under the events directory)
        event_id: String,

        /// Re-execute steps that already succeeded
        #[arg(short, long)]
        force: bool,
    },

    /// Show the last run of an event
    Status {
        /// Event ID
        event_id: String,
    },

    /// List events
    List,

    /// Create a new event
    Create {
        /// Event title
        #[arg(short, long)]
        title: String,

        /// Speaker name
        #[arg(short, long)]
        speaker: String,

        /// Series the event belongs to
        #[arg(long)]
        series: Option<String>,

        /// Scripture reference
        #[arg(long)]
        scripture: Option<String>,

        /// Transcription language ("auto" to detect)
        #[arg(short, long)]
        language: Option<String>,

        /// Whisper model size (tiny, base, small, medium, large)
        #[arg(long)]
        model: Option<String>,

        /// Disable a step (repeatable)
        #[arg(long = "disable", value_name = "STEP")]
        disabled: Vec<String>,
    },

    /// Copy a video into an event's input directory
    Attach {
        /// Event ID
        event_id: String,

        /// Video file to attach
        video: PathBuf,
    },

    /// List registered steps
    Steps,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run { event_id, force } => run_event(&event_id, force).await,
            Commands::Status { event_id } => show_status(&event_id).await,
            Commands::List => list_events().await,
            Commands::Create {
                title,
                speaker,
                series,
                scripture,
                language,
                model,
                disabled,
            } => {
                let new = NewEvent {
                    title,
                    speaker,
                    series,
                    scripture,
                    language,
                    whisper_model: model,
                    modules: Some(module_toggles(&disabled)?),
                };
                create_event(new).await
            }
            Commands::Attach { event_id, video } => attach_video(&event_id, &video).await,
            Commands::Steps => list_steps().await,
            Commands::Config => show_config().await,
        }
    }
}

/// Build an executor over the configured events directory
pub fn build_executor(cfg: &ResolvedConfig) -> Executor {
    Executor::new(
        Arc::new(FileEventRepository::new(&cfg.events_dir)),
        Arc::new(FileLedger::new(&cfg.events_dir)),
        StepRegistry::builtin(cfg),
    )
}

/// Catalog toggles with `disabled` switched off
fn module_toggles(disabled: &[String]) -> Result<OrderedMap<bool>> {
    if let Some(unknown) = disabled.iter().find(|d| !STEP_CATALOG.contains(&d.as_str())) {
        anyhow::bail!(
            "Unknown step '{}'. Available steps: {}",
            unknown,
            STEP_CATALOG.join(", ")
        );
    }

    Ok(STEP_CATALOG
        .iter()
        .map(|name| (*name, !disabled.iter().any(|d| d == name)))
        .collect())
}

/// Run an event and print its run record as JSON
async fn run_event(event_id: &str, force: bool) -> Result<()> {
    let cfg = config::config()?;
    let executor = build_executor(cfg);

    let record = executor.run_event(event_id, force).await?;

    let json = serde_json::to_string_pretty(&record).context("Failed to serialize run record")?;
    println!("{}", json);

    print_summary(&record);

    if record.overall_status == RunStatus::Failed {
        std::process::exit(1);
    }

    Ok(())
}

fn print_summary(record: &RunRecord) {
    eprintln!(
        "\n[Run {} for {}: {} ({} succeeded, {} failed, {} skipped)]",
        record.run_id,
        record.event_id,
        record.overall_status,
        record.count(StepStatus::Success),
        record.count(StepStatus::Failed),
        record.count(StepStatus::Skipped),
    );
}

/// Show the last run of an event
async fn show_status(event_id: &str) -> Result<()> {
    let cfg = config::config()?;
    let executor = build_executor(cfg);

    let Some(record) = executor.status(event_id).await? else {
        println!("No runs recorded for {}", event_id);
        return Ok(());
    };

    println!("Event: {}", record.event_id);
    println!("Run ID: {}", record.run_id);
    println!("Status: {}", record.overall_status);
    println!("Forced: {}", record.forced);
    println!("Started: {}", record.started_at);
    println!("Completed: {}", record.completed_at);
    println!("\nSteps:");
    for (step, result) in record.steps.iter() {
        match &result.error {
            Some(error) => println!("  {:<20} {:<8} {}", step, result.status, error),
            None => println!("  {:<20} {:<8} {}", step, result.status, result.message),
        }
    }

    Ok(())
}

/// List events with their last overall status
async fn list_events() -> Result<()> {
    let cfg = config::config()?;
    let repository = FileEventRepository::new(&cfg.events_dir);
    let ledger = FileLedger::new(&cfg.events_dir);

    let events = repository.list().await?;
    if events.is_empty() {
        println!("No events found in {}", cfg.events_dir.display());
        return Ok(());
    }

    println!("{:<50} {:<10}", "EVENT", "LAST RUN");
    println!("{}", "-".repeat(60));

    for event_id in events {
        let last = match ledger.get_run_record(&event_id).await {
            Ok(Some(record)) => record.overall_status.to_string(),
            Ok(None) => "-".to_string(),
            Err(_) => "unreadable".to_string(),
        };
        println!("{:<50} {:<10}", event_id, last);
    }

    Ok(())
}

/// Create a new event
async fn create_event(new: NewEvent) -> Result<()> {
    let cfg = config::config()?;
    let repository = FileEventRepository::new(&cfg.events_dir);

    let event = repository.create(new).await?;

    println!("{}", event.id);
    eprintln!(
        "\n[Created event at {}]",
        cfg.events_dir.join(&event.id).display()
    );

    Ok(())
}

/// Attach a video to an event
async fn attach_video(event_id: &str, video: &Path) -> Result<()> {
    let cfg = config::config()?;
    let repository = FileEventRepository::new(&cfg.events_dir);

    let dest = repository.attach_video(event_id, video).await?;
    println!("{}", dest.display());

    Ok(())
}

/// List registered steps
async fn list_steps() -> Result<()> {
    let cfg = config::config()?;
    let registry = StepRegistry::builtin(cfg);

    for name in registry.names() {
        let source = if cfg.steps.contains_key(&name) {
            "command"
        } else {
            "builtin"
        };
        println!("{:<20} {}", name, source);
    }

    Ok(())
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("mediarun configuration");
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
    println!("  Home:    {}", cfg.home.display());
    println!("  Events:  {}", cfg.events_dir.display());
    println!("  Archive: {}", cfg.archive_root.display());
    println!("  Assets:  {}", cfg.assets_dir.display());
    println!();
    println!("Whisper:");
    println!("  Binary:     {}", cfg.whisper.binary);
    println!("  Models dir: {}", cfg.whisper.models_dir.display());
    println!("  ffmpeg:     {}", cfg.whisper.ffmpeg);
    println!("  Threads:    {}", cfg.whisper.threads);
    println!("  Timeout:    {}s", cfg.whisper.timeout_seconds);
    println!();
    println!("Command steps:");
    if cfg.steps.is_empty() {
        println!("  (none)");
    } else {
        let mut names: Vec<&String> = cfg.steps.keys().collect();
        names.sort();
        for name in names {
            let step = &cfg.steps[name];
            println!("  {}: {} {}", name, step.program, step.args.join(" "));
        }
    }

    Ok(())
}
