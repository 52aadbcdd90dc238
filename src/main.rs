//! promptwheel - CLI entry point.
//!
//! Wires a production [`Capabilities`] bundle (real clock, filesystem,
//! process execution, and an LLM-backed surveyor/trajectory generator) and
//! drives one [`wheel::run_session`] to completion.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use promptwheel::capabilities::Capabilities;
use promptwheel::cli::{exit_code_for, Cli, OutputFormat};
use promptwheel::config::Config;
use promptwheel::domain::SessionState;
use promptwheel::runtime;
use promptwheel::wheel::SessionBudgets;

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("promptwheel")
        .join("logs");
    std::fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let default_level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();

    info!("Logging initialized");
    Ok(())
}

fn agent_command() -> String {
    std::env::var("PROMPTWHEEL_AGENT_CMD").unwrap_or_else(|_| "claude -p --dangerously-skip-permissions".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(err) = setup_logging(cli.verbose) {
        eprintln!("promptwheel: failed to set up logging: {err:#}");
        std::process::exit(2);
    }

    let config = match Config::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("promptwheel: failed to load configuration: {err:#}");
            std::process::exit(2);
        }
    };

    let promptwheel_dir = PathBuf::from(&config.storage.promptwheel_dir);
    if let Err(err) = std::fs::create_dir_all(&promptwheel_dir) {
        eprintln!("promptwheel: failed to create {}: {err}", promptwheel_dir.display());
        std::process::exit(2);
    }

    let llm = match promptwheel::llm::create_client(&config.llm) {
        Ok(llm) => llm,
        Err(err) => {
            eprintln!("promptwheel: failed to initialize LLM client: {err}");
            std::process::exit(2);
        }
    };

    let filesystem: Arc<dyn promptwheel::capabilities::Filesystem> = Arc::new(runtime::RealFilesystem);
    let process: Arc<dyn promptwheel::capabilities::Process> = Arc::new(runtime::RealProcess);
    let clock: Arc<dyn promptwheel::capabilities::Clock> = Arc::new(runtime::RealClock);

    let caps = Capabilities {
        surveyor: Arc::new(runtime::LlmSurveyor::new(Arc::clone(&llm))),
        trajectory_generator: Arc::new(runtime::LlmTrajectoryGenerator::new(Arc::clone(&llm))),
        agent_invoker: Arc::new(runtime::ShellAgentInvoker::new(Arc::clone(&process), agent_command())),
        codebase_index: Arc::new(runtime::FileCountCodebaseIndex::new(std::env::current_dir()?)),
        sector_store: Arc::new(runtime::JsonSectorStore::new(Arc::clone(&filesystem), promptwheel_dir.join("sector.json"))),
        display: Arc::new(runtime::TracingDisplay),
        clock: Arc::clone(&clock),
        filesystem: Arc::clone(&filesystem),
        process: Arc::clone(&process),
    };

    let mut state = SessionState::new();
    let started_at = clock.now_unix();
    let budgets = SessionBudgets {
        max_cycles: None,
        max_reviews: None,
        started_at_unix: Some(started_at),
        expires_at_unix: cli.hours.map(|h| started_at + (h * 3600.0) as i64),
    };

    let summary = match promptwheel::wheel::run_session(&mut state, &config, &caps, &budgets, &promptwheel_dir, cli.parallel).await {
        Ok(summary) => summary,
        Err(err) => {
            eprintln!("promptwheel: session failed: {err:#}");
            std::process::exit(err.exit_code());
        }
    };

    match cli.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => {
            println!("promptwheel session summary");
            println!("  cycles:       {}", summary.total_cycles);
            println!("  completed:    {}", summary.completed_tickets);
            println!("  failed:       {}", summary.failed_tickets);
            println!("  trajectories: {} generated, {} completed, {} stalled",
                summary.trajectories_generated, summary.trajectories_completed, summary.trajectories_stalled);
            if let Some(reason) = &summary.shutdown_reason {
                println!("  shutdown:     {reason}");
            }
        }
    }

    // Review creation is tracked by an external code-review integration,
    // not yet wired into the capability bundle; treat it as zero for now.
    let reviews_created = 0;
    std::process::exit(exit_code_for(&summary, reviews_created));
}
