//! Waypoint - travel planner over a supervised worker fleet
//!
//! CLI entry point for running the fleet and planning trips.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use serde_json::Value;
use tracing::{debug, info};

use waypoint::cli::{Cli, Command, OutputFormat, generate_after_help};
use waypoint::config::Config;
use tokio::sync::broadcast::error::RecvError;
use waypoint::fleet::{FleetEvent, FleetManager, ReadinessSummary, WorkerInfo, WorkerStatus};
use waypoint::llm::create_client;
use waypoint::trip::{TripError, TripPlan, TripPlanner};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("waypoint")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("waypoint.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(workers = config.fleet.workers.len(), "Waypoint loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Up => cmd_up(config).await,
        Command::Status { format } => cmd_status(config, format).await,
        Command::Call {
            worker,
            tool,
            params,
            timeout_ms,
        } => cmd_call(config, &worker, &tool, &params, timeout_ms).await,
        Command::Plan { message, format } => cmd_plan(config, &message, format).await,
    }
}

/// Run the fleet until Ctrl-C
async fn cmd_up(config: Config) -> Result<()> {
    debug!("cmd_up: called");
    let fleet = FleetManager::spawn(config.fleet)?;

    let mut events = fleet.subscribe_events();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "cmd_up: event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let result = async {
        let summary = fleet.initialize().await?;
        print_summary(&summary);
        print_workers(&fleet.workers().await?);

        println!("\nFleet running. Press Ctrl-C to stop.");
        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        info!("Ctrl-C received, shutting down");
        Ok::<(), eyre::Report>(())
    }
    .await;

    println!("Stopping workers...");
    fleet.shutdown().await;
    printer.abort();
    println!("{} Fleet stopped", "✓".green());
    result
}

/// Probe configured workers without spawning any
async fn cmd_status(mut config: Config, format: OutputFormat) -> Result<()> {
    debug!(%format, "cmd_status: called");
    config.fleet.attach_only = true;
    let fleet = FleetManager::spawn(config.fleet)?;

    let result = async {
        let summary = fleet.initialize().await?;
        let workers = fleet.workers().await?;
        match format {
            OutputFormat::Json => {
                let report = serde_json::json!({ "summary": summary, "workers": workers });
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Text => {
                print_workers(&workers);
                print_summary(&summary);
            }
        }
        Ok::<(), eyre::Report>(())
    }
    .await;

    fleet.shutdown().await;
    result
}

/// Start the fleet and make a single call
async fn cmd_call(config: Config, worker: &str, tool: &str, params: &str, timeout_ms: Option<u64>) -> Result<()> {
    debug!(%worker, %tool, ?timeout_ms, "cmd_call: called");
    let params: Value = serde_json::from_str(params).context("--params must be valid JSON")?;
    let timeout = Duration::from_millis(timeout_ms.unwrap_or(config.fleet.call_timeout_ms));
    let fleet = FleetManager::spawn(config.fleet)?;

    let result = async {
        fleet.initialize().await?;
        let value = fleet.call_with_timeout(worker, tool, params, timeout).await?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        Ok::<(), eyre::Report>(())
    }
    .await;

    fleet.shutdown().await;
    result
}

/// Parse a travel request and gather data for it
async fn cmd_plan(config: Config, message: &str, format: OutputFormat) -> Result<()> {
    debug!(%format, "cmd_plan: called");
    let llm = create_client(&config.llm).context("Failed to create LLM client")?;
    let fleet = FleetManager::spawn(config.fleet)?;

    let result = async {
        let summary = fleet.initialize().await?;
        if !summary.all_ready() {
            eprintln!(
                "{} {} of {} workers ready",
                "!".yellow(),
                summary.ready.len(),
                summary.ready.len() + summary.failed.len() + summary.starting.len()
            );
        }
        let planner = TripPlanner::new(llm, fleet.clone());
        let plan = match planner.plan(message).await {
            Ok(plan) => plan,
            Err(e) => {
                if let TripError::Llm(llm_err) = &e
                    && let Some(wait) = llm_err.retry_after()
                {
                    eprintln!(
                        "{} The LLM provider is rate limiting requests; try again in {}s",
                        "!".yellow(),
                        wait.as_secs()
                    );
                }
                return Err(e.into());
            }
        };
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
            OutputFormat::Text => print_plan(&plan),
        }
        Ok::<(), eyre::Report>(())
    }
    .await;

    fleet.shutdown().await;
    result
}

fn print_event(event: &FleetEvent) {
    debug!(event_type = event.event_type(), "print_event: called");
    match event {
        FleetEvent::PhaseChanged { phase } => println!("{} fleet {}", "»".cyan(), phase),
        FleetEvent::WorkerStatusChanged { worker, from, to, reason } => {
            let reason = reason.as_deref().map(|r| format!(" ({})", r)).unwrap_or_default();
            println!("{} {} {} -> {}{}", "»".cyan(), worker, from, to, reason.as_str().dimmed());
        }
    }
}

fn print_summary(summary: &ReadinessSummary) {
    if summary.all_ready() {
        println!("{} All {} workers ready", "✓".green(), summary.ready.len());
        return;
    }
    println!(
        "{} ready, {} failed, {} still starting",
        summary.ready.len(),
        summary.failed.len(),
        summary.starting.len()
    );
}

fn print_workers(workers: &[WorkerInfo]) {
    for worker in workers {
        let icon = match worker.status {
            WorkerStatus::Ready => "✓".green(),
            WorkerStatus::Failed => "✗".red(),
            WorkerStatus::Starting | WorkerStatus::Unknown => "…".yellow(),
        };
        let pid = worker.pid.map(|p| format!(" pid {}", p)).unwrap_or_default();
        println!(
            "{} {:<20} {:<8} {}{}",
            icon,
            worker.name,
            worker.status.to_string(),
            worker.base_url,
            pid
        );
        if let Some(error) = &worker.last_error {
            println!("    {}", error.as_str().dimmed());
        }
    }
}

fn print_plan(plan: &TripPlan) {
    println!("{} {}", "Trip:".bold(), plan.summary);
    if let Some(from) = plan.request.departure() {
        println!("  From: {}", from);
    }
    println!("  Travelers: {}", plan.request.travelers());

    let tiers = [
        ("Flights", &plan.clusters.flight_clusters),
        ("Hotels", &plan.clusters.hotel_clusters),
    ];
    for (label, clusters) in tiers {
        if clusters.is_empty() {
            continue;
        }
        println!(
            "  {}: {} budget, {} mid-range, {} luxury",
            label,
            clusters.budget.len(),
            clusters.mid_range.len(),
            clusters.luxury.len()
        );
    }
    if !plan.recommendations.is_empty() {
        println!("\n{}", "Recommendations:".bold());
        for rec in &plan.recommendations {
            let cost = rec.estimated_cost.map(|c| format!(" (~${:.0})", c)).unwrap_or_default();
            println!("  {} {}{}", "•".green(), rec.name.bold(), cost);
            if !rec.description.is_empty() {
                println!("    {}", rec.description);
            }
            for highlight in &rec.highlights {
                println!("    - {}", highlight);
            }
        }
    }
    if !plan.data.unavailable.is_empty() {
        println!("  {} {}", "Unavailable:".yellow(), plan.data.unavailable.join(", "));
    }
}
