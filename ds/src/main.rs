//! dashsync CLI
//!
//! Runs a simulated producer against consumer replicas, and inspects or
//! clears the durable cache.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use dashsync::cli::{Cli, Command, OutputFormat, get_log_path};
use dashsync::clock::system_clock;
use dashsync::config::Config;
use dashsync::domain::{AlertLevel, DashboardState, ProjectRef, StepStatus, TaskStatus};
use dashsync::emitter::Emitter;
use dashsync::events::{DisabledChannel, SyncChannel, VersionFileChannel};
use dashsync::persistence::{FileBackend, PersistenceController, PersistenceError, StorageBackend};
use dashsync::replica::Replica;
use dashsync::scheduler::TokioScheduler;
use dashsync::store::{ConsumerStore, StoreEvent};
use dashsync::transport::BroadcastTransport;

const DEMO_STEPS: [&str; 3] = ["Gather", "Analyze", "Report"];

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
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

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

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
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(namespace = %config.persistence.namespace, "dashsync loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Demo {
            tasks,
            replicas,
            step_delay_ms,
        } => cmd_demo(&config, tasks, replicas, Duration::from_millis(step_delay_ms)).await,
        Command::Inspect { format } => cmd_inspect(&config, format),
        Command::Clear => cmd_clear(&config),
        Command::Config => cmd_config(&config, cli.config.as_ref()),
    }
}

fn file_backend(config: &Config) -> Arc<dyn StorageBackend> {
    Arc::new(FileBackend::new(config.persistence.resolved_cache_dir()))
}

fn status_label(status: TaskStatus) -> ColoredString {
    match status {
        TaskStatus::Pending => "pending".dimmed(),
        TaskStatus::Running => "running".yellow(),
        TaskStatus::Completed => "completed".green(),
        TaskStatus::Failed => "failed".red(),
        TaskStatus::Cancelled => "cancelled".magenta(),
    }
}

fn print_tasks(state: &DashboardState) {
    for task in &state.active_tasks {
        let done = task
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        println!(
            "  {} {} [{}] {}/{} steps",
            task.task_id.cyan(),
            task.task_name,
            status_label(task.status),
            done,
            task.total_steps
        );
        if let Some(error) = &task.error {
            println!("    {} {}", "error:".red(), error);
        }
    }
}

async fn cmd_demo(config: &Config, tasks: usize, replicas: usize, step_delay: Duration) -> Result<()> {
    info!(tasks, replicas, "cmd_demo: starting");
    let cache_dir = config.persistence.resolved_cache_dir();
    let backend = file_backend(config);
    let channel: Arc<dyn SyncChannel> =
        Arc::new(VersionFileChannel::in_dir(&cache_dir, &config.persistence.namespace));
    let transport = Arc::new(BroadcastTransport::default());
    let clock = system_clock();

    let mut running = Vec::with_capacity(replicas);
    for _ in 0..replicas.max(1) {
        let persistence = PersistenceController::new(
            config.persistence.clone(),
            backend.clone(),
            channel.clone(),
            clock.clone(),
            Arc::new(TokioScheduler::from_current()?),
        );
        let store = ConsumerStore::with_task_limit(config.persistence.max_active_tasks);
        running.push(Replica::spawn(store, persistence, transport.subscribe()));
    }
    println!(
        "{} {} replica(s), cache at {}",
        "Started".green().bold(),
        running.len(),
        cache_dir.display().to_string().dimmed()
    );

    // Echo what the first replica applies
    let watched = running[0].store().clone();
    let mut events = watched.subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(StoreEvent::Applied { timestamp, source }) = events.recv().await {
            let active = watched.tasks_with_status(TaskStatus::Running).len();
            println!(
                "  {} ts={} via {:?} ({} running)",
                "⟳".blue(),
                timestamp.to_string().dimmed(),
                source,
                active
            );
        }
    });

    let emitter = Emitter::new(
        config.emitter.clone(),
        transport.clone(),
        Arc::new(TokioScheduler::from_current()?),
        clock.clone(),
    );
    let sweeper = emitter.spawn_retention_sweeper(Duration::from_secs(1));

    emitter.set_active_project(Some(ProjectRef::new("demo", "Demo project")));
    emitter.set_agent_loading("researcher", true);

    for i in 0..tasks {
        let task_id = format!("task-{}", i + 1);
        let estimate = step_delay.as_millis() as u64 * 2 * DEMO_STEPS.len() as u64;
        match emitter.start_task(&task_id, format!("Research #{}", i + 1), DEMO_STEPS, Some(estimate)) {
            Ok(_) => println!("{} {}", "▶".green(), task_id.cyan()),
            Err(e) => {
                println!("{} {}: {}", "✗".red(), task_id, e);
                emitter.push_alert(AlertLevel::Warning, e.to_string());
                continue;
            }
        }

        for (index, name) in DEMO_STEPS.iter().enumerate() {
            emitter.update_task_step(&task_id, index, StepStatus::Running, Some(0))?;
            tokio::time::sleep(step_delay).await;
            emitter.update_task_step(&task_id, index, StepStatus::Running, Some(50))?;
            emitter.log_activity(format!("{task_id}: {name} halfway"));
            tokio::time::sleep(step_delay).await;
            emitter.update_task_step(&task_id, index, StepStatus::Completed, None)?;
        }

        // Every third task fails so the demo shows both outcomes
        if i % 3 == 2 {
            emitter.fail_task(&task_id, "Network timeout")?;
            emitter.set_error(task_id.as_str(), "Network timeout");
        } else {
            emitter.complete_task(&task_id)?;
        }
    }

    emitter.set_agent_loading("researcher", false);
    emitter.push_alert(AlertLevel::Info, "Demo finished");
    emitter.flush_now();
    tokio::time::sleep(config.emitter.debounce() * 2).await;
    sweeper.abort();

    println!();
    println!("{}", "Replicas:".bold());
    for (n, replica) in running.into_iter().enumerate() {
        let snapshot = replica.snapshot().await?;
        let stats = replica.shutdown().await?;
        println!(
            "  #{} ts={} applied={} stale={} sibling={} hydrated={}",
            n,
            snapshot.timestamp,
            stats.transport_applied,
            stats.transport_stale,
            stats.sibling_applied,
            stats.hydrated
        );
    }
    watcher.abort();

    let metrics = emitter.metrics();
    println!();
    println!("{}", "Emitter:".bold());
    println!(
        "  flushes={} immediate={} debounced={} forced={} coalesced={} transport_errors={}",
        metrics.flushes,
        metrics.immediate_flushes,
        metrics.debounced_flushes,
        metrics.forced_flushes,
        metrics.coalesced_mutations,
        metrics.transport_errors
    );
    print_tasks(&emitter.snapshot());
    Ok(())
}

fn inspect_controller(config: &Config) -> Result<PersistenceController> {
    Ok(PersistenceController::new(
        config.persistence.clone(),
        file_backend(config),
        Arc::new(DisabledChannel),
        system_clock(),
        Arc::new(TokioScheduler::from_current()?),
    ))
}

fn cmd_inspect(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_inspect: called");
    let controller = inspect_controller(config)?;
    let state = match controller.try_load() {
        Ok(Some(state)) => state,
        Ok(None) => {
            println!("{} Nothing cached for namespace '{}'", "∅".dimmed(), config.persistence.namespace);
            return Ok(());
        }
        Err(e @ PersistenceError::StaleState { .. }) => {
            println!("{} {} (record removed)", "⌛".yellow(), e);
            return Ok(());
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return Ok(());
        }
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&state)?),
        OutputFormat::Text => {
            let saved_at = chrono::DateTime::from_timestamp_millis(state.timestamp)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| state.timestamp.to_string());
            println!("{} {}", "Namespace:".bold(), config.persistence.namespace);
            println!("{} {}", "Saved at:".bold(), saved_at);
            println!("{} v{}", "Schema:".bold(), state.schema_version);
            if let Some(project) = &state.active_project {
                println!("{} {} ({})", "Project:".bold(), project.name, project.id);
            }
            println!(
                "{} {} panels, {} alerts, {} activity entries",
                "Widgets:".bold(),
                state.widgets.panels.len(),
                state.widgets.alerts.len(),
                state.widgets.activity.len()
            );
            println!("{} {}", "Tasks:".bold(), state.active_tasks.len());
            print_tasks(&state);
        }
    }
    Ok(())
}

fn cmd_clear(config: &Config) -> Result<()> {
    debug!("cmd_clear: called");
    inspect_controller(config)?.clear();
    println!(
        "{} Cleared cache for namespace '{}'",
        "✓".green(),
        config.persistence.namespace
    );
    Ok(())
}

fn cmd_config(config: &Config, source: Option<&PathBuf>) -> Result<()> {
    debug!("cmd_config: called");
    if let Some(path) = source {
        println!("{} {}", "# Loaded from".dimmed(), path.display());
    }
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}
