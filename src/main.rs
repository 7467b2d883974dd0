use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use tollgate::config::GlobalConfig;
use tollgate::domain::{LogStream, Priority, Task};
use tollgate::executor::InferenceExecutor;
use tollgate::llm::{InferenceClient, OllamaClient};
use tollgate::monitor::{ResourceProvider, SystemMonitor};
use tollgate::roles::Role;
use tollgate::scheduler::{AdmissionScheduler, StopHandle};
use tollgate::shift::{ShiftManager, ShiftStatus};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tollgate")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("tollgate.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn parse_object(text: Option<&str>, what: &str) -> Result<Map<String, Value>> {
    let Some(text) = text else {
        return Ok(Map::new());
    };
    match serde_json::from_str(text).context(format!("Invalid {} JSON", what))? {
        Value::Object(map) => Ok(map),
        _ => eyre::bail!("{} must be a JSON object", what),
    }
}

fn inference_client(config: &GlobalConfig) -> Result<Arc<dyn InferenceClient>> {
    let client = OllamaClient::new(config.ollama_config()).context("Failed to create inference client")?;
    Ok(Arc::new(client))
}

async fn run_application(cli: &Cli, config: &GlobalConfig) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        eprintln!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run { jobs } => handle_run_command(*jobs, cli.is_verbose(), config).await,
        Commands::Submit {
            task_type,
            priority,
            payload,
            id,
        } => handle_submit_command(task_type, *priority, payload.as_deref(), id.as_deref(), config).await,
        Commands::Queues => handle_queues_command(config).await,
        Commands::Log { stream, count } => handle_log_command(*stream, *count, config).await,
        Commands::Shift { role, context } => handle_shift_command(*role, context.as_deref(), config).await,
        Commands::Snapshot => handle_snapshot_command().await,
    }
}

async fn handle_run_command(jobs: bool, verbose: bool, config: &GlobalConfig) -> Result<()> {
    let bus = config.open_bus()?;
    let client = inference_client(config)?;
    let registry = Arc::new(config.role_registry()?);
    let monitor: Arc<dyn ResourceProvider> = Arc::new(SystemMonitor::new());
    let executor = Arc::new(
        InferenceExecutor::new(client.clone(), registry)
            .with_timeout(config.ollama_config().generate_timeout),
    );

    let stop = StopHandle::new();
    let mut scheduler = AdmissionScheduler::new(bus.clone(), client, monitor.clone(), executor, config.scheduler_config())
        .with_stop_handle(stop.clone());

    let planner = if jobs || config.jobs.enabled {
        let planner = config.job_planner();
        let check_interval = std::time::Duration::from_secs(config.jobs.check_interval_secs);
        Some(tokio::spawn(planner.run(bus, monitor, stop.clone(), check_interval)))
    } else {
        None
    };

    let signal_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            signal_stop.stop();
        }
    });

    if verbose {
        eprintln!(
            "{} budget {:.1} units, polling every {:?}",
            "Scheduler running:".green(),
            scheduler.budget(),
            config.scheduler_config().poll_interval
        );
    }

    let result = scheduler.start().await;
    stop.stop();
    if let Some(handle) = planner
        && let Err(e) = handle.await
    {
        log::warn!("Job planner ended abnormally: {}", e);
    }
    result.context("Scheduler failed")?;

    println!(
        "{} {} cycles, {:.1} units left",
        "Stopped:".yellow(),
        scheduler.cycle_count(),
        scheduler.budget()
    );
    Ok(())
}

async fn handle_submit_command(
    task_type: &str,
    priority: Priority,
    payload: Option<&str>,
    id: Option<&str>,
    config: &GlobalConfig,
) -> Result<()> {
    let bus = config.open_bus()?;
    let mut task = Task::new(task_type, priority)
        .with_payload(parse_object(payload, "payload")?)
        .with_source("cli");
    if let Some(id) = id {
        task = task.with_id(id);
    }

    bus.push(&task, None).await.context("Failed to enqueue task")?;
    info!("Submitted {} ({}) to {}", task.id, task.task_type, task.priority.lane().name());
    println!("{} {} -> {}", "Submitted:".green(), task.id, task.priority.lane().name());
    Ok(())
}

async fn handle_queues_command(config: &GlobalConfig) -> Result<()> {
    let bus = config.open_bus()?;
    let lengths = bus.queue_lengths().await.context("Failed to read queues")?;
    for (lane, len) in lengths {
        let line = format!("{:<10} {}", lane.name(), len);
        if len > 0 {
            println!("{}", line.cyan());
        } else {
            println!("{}", line);
        }
    }
    Ok(())
}

async fn handle_log_command(stream: LogStream, count: usize, config: &GlobalConfig) -> Result<()> {
    let bus = config.open_bus()?;
    let entries = bus
        .read_log(stream, None, usize::MAX)
        .await
        .context("Failed to read audit stream")?;
    let skip = entries.len().saturating_sub(count);
    for entry in entries.into_iter().skip(skip) {
        let event = entry.event().unwrap_or("-").to_string();
        let fields = Value::Object(entry.fields);
        let label = match stream {
            LogStream::Incidents => event.red(),
            _ => event.green(),
        };
        println!("{} {} {}", entry.id.to_string().dimmed(), label, fields);
    }
    Ok(())
}

async fn handle_shift_command(role: Role, context: Option<&str>, config: &GlobalConfig) -> Result<()> {
    let context = match context {
        Some(_) => Some(Value::Object(parse_object(context, "context")?)),
        None => None,
    };
    let bus = config.open_bus()?;
    let manager = ShiftManager::new(inference_client(config)?, Arc::new(config.role_registry()?))
        .with_bus(bus)
        .with_config(config.shift_config());

    println!("{} {}", "Shifting to:".cyan(), role);
    let report = manager.execute_shift(role, context).await;

    let status = match report.status {
        ShiftStatus::Completed => report.status.to_string().green(),
        _ => report.status.to_string().red(),
    };
    println!("  status:     {}", status);
    println!("  validation: {}", report.validation_ok);
    println!("  probe:      {}", report.test_ok);
    println!("  duration:   {:.2}s", report.duration_sec());
    if let Some(error) = &report.error {
        println!("  error:      {}", error.red());
    }

    if report.status != ShiftStatus::Completed {
        eyre::bail!("Shift to {} failed", role);
    }
    Ok(())
}

async fn handle_snapshot_command() -> Result<()> {
    let snapshot = SystemMonitor::new().snapshot().await.context("Failed to read resources")?;
    let state = if snapshot.is_critical() {
        "CRITICAL".red()
    } else if snapshot.is_warning() {
        "WARNING".yellow()
    } else {
        "OK".green()
    };
    println!("state: {}", state);
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();

    let config = GlobalConfig::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
