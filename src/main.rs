//! CLI entry point for lab_automation
//!
//! Provides a command-line interface for:
//! - writing the default configuration file
//! - probing serial ports for instruments
//! - listing and running measurement tasks
//!
//! # Usage
//!
//! ```bash
//! lab_automation init-config
//! lab_automation instruments
//! lab_automation run synthetic_sine --param period_s=2 --param points=200 --alias demo
//! lab_automation run poll_query --param alias=34401 --param command=MEAS:VOLT?
//! ```
//!
//! `run` blocks until the task stops itself or Ctrl-C is pressed; the task's charts are
//! saved under `data_charts_path` in both cases.

use anyhow::Result;
use clap::{Parser, Subcommand};
use lab_automation::config::{Settings, DEFAULT_CONFIG_PATH};
use lab_automation::error::{AppResult, LabError};
use lab_automation::instrument::Connections;
use lab_automation::logging;
use lab_automation::task::builtin::{builtin_tasks, register_builtin};
use lab_automation::task::parameters::parse_assignment;
use lab_automation::task::{TaskEnv, Tasks};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::block_in_place;
use tracing::{info, warn};

/// How often the run loop reaps self-terminated tasks.
const CHECK_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "lab_automation")]
#[command(about = "Run measurement tasks against serially connected instruments", long_about = None)]
struct Cli {
    /// Settings file (created with defaults when missing)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default settings file if missing and print the effective settings
    InitConfig,

    /// Probe serial ports and list the instruments that answer
    Instruments,

    /// List the available tasks and their default parameters
    Tasks,

    /// Run a task until it finishes or Ctrl-C is pressed
    Run {
        /// Task name
        task: String,

        /// Parameter override, as key=value (repeatable)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Name used in output file names instead of the task name
        #[arg(long)]
        alias: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_or_bootstrap(&cli.config)?;
    logging::init_from_settings(&settings)?;
    let settings = Arc::new(settings);

    match cli.command {
        Commands::InitConfig => print_settings(&cli.config, &settings),
        Commands::Instruments => list_instruments(&settings),
        Commands::Tasks => list_tasks(),
        Commands::Run {
            task,
            params,
            alias,
        } => run_task(settings, task, params, alias).await,
    }
}

fn print_settings(path: &std::path::Path, settings: &Settings) -> Result<()> {
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}

#[cfg(feature = "instrument_serial")]
fn discover(settings: &Settings, connections: &Connections) -> AppResult<usize> {
    use lab_automation::instrument::serial::SerialProber;

    let prober = SerialProber::new(settings.serial.clone());
    connections.fetch_all_instruments(
        &settings.instr_aliases,
        &prober,
        &settings.serial.baud_rates,
        &settings.serial.idn_command,
    )
}

#[cfg(not(feature = "instrument_serial"))]
fn discover(_settings: &Settings, _connections: &Connections) -> AppResult<usize> {
    Err(LabError::SerialFeatureDisabled)
}

fn list_instruments(settings: &Settings) -> Result<()> {
    let connections = Connections::new();
    discover(settings, &connections)?;
    if connections.is_empty() {
        println!("No instruments found");
    }
    for data in connections.list() {
        println!(
            "{:<16} {:>7} baud  alias={:<12} {}",
            data.port, data.baud_rate, data.alias, data.idn
        );
    }
    Ok(())
}

fn list_tasks() -> Result<()> {
    for task in builtin_tasks() {
        println!("{}  {}", task.name(), task.description());
        for (key, value) in task.parameters().iter() {
            println!("    {} = {}", key, value);
        }
    }
    Ok(())
}

async fn run_task(
    settings: Arc<Settings>,
    name: String,
    params: Vec<String>,
    alias: Option<String>,
) -> Result<()> {
    let connections = Arc::new(Connections::new());
    match block_in_place(|| discover(&settings, &connections)) {
        Ok(found) => info!(found, "Instruments discovered"),
        Err(LabError::SerialFeatureDisabled) => {
            warn!("Serial support not compiled in, running without instruments")
        }
        Err(e) => warn!(error = %e, "Instrument discovery failed"),
    }

    let mut tasks = Tasks::new(TaskEnv::new(settings, connections));
    register_builtin(&mut tasks)?;
    for assignment in &params {
        let (key, value) = parse_assignment(assignment)?;
        tasks.set_parameter(&name, key, value)?;
    }
    if let Some(alias) = alias {
        tasks.set_custom_alias(&name, alias)?;
    }

    block_in_place(|| tasks.run_task(&name))?;
    println!("Running '{}', press Ctrl-C to stop", name);

    let mut ticker = tokio::time::interval(CHECK_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                info!(task = %name, "Interrupted, stopping task");
                block_in_place(|| tasks.stop_task());
                break;
            }
            _ = ticker.tick() => {
                if block_in_place(|| tasks.check()) {
                    break;
                }
            }
        }
    }

    if let Some(task) = tasks.get_task(&name) {
        for path in task.last_saved() {
            println!("Saved {}", path.display());
        }
    }
    Ok(())
}
