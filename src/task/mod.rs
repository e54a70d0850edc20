//! Measurement tasks and their lifecycle.
//!
//! A [`Task`] is a named unit of work registered once at startup and started and
//! stopped repeatedly by the operator. While running it owns two threads:
//!
//! - the **worker**, running the task function, which talks to instruments and appends
//!   samples to the task's charts;
//! - the **watchdog** ([`DataProcessor`]), which turns raw samples into processed ones,
//!   enforces sample caps and writes periodic backups.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start()──> Starting ──> Running ──stop()──> Stopping ──> Idle
//!                                   │                   ▲
//!                                   └──check() when ────┘
//!                                      exit flag is set
//! ```
//!
//! Cancellation is cooperative: `stop()` raises the exit flag and waits for the worker
//! to notice it. A worker blocked in an instrument call holds `stop()` until that call
//! returns. The instrument timeout is the only bound on that wait.
//!
//! When the worker function returns, whether with success, an error or a panic, the
//! exit flag is raised. The next `check()` reaps the task, so self-terminating tasks
//! need no operator action.

use crate::config::Settings;
use crate::data::chart::{Chart, ChartData};
use crate::data::processor::{snapshot_charts, ChartList, DataProcessor, ProcessorHandle};
use crate::data::storage::{
    chart_file_name, file_timestamp, merged_file_name, write_json_atomic, MergedCharts,
    MergedMetadata,
};
use crate::data::transform::Transform;
use crate::error::{AppResult, LabError};
use crate::instrument::{Connections, Instrument};
use chrono::Local;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod builtin;
pub mod exit;
pub mod parameters;
pub mod registry;

pub use exit::ExitFlag;
pub use parameters::Parameters;
pub use registry::Tasks;

/// Parameter selecting one merged output file instead of one file per chart.
pub const MERGE_CHART_FILES: &str = "merge_chart_files";

/// Body of a task, run on the worker thread.
pub type TaskFn = Arc<dyn Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync>;

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Registered, not running
    Idle,
    /// Threads being spawned
    Starting,
    /// Worker and watchdog running
    Running,
    /// Exit raised, threads being joined and charts saved
    Stopping,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Idle => write!(f, "Idle"),
            TaskState::Starting => write!(f, "Starting"),
            TaskState::Running => write!(f, "Running"),
            TaskState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Process-wide collaborators handed to tasks: settings and connected instruments.
#[derive(Debug, Clone)]
pub struct TaskEnv {
    /// Process settings.
    pub settings: Arc<Settings>,
    /// Connected instruments.
    pub connections: Arc<Connections>,
}

impl TaskEnv {
    /// Create a new instance.
    pub fn new(settings: Arc<Settings>, connections: Arc<Connections>) -> Self {
        Self {
            settings,
            connections,
        }
    }
}

/// What a running task function sees.
pub struct TaskContext {
    name: String,
    parameters: Parameters,
    exit: ExitFlag,
    charts: ChartList,
    env: TaskEnv,
}

impl TaskContext {
    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameters as they were when the task started.
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Shared exit flag of the run.
    pub fn exit(&self) -> &ExitFlag {
        &self.exit
    }

    /// Whether the task has been asked to stop. Poll this at loop boundaries.
    pub fn should_stop(&self) -> bool {
        self.exit.is_set()
    }

    /// Stop the task from inside (fatal error, finished sweep).
    pub fn request_stop(&self) {
        self.exit.set();
    }

    /// Process settings.
    pub fn settings(&self) -> &Settings {
        &self.env.settings
    }

    /// Instrument resolving `alias`, if connected.
    pub fn instrument(&self, alias: &str) -> Option<Instrument> {
        self.env.connections.get_instrument(alias)
    }

    /// Resolve an instrument or stop the task.
    ///
    /// A missing instrument is logged and raises the exit flag; the returned error lets
    /// the task function return early with `?`.
    pub fn require_instrument(&self, alias: &str) -> AppResult<Instrument> {
        self.instrument(alias).ok_or_else(|| {
            error!(task = %self.name, alias, "Instrument not available, stopping task");
            self.exit.set();
            LabError::InstrumentNotFound(alias.to_string())
        })
    }

    /// Create a chart owned by this run and hand it to the watchdog.
    pub fn add_chart(&self, data: ChartData, x: Transform, y: Transform) -> Arc<Chart> {
        let chart = Arc::new(Chart::with_transforms(data, x, y));
        self.charts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(chart.clone());
        debug!(task = %self.name, chart = %chart.name(), "Chart added");
        chart
    }

    /// Sleep up to `duration`, returning early with `true` if the task is stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.exit.wait_timeout(duration)
    }
}

/// A named measurement routine plus the state of its current run.
pub struct Task {
    name: String,
    description: String,
    instrument_aliases: BTreeSet<String>,
    function: TaskFn,
    charts: ChartList,
    exit: ExitFlag,
    parameters: Parameters,
    custom_alias: String,
    state: TaskState,
    worker: Option<JoinHandle<()>>,
    processor: Option<ProcessorHandle>,
    last_saved: Vec<PathBuf>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("instrument_aliases", &self.instrument_aliases)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Idle task running `function` on each start.
    pub fn new<F>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            instrument_aliases: BTreeSet::new(),
            function: Arc::new(function),
            charts: Arc::new(Mutex::new(Vec::new())),
            exit: ExitFlag::new(),
            parameters: Parameters::new(),
            custom_alias: String::new(),
            state: TaskState::Idle,
            worker: None,
            processor: None,
            last_saved: Vec::new(),
        }
    }

    /// One-line description shown by the CLI.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Aliases that must resolve in the connection registry before the task may run.
    pub fn with_instruments<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instrument_aliases
            .extend(aliases.into_iter().map(Into::into));
        self
    }

    /// Default value of one parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.set(key, value);
        self
    }

    /// Replace all parameters.
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One-line description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Aliases that must resolve before the task may run.
    pub fn instrument_aliases(&self) -> &BTreeSet<String> {
        &self.instrument_aliases
    }

    /// Current parameters.
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Edits take effect on the next start.
    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }

    /// Alias used in file names; empty means the task name.
    pub fn custom_alias(&self) -> &str {
        &self.custom_alias
    }

    /// Name used in output files instead of the task name; empty to reset.
    pub fn set_custom_alias(&mut self, alias: impl Into<String>) {
        self.custom_alias = alias.into();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Whether the task is anywhere between start and the end of stop.
    pub fn is_running(&self) -> bool {
        self.state != TaskState::Idle
    }

    /// Exit flag shared with the worker and watchdog.
    pub fn exit_flag(&self) -> &ExitFlag {
        &self.exit
    }

    /// Charts of the current run.
    pub fn charts(&self) -> Vec<Arc<Chart>> {
        snapshot_charts(&self.charts)
    }

    /// Files written by the most recent stop.
    pub fn last_saved(&self) -> &[PathBuf] {
        &self.last_saved
    }

    /// Name used in output file names.
    fn file_alias(&self) -> &str {
        if self.custom_alias.is_empty() {
            &self.name
        } else {
            &self.custom_alias
        }
    }

    /// Start the worker and watchdog threads. A running task is left alone.
    pub(crate) fn start(&mut self, env: &TaskEnv) -> AppResult<()> {
        if self.is_running() {
            warn!(task = %self.name, state = %self.state, "Task already running, start ignored");
            return Ok(());
        }

        self.state = TaskState::Starting;
        self.exit.clear();
        self.charts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let context = TaskContext {
            name: self.name.clone(),
            parameters: self.parameters.clone(),
            exit: self.exit.clone(),
            charts: self.charts.clone(),
            env: env.clone(),
        };
        let function = self.function.clone();
        let exit = self.exit.clone();
        let name = self.name.clone();

        let worker = thread::Builder::new()
            .name(format!("task-{}", self.name))
            .spawn(move || {
                match catch_unwind(AssertUnwindSafe(|| function(&context))) {
                    Ok(Ok(())) => info!(task = %name, "Task function finished"),
                    Ok(Err(e)) => error!(task = %name, error = %format!("{:#}", e), "Task function failed"),
                    Err(_) => error!(task = %name, "Task function panicked"),
                }
                exit.set();
            });
        let worker = match worker {
            Ok(handle) => handle,
            Err(e) => {
                self.state = TaskState::Idle;
                return Err(e.into());
            }
        };

        let processor = DataProcessor::new(
            self.name.clone(),
            self.charts.clone(),
            self.exit.clone(),
            env.settings.clone(),
        )
        .spawn();
        let processor = match processor {
            Ok(handle) => handle,
            Err(e) => {
                self.exit.set();
                if worker.join().is_err() {
                    error!(task = %self.name, "Task thread panicked");
                }
                self.state = TaskState::Idle;
                return Err(e);
            }
        };

        self.worker = Some(worker);
        self.processor = Some(processor);
        self.state = TaskState::Running;
        info!(task = %self.name, parameters = ?self.parameters, "Task started");
        Ok(())
    }

    /// Signal the worker, wait for it and the watchdog, save the charts and return to
    /// idle.
    pub(crate) fn stop(&mut self, env: &TaskEnv) {
        if !self.is_running() {
            debug!(task = %self.name, "Task not running, stop ignored");
            return;
        }
        info!(task = %self.name, "Stopping task");
        self.state = TaskState::Stopping;
        self.exit.set();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(task = %self.name, "Worker thread panicked");
            }
        }
        if let Some(processor) = self.processor.take() {
            processor.join();
        }

        let charts = snapshot_charts(&self.charts);
        DataProcessor::process_once(&self.name, &charts, &self.exit);

        self.last_saved = match self.persist(&charts, &env.settings) {
            Ok(paths) => paths,
            Err(e) => {
                error!(task = %self.name, error = %e, "Failed to save chart data");
                Vec::new()
            }
        };

        self.charts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.state = TaskState::Idle;
        info!(task = %self.name, files = self.last_saved.len(), "Task stopped");
    }

    /// Reap the task if it stopped itself. Returns whether it was stopped.
    pub(crate) fn check(&mut self, env: &TaskEnv) -> bool {
        if self.state == TaskState::Running && self.exit.is_set() {
            info!(task = %self.name, "Task signalled exit");
            self.stop(env);
            true
        } else {
            false
        }
    }

    fn persist(&self, charts: &[Arc<Chart>], settings: &Settings) -> AppResult<Vec<PathBuf>> {
        if charts.is_empty() {
            return Ok(Vec::new());
        }
        let merge = self
            .parameters
            .get_bool_or(MERGE_CHART_FILES, false)
            .unwrap_or_else(|e| {
                warn!(task = %self.name, error = %e, "Ignoring malformed parameter");
                false
            });
        let dir = &settings.data_charts_path;
        let timestamp = file_timestamp(Local::now());
        let alias = self.file_alias();

        if merge {
            let merged = MergedCharts {
                charts: charts.iter().map(|c| c.snapshot(true)).collect(),
                metadata: MergedMetadata {
                    task_name: self.name.clone(),
                    custom_alias: self.custom_alias.clone(),
                    timestamp: timestamp.clone(),
                },
            };
            let path = dir.join(merged_file_name(alias, &timestamp));
            write_json_atomic(&path, &merged)?;
            info!(task = %self.name, path = %path.display(), "Charts saved");
            return Ok(vec![path]);
        }

        let mut saved = Vec::new();
        let mut errors = Vec::new();
        for chart in charts {
            let path = dir.join(chart_file_name(&chart.name(), alias, &timestamp));
            match chart.save_json(&path, true) {
                Ok(()) => {
                    info!(task = %self.name, path = %path.display(), "Chart saved");
                    saved.push(path);
                }
                Err(e) => {
                    error!(task = %self.name, chart = %chart.name(), error = %e, "Failed to save chart");
                    errors.push(e);
                }
            }
        }
        if saved.is_empty() && !errors.is_empty() {
            return Err(LabError::ShutdownFailed(errors));
        }
        Ok(saved)
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // Let detached threads wind down if the task was never stopped.
        self.exit.set();
    }
}
