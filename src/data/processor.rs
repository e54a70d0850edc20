//! Watchdog that keeps a running task's charts processed and backed up.
//!
//! One `DataProcessor` thread runs per running task, next to the task's worker thread.
//! Each tick it:
//! 1. stops the task (raises its exit flag) when a chart passes its sample cap,
//! 2. applies each chart's transforms to newly arrived raw samples,
//! 3. writes dated backups of every chart when the backup interval has elapsed.
//!
//! The loop exits only after it has observed the exit flag *and* completed one more
//! pass, so the last batch of raw samples is flushed. Failures in one chart, whether
//! a bad formula or a failed backup write, are logged and never stop the loop.

use super::chart::Chart;
use super::storage::{backup_file_name, file_timestamp};
use crate::config::Settings;
use crate::error::AppResult;
use crate::task::exit::ExitFlag;
use chrono::Local;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Charts owned by a task, shared with its worker and watchdog.
pub type ChartList = Arc<Mutex<Vec<Arc<Chart>>>>;

/// Copy of the chart handles so the list lock is not held while processing.
pub fn snapshot_charts(charts: &ChartList) -> Vec<Arc<Chart>> {
    charts
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Per-task watchdog.
pub struct DataProcessor {
    task_name: String,
    charts: ChartList,
    exit: ExitFlag,
    settings: Arc<Settings>,
    interval: Duration,
    last_backup: Instant,
}

/// Handle to a spawned watchdog thread.
pub struct ProcessorHandle {
    task_name: String,
    handle: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Wait for the watchdog to finish its final pass.
    pub fn join(self) {
        if self.handle.join().is_err() {
            error!(task = %self.task_name, "Watchdog thread panicked");
        }
    }

    /// Whether the watchdog thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl DataProcessor {
    /// Watchdog for `charts`, ticking at the configured processor interval.
    pub fn new(
        task_name: impl Into<String>,
        charts: ChartList,
        exit: ExitFlag,
        settings: Arc<Settings>,
    ) -> Self {
        let interval = settings.processor_interval();
        Self {
            task_name: task_name.into(),
            charts,
            exit,
            settings,
            interval,
            last_backup: Instant::now(),
        }
    }

    /// Override the tick interval taken from the settings.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start the watchdog on its own named thread.
    pub fn spawn(self) -> AppResult<ProcessorHandle> {
        let task_name = self.task_name.clone();
        let handle = thread::Builder::new()
            .name(format!("watchdog-{}", task_name))
            .spawn(move || self.run())?;
        Ok(ProcessorHandle { task_name, handle })
    }

    fn run(mut self) {
        info!(task = %self.task_name, interval_ms = self.interval.as_millis() as u64, "Watchdog started");
        loop {
            let final_pass = self.exit.is_set();
            let charts = snapshot_charts(&self.charts);

            Self::process_once(&self.task_name, &charts, &self.exit);

            if self.backup_due() {
                self.backup(&charts);
            }

            if final_pass {
                break;
            }
            self.exit.wait_timeout(self.interval);
        }
        info!(task = %self.task_name, "Watchdog stopped");
    }

    /// One tick over `charts`: sample-cap check then transform application.
    ///
    /// Returns the number of charts that failed this tick.
    pub fn process_once(task_name: &str, charts: &[Arc<Chart>], exit: &ExitFlag) -> usize {
        let mut failures = 0;
        for chart in charts {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if chart.sample_cap_exceeded() && !exit.is_set() {
                    info!(task = %task_name, chart = %chart.name(), "Sample limit reached, stopping task");
                    exit.set();
                }
                chart.apply_transforms()
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(task = %task_name, chart = %chart.name(), error = %e, "Failed to process chart");
                }
                Err(_) => {
                    failures += 1;
                    error!(task = %task_name, chart = %chart.name(), "Chart processing panicked");
                }
            }
        }
        failures
    }

    fn backup_due(&self) -> bool {
        self.settings.backup_switch && self.last_backup.elapsed() >= self.settings.backup_interval()
    }

    fn backup(&mut self, charts: &[Arc<Chart>]) {
        let now = Local::now();
        let dir = self.settings.backup_dir(now.date_naive());
        let timestamp = file_timestamp(now);
        for chart in charts {
            let path = dir.join(backup_file_name(&chart.name(), &timestamp));
            match chart.save_json_atomic(&path, true) {
                Ok(()) => debug!(task = %self.task_name, path = %path.display(), "Chart backed up"),
                Err(e) => error!(
                    task = %self.task_name,
                    chart = %chart.name(),
                    error = %e,
                    "Backup failed"
                ),
            }
        }
        self.last_backup = Instant::now();
    }
}
