//! The task registry and its single run slot.
//!
//! `Tasks` holds every registered task in registration order and allows at most one of
//! them to run at a time. It is the only way to start or stop a task: `Task::start` and
//! `Task::stop` are crate-private, so the run slot always names the running task.
//!
//! Requests that cannot be honored (unknown name, busy slot, missing instruments) are
//! logged and returned as errors; none of them changes any task's state.
//!
//! ```compile_fail
//! use lab_automation::task::{Task, TaskEnv};
//!
//! fn bypass(task: &mut Task, env: &TaskEnv) {
//!     task.start(env).ok();
//! }
//! ```

use super::{Parameters, Task, TaskEnv};
use crate::error::{AppResult, LabError};
use tracing::{error, info, warn};

/// Registered tasks plus the shared environment they run in.
#[derive(Debug)]
pub struct Tasks {
    env: TaskEnv,
    tasks: Vec<Task>,
    running: Option<String>,
}

impl Tasks {
    /// Empty registry running tasks in `env`.
    pub fn new(env: TaskEnv) -> Self {
        Self {
            env,
            tasks: Vec::new(),
            running: None,
        }
    }

    /// Settings and connections handed to every task.
    pub fn env(&self) -> &TaskEnv {
        &self.env
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.name() == name)
    }

    /// Register a task. Names are unique; a duplicate is rejected.
    pub fn add_task(&mut self, task: Task) -> AppResult<()> {
        let name = task.name().to_string();
        if self.position(&name).is_some() {
            error!(task = %name, "Task already registered");
            return Err(LabError::DuplicateTask(name));
        }
        info!(task = %name, instruments = ?task.instrument_aliases(), "Task registered");
        self.tasks.push(task);
        Ok(())
    }

    /// Start the task `name` in the run slot.
    pub fn run_task(&mut self, name: &str) -> AppResult<()> {
        if let Some(running) = &self.running {
            warn!(task = %name, running = %running, "Another task is running, request ignored");
            return Err(LabError::TaskAlreadyRunning(running.clone()));
        }
        let Some(index) = self.position(name) else {
            error!(task = %name, "Unknown task");
            return Err(LabError::UnknownTask(name.to_string()));
        };
        let task = &mut self.tasks[index];

        let missing = self.env.connections.missing(task.instrument_aliases());
        if !missing.is_empty() {
            error!(task = %name, missing = ?missing, "Required instruments are not connected");
            return Err(LabError::MissingInstruments {
                task: name.to_string(),
                aliases: missing,
            });
        }

        task.start(&self.env)?;
        self.running = Some(name.to_string());
        Ok(())
    }

    /// Stop the running task, if any. Blocks until its threads are joined and its
    /// charts are saved.
    pub fn stop_task(&mut self) {
        let Some(name) = self.running.take() else {
            return;
        };
        if let Some(index) = self.position(&name) {
            self.tasks[index].stop(&self.env);
        }
    }

    /// Reap the running task if it has stopped itself. Call this periodically from the
    /// operator loop. Returns whether a task was reaped.
    pub fn check(&mut self) -> bool {
        let Some(name) = self.running.clone() else {
            return false;
        };
        let reaped = match self.position(&name) {
            Some(index) => self.tasks[index].check(&self.env),
            None => true,
        };
        if reaped {
            self.running = None;
        }
        reaped
    }

    /// Name of the task in the run slot.
    pub fn running_task(&self) -> Option<&str> {
        self.running.as_deref()
    }

    /// Look a task up by name.
    pub fn get_task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name() == name)
    }

    /// Task names in registration order.
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name().to_string()).collect()
    }

    /// Tasks in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Set one parameter of `name`; it applies from the next start.
    pub fn set_parameter(
        &mut self,
        name: &str,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> AppResult<()> {
        self.task_mut_or_err(name)?.parameters_mut().set(key, value);
        Ok(())
    }

    /// Merge `parameters` into the parameters of `name`.
    pub fn set_parameters(&mut self, name: &str, parameters: &Parameters) -> AppResult<()> {
        let task = self.task_mut_or_err(name)?;
        for (key, value) in parameters.iter() {
            task.parameters_mut().set(key, value);
        }
        Ok(())
    }

    /// Set the name used in output files of `name`.
    pub fn set_custom_alias(&mut self, name: &str, alias: impl Into<String>) -> AppResult<()> {
        self.task_mut_or_err(name)?.set_custom_alias(alias);
        Ok(())
    }

    fn task_mut_or_err(&mut self, name: &str) -> AppResult<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.name() == name)
            .ok_or_else(|| LabError::UnknownTask(name.to_string()))
    }
}

impl Drop for Tasks {
    fn drop(&mut self) {
        self.stop_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::instrument::Connections;
    use std::sync::Arc;
    use std::time::Duration;

    fn tasks(dir: &std::path::Path) -> Tasks {
        Tasks::new(TaskEnv::new(
            Arc::new(Settings {
                data_charts_path: dir.to_path_buf(),
                processor_interval_ms: 10,
                backup_switch: false,
                ..Default::default()
            }),
            Arc::new(Connections::new()),
        ))
    }

    fn idle_loop(name: &str) -> Task {
        Task::new(name, |ctx| {
            while !ctx.sleep(Duration::from_millis(5)) {}
            Ok(())
        })
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut tasks = tasks(dir.path());
        tasks.add_task(idle_loop("a")).unwrap();
        assert!(matches!(
            tasks.add_task(idle_loop("a")),
            Err(LabError::DuplicateTask(name)) if name == "a"
        ));
        assert_eq!(tasks.task_names(), vec!["a"]);
    }

    #[test]
    fn single_run_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut tasks = tasks(dir.path());
        tasks.add_task(idle_loop("a")).unwrap();
        tasks.add_task(idle_loop("b")).unwrap();

        tasks.run_task("a").unwrap();
        assert!(matches!(
            tasks.run_task("b"),
            Err(LabError::TaskAlreadyRunning(running)) if running == "a"
        ));
        assert!(!tasks.get_task("b").unwrap().is_running());
        assert_eq!(tasks.running_task(), Some("a"));

        tasks.stop_task();
        assert_eq!(tasks.running_task(), None);
        tasks.run_task("b").unwrap();
        assert_eq!(tasks.running_task(), Some("b"));
    }

    #[test]
    fn unknown_and_unresolved_tasks_do_not_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut tasks = tasks(dir.path());
        tasks
            .add_task(idle_loop("iv").with_instruments(["2400"]))
            .unwrap();

        assert!(matches!(
            tasks.run_task("nope"),
            Err(LabError::UnknownTask(_))
        ));
        match tasks.run_task("iv") {
            Err(LabError::MissingInstruments { task, aliases }) => {
                assert_eq!(task, "iv");
                assert_eq!(aliases, vec!["2400"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(tasks.running_task(), None);
        assert!(!tasks.get_task("iv").unwrap().is_running());
    }

    #[test]
    fn check_reaps_finished_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut tasks = tasks(dir.path());
        tasks
            .add_task(Task::new("oneshot", |_| Ok(())))
            .unwrap();
        tasks.run_task("oneshot").unwrap();

        let mut reaped = false;
        for _ in 0..200 {
            if tasks.check() {
                reaped = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(reaped);
        assert_eq!(tasks.running_task(), None);
        assert!(!tasks.check());
    }

    #[test]
    fn parameters_and_alias_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let mut tasks = tasks(dir.path());
        tasks.add_task(idle_loop("a")).unwrap();
        tasks.set_parameter("a", "interval_ms", "20").unwrap();
        tasks.set_custom_alias("a", "run7").unwrap();
        assert!(tasks.set_parameter("b", "x", "1").is_err());

        let task = tasks.get_task("a").unwrap();
        assert_eq!(task.parameters().get("interval_ms"), Some("20"));
        assert_eq!(task.custom_alias(), "run7");
    }

    #[test]
    fn names_keep_registration_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut tasks = tasks(dir.path());
        for name in ["zeta", "alpha", "mid"] {
            tasks.add_task(idle_loop(name)).unwrap();
        }
        assert_eq!(tasks.task_names(), vec!["zeta", "alpha", "mid"]);
        let names: Vec<_> = tasks.iter().map(Task::name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn slot_always_names_the_only_running_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut tasks = tasks(dir.path());
        for name in ["a", "b", "c"] {
            tasks.add_task(idle_loop(name)).unwrap();
        }
        let running = |tasks: &Tasks| -> Vec<String> {
            tasks
                .iter()
                .filter(|t| t.is_running())
                .map(|t| t.name().to_string())
                .collect()
        };

        tasks.run_task("a").unwrap();
        for other in ["b", "c"] {
            assert!(tasks.run_task(other).is_err());
        }
        assert_eq!(running(&tasks), vec!["a"]);
        assert_eq!(tasks.running_task(), Some("a"));

        tasks.stop_task();
        assert!(running(&tasks).is_empty());
        assert_eq!(tasks.running_task(), None);
    }
}
