//! # Lab Automation Core Library
//!
//! Runs operator-selected measurement tasks against serially connected instruments and
//! stores what they measure. The binary (`main.rs`) is a thin CLI over this library.
//!
//! ## Crate Structure
//!
//! - **`config`**: `Settings` loaded with figment from defaults, a JSON file and `LAB_`
//!   environment variables.
//! - **`data`**: charts (paired raw/processed series with per-axis transforms), the
//!   per-task watchdog that processes and backs them up, and JSON persistence.
//! - **`error`**: the crate-wide `LabError` enum.
//! - **`instrument`**: the `InstrumentIo` transport trait, serial and mock transports,
//!   and the `Connections` registry that discovers instruments and resolves aliases.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`task`**: `Task` lifecycle (worker + watchdog threads, cooperative stop, save on
//!   stop) and the single-slot `Tasks` registry.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lab_automation::config::Settings;
//! use lab_automation::instrument::Connections;
//! use lab_automation::task::{builtin, TaskEnv, Tasks};
//!
//! let env = TaskEnv::new(Arc::new(Settings::default()), Arc::new(Connections::new()));
//! let mut tasks = Tasks::new(env);
//! builtin::register_builtin(&mut tasks)?;
//! tasks.run_task(builtin::SYNTHETIC_SINE)?;
//! std::thread::sleep(std::time::Duration::from_secs(2));
//! tasks.stop_task();
//! # Ok::<(), lab_automation::error::LabError>(())
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod task;
