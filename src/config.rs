//! Configuration System using Figment
//!
//! Strongly-typed settings for the task runner, loaded from:
//! 1. built-in defaults
//! 2. a JSON file (created with the defaults when missing)
//! 3. environment variables prefixed with `LAB_` (nested keys split on `__`)
//!
//! Settings are loaded once at process start and shared as `Arc<Settings>`.
//!
//! # Example
//! ```no_run
//! use lab_automation::config::Settings;
//!
//! let settings = Settings::load_or_bootstrap("config/lab.json")?;
//! println!("Charts go to {}", settings.data_charts_path.display());
//! # Ok::<(), lab_automation::error::LabError>(())
//! ```

use crate::error::{AppResult, LabError};
use chrono::NaiveDate;
use figment::{
    providers::{Env, Format, Json, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default location of the settings file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/lab.json";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory where finished charts are written
    pub data_charts_path: PathBuf,
    /// Seconds between chart backups while a task runs
    pub backup_schedule: u64,
    /// Whether periodic backups are written at all
    pub backup_switch: bool,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Aliases matched against instrument identification strings during discovery
    pub instr_aliases: Vec<String>,
    /// Watchdog tick interval in milliseconds
    pub processor_interval_ms: u64,
    /// Serial discovery and transport settings
    pub serial: SerialSettings,
}

/// Output format of the log stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored (for development)
    Pretty,
    /// Single line per event
    Compact,
    /// One JSON object per event
    Json,
}

/// Serial port probing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Baud rates tried in order when probing a port
    pub baud_rates: Vec<u32>,
    /// Per-call read deadline in milliseconds
    pub timeout_ms: u64,
    /// Identification query sent while probing and verifying
    pub idn_command: String,
    /// Terminator appended to every command
    pub line_terminator: String,
    /// Ports to probe; empty means every port the OS reports
    pub ports: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_charts_path: PathBuf::from("data/charts"),
            backup_schedule: 60,
            backup_switch: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            instr_aliases: Vec::new(),
            processor_interval_ms: 1000,
            serial: SerialSettings::default(),
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rates: vec![9600, 19200, 38400, 57600, 115200],
            timeout_ms: 1000,
            idn_command: "*IDN?".to_string(),
            line_terminator: "\n".to_string(),
            ports: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, writing a default file first if none exists.
    ///
    /// Environment variables override the file, e.g. `LAB_LOG_LEVEL=debug` or
    /// `LAB_SERIAL__TIMEOUT_MS=5000`.
    pub fn load_or_bootstrap<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            Self::default().write_to(path)?;
            info!(path = %path.display(), "Created default configuration file");
        }
        let settings = Self::load_from(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a specific file path without bootstrapping.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings = Figment::from(Serialized::defaults(Self::default()))
            .merge(Json::file(path.as_ref()))
            .merge(Env::prefixed("LAB_").split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Write these settings as pretty JSON, creating parent directories.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(LabError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.processor_interval_ms == 0 {
            return Err(LabError::Configuration(
                "processor_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.backup_switch && self.backup_schedule == 0 {
            return Err(LabError::Configuration(
                "backup_schedule must be greater than zero when backup_switch is on".to_string(),
            ));
        }

        if self.serial.baud_rates.is_empty() {
            return Err(LabError::Configuration(
                "serial.baud_rates must list at least one rate".to_string(),
            ));
        }

        let mut aliases = HashSet::new();
        for alias in &self.instr_aliases {
            if !aliases.insert(alias.to_lowercase()) {
                return Err(LabError::Configuration(format!(
                    "Duplicate instrument alias: {}",
                    alias
                )));
            }
        }

        Ok(())
    }

    /// Watchdog tick interval
    pub fn processor_interval(&self) -> Duration {
        Duration::from_millis(self.processor_interval_ms)
    }

    /// Time between backups
    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup_schedule)
    }

    /// Dated directory that receives backups written on `date`.
    pub fn backup_dir(&self, date: NaiveDate) -> PathBuf {
        self.data_charts_path
            .join("backup")
            .join(date.format("%Y-%m-%d").to_string())
    }
}

impl SerialSettings {
    /// Per-call read deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
