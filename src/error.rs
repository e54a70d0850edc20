//! Custom error types for the application.
//!
//! This module defines the primary error type, `LabError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the kinds of errors that can occur, from I/O and configuration issues to
//! instrument and scheduling problems.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically parse or type errors in the
//!   JSON configuration file or the `LAB_` environment overrides.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine but is
//!   logically wrong (e.g. an unknown log level). Caught by `Settings::validate`.
//! - **`Io`** / **`Serialization`**: File system and JSON failures, mostly from chart
//!   persistence.
//! - **`Instrument`** / **`InstrumentNotFound`**: Communication failures and unresolved
//!   aliases. A missing instrument is a normal, locally handled condition: tasks log it and
//!   stop themselves.
//! - **`Transform`**: A chart formula failed for some raw sample.
//! - **`UnknownTask`**, **`DuplicateTask`**, **`TaskAlreadyRunning`**,
//!   **`MissingInstruments`**: Rejections from the task registry. The registry logs these
//!   and leaves its state untouched.
//!
//! By using `#[from]`, `LabError` can be created from underlying error types,
//! simplifying error handling throughout the crate with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, LabError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum LabError {
    /// Settings could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Settings loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File system or port I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An instrument failed to answer or reported an error.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// No registered instrument resolves the alias.
    #[error("No instrument matches alias '{0}'")]
    InstrumentNotFound(String),

    /// Serial port support was not compiled in.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// A transform could not turn a raw sample into a number.
    #[error("Transform error: {0}")]
    Transform(String),

    /// A task parameter is missing or malformed.
    #[error("Invalid parameter '{key}': {reason}")]
    Parameter {
        /// Parameter name
        key: String,
        /// What is wrong with it
        reason: String,
    },

    /// No task is registered under the name.
    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    /// A task with the same name is already registered.
    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    /// The run slot is taken by the named task.
    #[error("Task '{0}' is already running")]
    TaskAlreadyRunning(String),

    /// Aliases the task needs that no connected instrument resolves.
    #[error("Task '{task}' requires unavailable instruments: {}", aliases.join(", "))]
    MissingInstruments {
        /// Task that was asked to run
        task: String,
        /// Unresolved aliases
        aliases: Vec<String>,
    },

    /// Several cleanup steps failed.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<LabError>),
}

impl From<figment::Error> for LabError {
    fn from(value: figment::Error) -> Self {
        LabError::Config(Box::new(value))
    }
}

#[cfg(feature = "instrument_serial")]
impl From<serialport::Error> for LabError {
    fn from(value: serialport::Error) -> Self {
        LabError::Instrument(value.to_string())
    }
}

impl LabError {
    /// Whether the condition is expected during normal operation and handled locally
    /// (logged, task self-terminates) rather than being a fault in the process.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            LabError::Config(_)
                | LabError::Configuration(_)
                | LabError::SerialFeatureDisabled
                | LabError::ShutdownFailed(_)
        )
    }
}
