//! Instrument communication and the connection registry.
//!
//! Tasks see instruments as opaque text-command endpoints: `write` a SCPI command or
//! `query` one and get a trimmed response string back. Every concrete transport
//! (serial port, mock) implements [`InstrumentIo`]; the shared [`Instrument`] handle
//! serializes access to it.
use crate::error::AppResult;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

pub mod connections;
pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;

pub use connections::{Connections, InstrumentData, InstrumentEntry, Prober};

/// Text command transport to one physical instrument.
///
/// Implementations apply their own per-call deadline; callers are never preempted.
pub trait InstrumentIo: Send {
    /// Send a command that produces no response.
    fn write(&mut self, command: &str) -> AppResult<()>;

    /// Send a command and return its trimmed response.
    fn query(&mut self, command: &str) -> AppResult<String>;

    /// Resource name (port path, VISA address) for logs.
    fn resource(&self) -> String;
}

/// Cloneable, exclusively-locked handle to an instrument transport.
#[derive(Clone)]
pub struct Instrument {
    io: Arc<Mutex<Box<dyn InstrumentIo>>>,
}

impl Instrument {
    /// Create a new instance.
    pub fn new(io: Box<dyn InstrumentIo>) -> Self {
        Self {
            io: Arc::new(Mutex::new(io)),
        }
    }

    /// Send a command that produces no response.
    pub fn write(&self, command: &str) -> AppResult<()> {
        self.io
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(command)
    }

    /// Send a command and return its trimmed response.
    pub fn query(&self, command: &str) -> AppResult<String> {
        self.io
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .query(command)
    }

    /// Query and parse the response as a number.
    pub fn query_f64(&self, command: &str) -> AppResult<f64> {
        let response = self.query(command)?;
        response.trim().parse::<f64>().map_err(|e| {
            crate::error::LabError::Instrument(format!(
                "'{}' answered '{}', not a number: {}",
                command, response, e
            ))
        })
    }

    /// Resource name of the transport.
    pub fn resource(&self) -> String {
        self.io
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resource()
    }

    /// Whether two handles share the same transport.
    pub fn same_as(&self, other: &Instrument) -> bool {
        Arc::ptr_eq(&self.io, &other.io)
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("resource", &self.resource())
            .finish()
    }
}
