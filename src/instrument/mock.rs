//! A scripted in-memory instrument for tests and demonstrations.
//!
//! Responses are looked up by exact command. Every command received is recorded so
//! tests can assert on the traffic.
use super::InstrumentIo;
use crate::error::{AppResult, LabError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

#[derive(Debug, Default)]
struct MockState {
    responses: HashMap<String, String>,
    log: Vec<String>,
    failing: bool,
}

/// In-memory instrument answering from a response table.
#[derive(Debug, Clone)]
pub struct MockInstrument {
    resource: String,
    state: Arc<Mutex<MockState>>,
}

impl MockInstrument {
    /// Mock with an empty response table.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Identification string answered to `*IDN?`.
    pub fn with_idn(self, idn: impl Into<String>) -> Self {
        self.with_response("*IDN?", idn)
    }

    /// Answer `command` with `response`.
    pub fn with_response(self, command: impl Into<String>, response: impl Into<String>) -> Self {
        self.set_response(command, response);
        self
    }

    /// Answer `command` with `response` from now on.
    pub fn set_response(&self, command: impl Into<String>, response: impl Into<String>) {
        self.state().responses.insert(command.into(), response.into());
    }

    /// Make every following call fail, as a disconnected device would.
    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    /// Commands received so far, in order.
    pub fn received(&self) -> Vec<String> {
        self.state().log.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_connected(&self, state: &MockState) -> AppResult<()> {
        if state.failing {
            Err(LabError::Instrument(format!(
                "{}: device not responding",
                self.resource
            )))
        } else {
            Ok(())
        }
    }
}

impl InstrumentIo for MockInstrument {
    fn write(&mut self, command: &str) -> AppResult<()> {
        let mut state = self.state();
        self.check_connected(&state)?;
        trace!(resource = %self.resource, command, "mock write");
        state.log.push(command.to_string());
        Ok(())
    }

    fn query(&mut self, command: &str) -> AppResult<String> {
        let mut state = self.state();
        self.check_connected(&state)?;
        state.log.push(command.to_string());
        state.responses.get(command).cloned().ok_or_else(|| {
            LabError::Instrument(format!(
                "{}: no response to '{}' (timeout)",
                self.resource, command
            ))
        })
    }

    fn resource(&self) -> String {
        self.resource.clone()
    }
}
