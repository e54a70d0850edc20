//! Serial port SCPI transport and port discovery.
use super::connections::Prober;
use super::InstrumentIo;
use crate::config::SerialSettings;
use crate::error::{AppResult, LabError};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Text command transport over an RS-232 / USB-serial port.
pub struct SerialInstrument {
    port_name: String,
    port: Box<dyn SerialPort>,
    terminator: String,
    timeout: Duration,
    response_terminator: char,
}

impl SerialInstrument {
    /// Open `port_name` at `baud_rate`.
    ///
    /// `timeout` is the per-call deadline for reading a response.
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        timeout: Duration,
        terminator: impl Into<String>,
    ) -> AppResult<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(50))
            .open()?;
        debug!(port = port_name, baud_rate, "Serial port opened");
        Ok(Self {
            port_name: port_name.to_string(),
            port,
            terminator: terminator.into(),
            timeout,
            response_terminator: '\n',
        })
    }

    /// Character that ends a response (default `\n`).
    pub fn with_response_terminator(mut self, terminator: char) -> Self {
        self.response_terminator = terminator;
        self
    }

    fn send(&mut self, command: &str) -> AppResult<()> {
        let cmd = format!("{}{}", command, self.terminator);
        trace!(port = %self.port_name, command = %cmd.escape_default(), "Sending command");
        self.port.write_all(cmd.as_bytes()).map_err(|e| {
            LabError::Instrument(format!(
                "Failed to send command to '{}': {}",
                self.port_name, e
            ))
        })?;
        Ok(())
    }

    /// Read until the response terminator arrives or the deadline passes.
    fn read_response(&mut self, command: &str) -> AppResult<String> {
        let mut buffer = [0u8; 1024];
        let mut response = String::new();
        let start = Instant::now();

        while start.elapsed() < self.timeout {
            match self.port.read(&mut buffer) {
                Ok(n) if n > 0 => {
                    response.push_str(&String::from_utf8_lossy(&buffer[..n]));
                    if response.contains(self.response_terminator) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(LabError::Io(e)),
            }
        }

        trace!(port = %self.port_name, response = %response.escape_default(), "Received response");

        if !response.contains(self.response_terminator) && response.trim().is_empty() {
            return Err(LabError::Instrument(format!(
                "'{}' did not answer '{}' within {:?}",
                self.port_name, command, self.timeout
            )));
        }
        Ok(response.trim().to_string())
    }
}

impl InstrumentIo for SerialInstrument {
    fn write(&mut self, command: &str) -> AppResult<()> {
        self.send(command)
    }

    fn query(&mut self, command: &str) -> AppResult<String> {
        // Drop stale bytes from an earlier timed-out query.
        if let Err(e) = self.port.clear(serialport::ClearBuffer::Input) {
            debug!(port = %self.port_name, error = %e, "Failed to clear input buffer");
        }
        self.send(command)?;
        self.read_response(command)
    }

    fn resource(&self) -> String {
        self.port_name.clone()
    }
}

/// Probes the serial ports reported by the OS (or the configured list).
#[derive(Debug, Clone)]
pub struct SerialProber {
    settings: SerialSettings,
}

impl SerialProber {
    /// Create a new instance.
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }
}

impl Prober for SerialProber {
    fn candidate_ports(&self) -> AppResult<Vec<String>> {
        if !self.settings.ports.is_empty() {
            return Ok(self.settings.ports.clone());
        }
        Ok(serialport::available_ports()?
            .into_iter()
            .map(|p| p.port_name)
            .collect())
    }

    fn open(&self, port: &str, baud_rate: u32) -> AppResult<Box<dyn InstrumentIo>> {
        let instrument = SerialInstrument::open(
            port,
            baud_rate,
            self.settings.timeout(),
            self.settings.line_terminator.clone(),
        )?;
        Ok(Box::new(instrument))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_ports_take_precedence() {
        let prober = SerialProber::new(SerialSettings {
            ports: vec!["/dev/ttyUSB7".to_string()],
            ..Default::default()
        });
        assert_eq!(prober.candidate_ports().unwrap(), vec!["/dev/ttyUSB7"]);
    }

    #[test]
    fn opening_missing_port_fails() {
        let prober = SerialProber::new(SerialSettings::default());
        assert!(prober.open("/dev/does-not-exist-lab", 9600).is_err());
    }
}
