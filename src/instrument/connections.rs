//! Instrument connection registry.
//!
//! `Connections` owns every discovered instrument handle. Entries are keyed by their
//! port (the stable identifier of a physical connection) and kept in registration
//! order. Tasks look instruments up by alias:
//!
//! - an entry matches when its alias equals the requested alias, or its identification
//!   string contains it, both compared case-insensitively;
//! - the **first** match in registration order wins. Substring matching can be
//!   ambiguous; the order is part of the contract.
//!
//! Entries are added by discovery ([`Connections::fetch_all_instruments`]) or
//! explicitly ([`Connections::register`]), and removed only when
//! [`Connections::verify`] finds them unresponsive, or by [`Connections::remove`].

use super::{Instrument, InstrumentIo};
use crate::error::AppResult;
use serde::Serialize;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Identification data of a connected instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentData {
    /// Port name; unique per entry.
    pub port: String,
    /// Baud rate the instrument answered at.
    pub baud_rate: u32,
    /// Trimmed identification response.
    pub idn: String,
    /// Alias tasks use to find the instrument.
    pub alias: String,
}

impl InstrumentData {
    fn matches(&self, alias: &str) -> bool {
        let needle = alias.to_lowercase();
        self.alias.to_lowercase() == needle || self.idn.to_lowercase().contains(&needle)
    }
}

/// One registered instrument: its data and the exclusive transport handle.
#[derive(Debug, Clone)]
pub struct InstrumentEntry {
    /// Identification data.
    pub data: InstrumentData,
    /// Shared transport handle.
    pub handle: Instrument,
}

/// Opens transports on candidate ports during discovery.
pub trait Prober {
    /// Ports worth probing.
    fn candidate_ports(&self) -> AppResult<Vec<String>>;

    /// Open a transport on `port` at `baud_rate`.
    fn open(&self, port: &str, baud_rate: u32) -> AppResult<Box<dyn InstrumentIo>>;
}

/// Registry of connected instruments.
#[derive(Debug, Default)]
pub struct Connections {
    instruments: RwLock<Vec<InstrumentEntry>>,
}

impl Connections {
    /// Create a new instance.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<InstrumentEntry>> {
        self.instruments.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<InstrumentEntry>> {
        self.instruments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an instrument. An existing entry on the same port is replaced in place.
    pub fn register(&self, data: InstrumentData, io: Box<dyn InstrumentIo>) -> Instrument {
        let handle = Instrument::new(io);
        let entry = InstrumentEntry {
            data,
            handle: handle.clone(),
        };
        let mut instruments = self.write();
        info!(port = %entry.data.port, alias = %entry.data.alias, idn = %entry.data.idn, "Instrument registered");
        match instruments.iter_mut().find(|e| e.data.port == entry.data.port) {
            Some(existing) => *existing = entry,
            None => instruments.push(entry),
        }
        handle
    }

    /// First instrument matching `alias`, in registration order.
    pub fn get_instrument(&self, alias: &str) -> Option<Instrument> {
        self.read()
            .iter()
            .find(|e| e.data.matches(alias))
            .map(|e| e.handle.clone())
    }

    /// Identification data of the instrument `get_instrument` would return.
    pub fn get_data(&self, alias: &str) -> Option<InstrumentData> {
        self.read()
            .iter()
            .find(|e| e.data.matches(alias))
            .map(|e| e.data.clone())
    }

    /// Aliases from `aliases` that no registered instrument resolves.
    pub fn missing<'a, I>(&self, aliases: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        aliases
            .into_iter()
            .filter(|alias| self.get_instrument(alias).is_none())
            .cloned()
            .collect()
    }

    /// Data of every entry, in registration order.
    pub fn list(&self) -> Vec<InstrumentData> {
        self.read().iter().map(|e| e.data.clone()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove the entry on `port`. Returns whether one existed.
    pub fn remove(&self, port: &str) -> bool {
        let mut instruments = self.write();
        let before = instruments.len();
        instruments.retain(|e| e.data.port != port);
        before != instruments.len()
    }

    /// Probe candidate ports and register every instrument that identifies itself.
    ///
    /// Each unregistered port is opened at each baud rate in turn until `idn_command`
    /// gets a non-empty answer. The entry's alias is the first of `aliases` contained in
    /// the identification string, or the identification string itself. Returns the
    /// number of newly registered instruments.
    pub fn fetch_all_instruments(
        &self,
        aliases: &[String],
        prober: &dyn Prober,
        baud_rates: &[u32],
        idn_command: &str,
    ) -> AppResult<usize> {
        let ports = prober.candidate_ports()?;
        let mut found = 0;
        for port in ports {
            if self.read().iter().any(|e| e.data.port == port) {
                debug!(port = %port, "Port already registered, skipping");
                continue;
            }
            if let Some((data, io)) = probe_port(prober, &port, aliases, baud_rates, idn_command) {
                self.register(data, io);
                found += 1;
            }
        }
        info!(found, total = self.len(), "Instrument discovery finished");
        Ok(found)
    }

    /// Re-identify every instrument and drop the ones that no longer answer.
    ///
    /// Returns the removed entries' data.
    pub fn verify(&self, idn_command: &str) -> Vec<InstrumentData> {
        let entries: Vec<InstrumentEntry> = self.read().clone();
        let mut removed = Vec::new();
        for entry in entries {
            match entry.handle.query(idn_command) {
                Ok(response) if !response.trim().is_empty() => {}
                Ok(_) => {
                    warn!(port = %entry.data.port, "Instrument returned empty identification, removing");
                    removed.push(entry.data);
                }
                Err(e) => {
                    warn!(port = %entry.data.port, error = %e, "Instrument verification failed, removing");
                    removed.push(entry.data);
                }
            }
        }
        if !removed.is_empty() {
            self.write().retain(|e| !removed.iter().any(|r| r.port == e.data.port));
        }
        removed
    }
}

fn probe_port(
    prober: &dyn Prober,
    port: &str,
    aliases: &[String],
    baud_rates: &[u32],
    idn_command: &str,
) -> Option<(InstrumentData, Box<dyn InstrumentIo>)> {
    for &baud_rate in baud_rates {
        let mut io = match prober.open(port, baud_rate) {
            Ok(io) => io,
            Err(e) => {
                debug!(port, baud_rate, error = %e, "Could not open port");
                continue;
            }
        };
        match io.query(idn_command) {
            Ok(idn) if !idn.trim().is_empty() => {
                let idn = idn.trim().to_string();
                let lower = idn.to_lowercase();
                let alias = aliases
                    .iter()
                    .find(|a| lower.contains(&a.to_lowercase()))
                    .cloned()
                    .unwrap_or_else(|| idn.clone());
                return Some((
                    InstrumentData {
                        port: port.to_string(),
                        baud_rate,
                        idn,
                        alias,
                    },
                    io,
                ));
            }
            Ok(_) => debug!(port, baud_rate, "Empty identification response"),
            Err(e) => debug!(port, baud_rate, error = %e, "No identification response"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LabError;
    use crate::instrument::mock::MockInstrument;
    use std::collections::HashMap;

    fn data(port: &str, idn: &str, alias: &str) -> InstrumentData {
        InstrumentData {
            port: port.into(),
            baud_rate: 9600,
            idn: idn.into(),
            alias: alias.into(),
        }
    }

    /// Devices answer only at their own baud rate.
    struct FakeBus {
        devices: HashMap<String, (u32, MockInstrument)>,
    }

    impl Prober for FakeBus {
        fn candidate_ports(&self) -> AppResult<Vec<String>> {
            let mut ports: Vec<_> = self.devices.keys().cloned().collect();
            ports.sort();
            Ok(ports)
        }

        fn open(&self, port: &str, baud_rate: u32) -> AppResult<Box<dyn InstrumentIo>> {
            match self.devices.get(port) {
                Some((rate, mock)) if *rate == baud_rate => Ok(Box::new(mock.clone())),
                Some(_) => Ok(Box::new(MockInstrument::new(port))),
                None => Err(LabError::Instrument(format!("{} missing", port))),
            }
        }
    }

    #[test]
    fn lookup_is_case_insensitive_substring_first_match() {
        let connections = Connections::new();
        connections.register(
            data("COM1", "KEITHLEY INSTRUMENTS INC.,MODEL 2400,1", "2400"),
            Box::new(MockInstrument::new("COM1")),
        );
        connections.register(
            data("COM2", "KEITHLEY INSTRUMENTS INC.,MODEL 2182A,2", "2182"),
            Box::new(MockInstrument::new("COM2")),
        );

        let first = connections.get_instrument("keithley").unwrap();
        assert_eq!(first.resource(), "COM1");
        assert_eq!(
            connections.get_instrument("model 2182a").unwrap().resource(),
            "COM2"
        );
        assert_eq!(connections.get_instrument("2182").unwrap().resource(), "COM2");
        assert!(connections.get_instrument("agilent").is_none());
    }

    #[test]
    fn register_same_port_replaces_in_place() {
        let connections = Connections::new();
        connections.register(data("COM1", "A", "a"), Box::new(MockInstrument::new("COM1")));
        connections.register(data("COM2", "B", "b"), Box::new(MockInstrument::new("COM2")));
        connections.register(data("COM1", "C", "c"), Box::new(MockInstrument::new("COM1")));

        let list = connections.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].idn, "C");
        assert!(connections.get_instrument("a").is_none());
    }

    #[test]
    fn discovery_tries_baud_rates_and_assigns_aliases() {
        let mut devices = HashMap::new();
        devices.insert(
            "/dev/ttyUSB0".to_string(),
            (
                19200,
                MockInstrument::new("/dev/ttyUSB0").with_idn("KEITHLEY,MODEL 2400,42,C30\n"),
            ),
        );
        devices.insert(
            "/dev/ttyUSB1".to_string(),
            (9600, MockInstrument::new("/dev/ttyUSB1").with_idn("ACME,PSU-1,7,1.0")),
        );
        let bus = FakeBus { devices };
        let connections = Connections::new();

        let found = connections
            .fetch_all_instruments(&["2400".to_string()], &bus, &[9600, 19200], "*IDN?")
            .unwrap();

        assert_eq!(found, 2);
        let list = connections.list();
        assert_eq!(list[0].port, "/dev/ttyUSB0");
        assert_eq!(list[0].baud_rate, 19200);
        assert_eq!(list[0].alias, "2400");
        assert_eq!(list[0].idn, "KEITHLEY,MODEL 2400,42,C30");
        assert_eq!(list[1].alias, "ACME,PSU-1,7,1.0");

        // Already registered ports are skipped on a second pass.
        let again = connections
            .fetch_all_instruments(&[], &bus, &[9600, 19200], "*IDN?")
            .unwrap();
        assert_eq!(again, 0);
        assert_eq!(connections.len(), 2);
    }

    #[test]
    fn verify_removes_unresponsive_entries() {
        let connections = Connections::new();
        let alive = MockInstrument::new("COM1").with_idn("ALIVE");
        let dead = MockInstrument::new("COM2").with_idn("DEAD");
        connections.register(data("COM1", "ALIVE", "alive"), Box::new(alive));
        connections.register(data("COM2", "DEAD", "dead"), Box::new(dead.clone()));
        dead.set_failing(true);

        let removed = connections.verify("*IDN?");

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].port, "COM2");
        assert_eq!(connections.len(), 1);
        assert!(connections.get_instrument("alive").is_some());
    }

    #[test]
    fn missing_reports_unresolved_aliases() {
        let connections = Connections::new();
        connections.register(data("COM1", "MODEL 2400", "smu"), Box::new(MockInstrument::new("COM1")));
        let wanted = vec!["smu".to_string(), "dmm".to_string()];
        assert_eq!(connections.missing(&wanted), vec!["dmm".to_string()]);
        assert!(connections.remove("COM1"));
        assert!(!connections.remove("COM1"));
        assert!(connections.is_empty());
    }
}
