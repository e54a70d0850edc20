//! String-keyed, string-valued task parameters.
//!
//! Values are stored as entered by the operator and parsed on each access; there is
//! no schema check at registration time.
use crate::error::{AppResult, LabError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Parse an operator-entered boolean.
pub fn str_to_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Split a `key=value` assignment as typed on the command line.
pub fn parse_assignment(text: &str) -> AppResult<(String, String)> {
    let (key, value) = text.split_once('=').ok_or_else(|| LabError::Parameter {
        key: text.to_string(),
        reason: "expected key=value".to_string(),
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(LabError::Parameter {
            key: text.to_string(),
            reason: "empty key".to_string(),
        });
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Ordered parameter map with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, String>);

impl Parameters {
    /// Create a new instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Parameters::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Insert or replace a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Raw value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Raw value or `default`.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    fn required(&self, key: &str) -> AppResult<&str> {
        self.get(key).ok_or_else(|| LabError::Parameter {
            key: key.to_string(),
            reason: "missing".to_string(),
        })
    }

    fn parse<T>(&self, key: &str) -> AppResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.required(key)?;
        raw.trim().parse::<T>().map_err(|e| LabError::Parameter {
            key: key.to_string(),
            reason: format!("'{}': {}", raw, e),
        })
    }

    /// Required float.
    pub fn get_f64(&self, key: &str) -> AppResult<f64> {
        self.parse(key)
    }

    /// Required unsigned integer.
    pub fn get_u64(&self, key: &str) -> AppResult<u64> {
        self.parse(key)
    }

    /// Required boolean, spelled as [`str_to_bool`] accepts.
    pub fn get_bool(&self, key: &str) -> AppResult<bool> {
        let raw = self.required(key)?;
        str_to_bool(raw).ok_or_else(|| LabError::Parameter {
            key: key.to_string(),
            reason: format!("'{}' is not a boolean", raw),
        })
    }

    /// Typed value or `default` when the key is absent. A present but malformed value
    /// is still an error.
    pub fn get_f64_or(&self, key: &str, default: f64) -> AppResult<f64> {
        if self.get(key).is_some() {
            self.get_f64(key)
        } else {
            Ok(default)
        }
    }

    /// See [`Parameters::get_f64_or`].
    pub fn get_u64_or(&self, key: &str, default: u64) -> AppResult<u64> {
        if self.get(key).is_some() {
            self.get_u64(key)
        } else {
            Ok(default)
        }
    }

    /// See [`Parameters::get_f64_or`].
    pub fn get_bool_or(&self, key: &str, default: bool) -> AppResult<bool> {
        if self.get(key).is_some() {
            self.get_bool(key)
        } else {
            Ok(default)
        }
    }

    /// Entries sorted by key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_spellings() {
        for s in ["true", "TRUE", "1", "yes", "Y", " on "] {
            assert_eq!(str_to_bool(s), Some(true), "{s}");
        }
        for s in ["false", "0", "No", "n", "off"] {
            assert_eq!(str_to_bool(s), Some(false), "{s}");
        }
        assert_eq!(str_to_bool("maybe"), None);
    }

    #[test]
    fn typed_access() {
        let params: Parameters = [("nplc", "10"), ("current", "1e-6"), ("delta", "yes")]
            .into_iter()
            .collect();
        assert_eq!(params.get_u64("nplc").unwrap(), 10);
        assert_eq!(params.get_f64("current").unwrap(), 1e-6);
        assert!(params.get_bool("delta").unwrap());
        assert_eq!(params.get_f64_or("missing", 2.5).unwrap(), 2.5);
        assert!(matches!(
            params.get_f64("missing"),
            Err(LabError::Parameter { .. })
        ));
        assert!(params.get_u64("current").is_err());
        assert!(params.get_bool_or("current", false).is_err());
    }

    #[test]
    fn assignments() {
        assert_eq!(
            parse_assignment("interval_ms = 250").unwrap(),
            ("interval_ms".to_string(), "250".to_string())
        );
        assert_eq!(
            parse_assignment("command=MEAS:VOLT?").unwrap().1,
            "MEAS:VOLT?"
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=1").is_err());
    }
}
