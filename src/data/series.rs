//! Axis metadata and the raw/processed sample pair behind every chart axis.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Axis scaling used when the chart is plotted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    /// Linear
    #[default]
    Linear,
    /// Logarithmic
    Log,
}

/// Display metadata for one axis. Set once when the chart is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisMeta {
    /// Axis label.
    pub label: String,
    /// Unit shown next to the label.
    pub unit: String,
    /// Plot scaling.
    #[serde(default)]
    pub scale: Scale,
}

impl AxisMeta {
    /// Linear axis.
    pub fn new(label: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            unit: unit.into(),
            scale: Scale::Linear,
        }
    }

    /// Set the axis scale.
    pub fn with_scale(mut self, scale: Scale) -> Self {
        self.scale = scale;
        self
    }
}

/// Selects one axis of a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// X axis
    X,
    /// Y axis
    Y,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
        }
    }
}

/// Producer-appended raw samples and their plotted numeric form.
///
/// `processed` is only ever appended to or cleared. Raw entries that were consumed are
/// either left in place or drained from the front, never revisited.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    /// Samples as produced by the task, any JSON value.
    pub raw: Vec<Value>,
    /// Plotted values.
    pub processed: Vec<f64>,
    /// Axis metadata.
    pub meta: AxisMeta,
}

impl Series {
    /// Empty series.
    pub fn new(meta: AxisMeta) -> Self {
        Self {
            raw: Vec::new(),
            processed: Vec::new(),
            meta,
        }
    }
}

/// Serde adapter for processed samples that may be non-finite.
///
/// Failed instrument reads are recorded as NaN and divisions by zero give ±inf, none of
/// which plain JSON can carry. NaN is written as `null`, infinities as the strings
/// `"Infinity"` and `"-Infinity"`. Reading accepts the same forms plus `"NaN"`.
pub mod non_finite {
    use super::*;
    use serde::de::Error;

    const INFINITY: &str = "Infinity";
    const NEG_INFINITY: &str = "-Infinity";
    const NAN: &str = "NaN";

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Number(f64),
        Text(String),
    }

    fn encode(value: f64) -> Option<Encoded> {
        if value.is_finite() {
            Some(Encoded::Number(value))
        } else if value.is_nan() {
            None
        } else if value > 0.0 {
            Some(Encoded::Text(INFINITY.to_string()))
        } else {
            Some(Encoded::Text(NEG_INFINITY.to_string()))
        }
    }

    /// Write `values`, encoding non-finite entries.
    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| encode(*v)))
    }

    /// Read values written by [`serialize`].
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values: Vec<Option<Encoded>> = Vec::deserialize(deserializer)?;
        values
            .into_iter()
            .map(|v| match v {
                None => Ok(f64::NAN),
                Some(Encoded::Number(n)) => Ok(n),
                Some(Encoded::Text(text)) => match text.as_str() {
                    INFINITY => Ok(f64::INFINITY),
                    NEG_INFINITY => Ok(f64::NEG_INFINITY),
                    NAN => Ok(f64::NAN),
                    other => Err(D::Error::custom(format!(
                        "expected a number, null, \"{}\" or \"{}\", got \"{}\"",
                        INFINITY, NEG_INFINITY, other
                    ))),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "non_finite")]
        values: Vec<f64>,
    }

    #[test]
    fn non_finite_values_survive_json() {
        let json = serde_json::to_string(&Wrapper {
            values: vec![1.5, f64::NAN, f64::INFINITY, f64::NEG_INFINITY],
        })
        .unwrap();
        assert_eq!(json, r#"{"values":[1.5,null,"Infinity","-Infinity"]}"#);

        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.values[0], 1.5);
        assert!(back.values[1].is_nan());
        assert_eq!(back.values[2], f64::INFINITY);
        assert_eq!(back.values[3], f64::NEG_INFINITY);
    }

    #[test]
    fn unknown_text_is_rejected() {
        let back: Wrapper = serde_json::from_str(r#"{"values":["NaN", 2]}"#).unwrap();
        assert!(back.values[0].is_nan());
        assert_eq!(back.values[1], 2.0);
        assert!(serde_json::from_str::<Wrapper>(r#"{"values":["inf"]}"#).is_err());
    }

    #[test]
    fn scale_serializes_lowercase() {
        let meta = AxisMeta::new("Voltage", "V").with_scale(Scale::Log);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["scale"], "log");
    }
}
