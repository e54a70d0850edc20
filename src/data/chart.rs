//! Chart buffers: the x/y series a measurement task fills while it runs.
//!
//! [`ChartData`] is plain data: name, creation time, buffering policy and two
//! [`Series`]. [`ChartRecord`] is its JSON projection as written to disk. [`Chart`] is the
//! shared handle used at runtime. It guards the data with a mutex so the task worker
//! (producer, appends raw samples) and the watchdog (consumer, materializes processed
//! samples) can touch it from different threads. It also carries the per-axis
//! [`Transform`]s.

use super::series::{non_finite, Axis, AxisMeta, Series};
use super::storage;
use super::transform::Transform;
use crate::error::AppResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Current on-disk chart schema.
pub const SCHEMA_VERSION: u32 = 1;

/// Buffering and persistence policy of one chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    /// Drain consumed raw samples instead of keeping them.
    pub pop_raw: bool,
    /// Allow raw samples in saved files.
    pub include_raw_on_save: bool,
    /// Write through a temp file + rename.
    pub atomic_save: bool,
    /// Soft cap on processed x samples; 0 = unlimited. Exceeding it stops the task.
    pub sample_points_x: usize,
    /// Soft cap on processed y samples; 0 = unlimited.
    pub sample_points_y: usize,
    /// Recompute every processed sample on each watchdog tick.
    pub refresh_all: bool,
    /// Free-form tag for consumers (plot type, experiment kind).
    pub custom_type: String,
    /// Schema version the config was written with.
    pub schema_version: u32,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            pop_raw: false,
            include_raw_on_save: true,
            atomic_save: true,
            sample_points_x: 0,
            sample_points_y: 0,
            refresh_all: false,
            custom_type: String::new(),
            schema_version: SCHEMA_VERSION,
        }
    }
}

/// Which processed length [`ChartData::length`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisSelector {
    /// X axis
    X,
    /// Y axis
    Y,
    /// Shorter of the two
    Min,
}

impl AxisSelector {
    /// Numeric selector used by plotting consumers: 0 = x, 1 = y, 2 = min.
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(AxisSelector::X),
            1 => Some(AxisSelector::Y),
            2 => Some(AxisSelector::Min),
            _ => None,
        }
    }
}

/// Plain chart data, owned by the task that created it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartData {
    /// Chart name, also used in file names.
    pub name: String,
    /// On-disk schema version.
    pub schema_version: u32,
    /// Creation time (UTC).
    pub created_at: DateTime<Utc>,
    /// Buffering and save policy.
    pub config: ChartConfig,
    /// X axis samples.
    pub x_series: Series,
    /// Y axis samples.
    pub y_series: Series,
}

impl ChartData {
    /// Empty chart with default config, created now.
    pub fn new(name: impl Into<String>, x_meta: AxisMeta, y_meta: AxisMeta) -> Self {
        Self {
            name: name.into(),
            schema_version: SCHEMA_VERSION,
            created_at: Utc::now(),
            config: ChartConfig::default(),
            x_series: Series::new(x_meta),
            y_series: Series::new(y_meta),
        }
    }

    /// Set the buffering and save policy.
    pub fn with_config(mut self, config: ChartConfig) -> Self {
        self.config = config;
        self
    }

    /// Series of one axis.
    pub fn series(&self, axis: Axis) -> &Series {
        match axis {
            Axis::X => &self.x_series,
            Axis::Y => &self.y_series,
        }
    }

    /// Mutable series of one axis.
    pub fn series_mut(&mut self, axis: Axis) -> &mut Series {
        match axis {
            Axis::X => &mut self.x_series,
            Axis::Y => &mut self.y_series,
        }
    }

    /// Processed length of the selected axis.
    pub fn length(&self, selector: AxisSelector) -> usize {
        let x = self.x_series.processed.len();
        let y = self.y_series.processed.len();
        match selector {
            AxisSelector::X => x,
            AxisSelector::Y => y,
            AxisSelector::Min => x.min(y),
        }
    }

    /// Numeric form of [`ChartData::length`]; unknown selectors report 0.
    pub fn get_length(&self, selector: u8) -> usize {
        AxisSelector::from_index(selector).map_or(0, |s| self.length(s))
    }

    /// Whether a configured sample cap has been passed.
    pub fn sample_cap_exceeded(&self) -> bool {
        let over = |cap: usize, len: usize| cap != 0 && len > cap;
        over(self.config.sample_points_x, self.x_series.processed.len())
            || over(self.config.sample_points_y, self.y_series.processed.len())
    }

    /// JSON projection. Raw samples are included only if requested and allowed by
    /// `config.include_raw_on_save`.
    pub fn to_record(&self, include_raw: bool) -> ChartRecord {
        let with_raw = include_raw && self.config.include_raw_on_save;
        ChartRecord {
            schema_version: self.schema_version,
            name: self.name.clone(),
            created_at: self.created_at,
            config: self.config.clone(),
            x: SeriesRecord::from_series(&self.x_series, with_raw),
            y: SeriesRecord::from_series(&self.y_series, with_raw),
        }
    }

    /// Rebuild chart data from its file form. A missing `raw` becomes empty.
    pub fn from_record(record: ChartRecord) -> Self {
        Self {
            name: record.name,
            schema_version: record.schema_version,
            created_at: record.created_at,
            config: record.config,
            x_series: record.x.into_series(),
            y_series: record.y.into_series(),
        }
    }

    /// The record as a JSON value.
    pub fn to_json_value(&self, include_raw: bool) -> AppResult<Value> {
        Ok(serde_json::to_value(self.to_record(include_raw))?)
    }

    /// Parse chart data from a JSON value in record form.
    pub fn from_json_value(value: Value) -> AppResult<Self> {
        let record: ChartRecord = serde_json::from_value(value)?;
        Ok(Self::from_record(record))
    }
}

/// On-disk shape of one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    /// Processed samples; NaN and ±inf are encoded by `non_finite`.
    #[serde(with = "non_finite")]
    pub processed: Vec<f64>,
    /// Axis metadata.
    pub meta: AxisMeta,
    /// Raw samples, when they were saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<Value>>,
}

impl SeriesRecord {
    fn from_series(series: &Series, with_raw: bool) -> Self {
        Self {
            processed: series.processed.clone(),
            meta: series.meta.clone(),
            raw: with_raw.then(|| series.raw.clone()),
        }
    }

    fn into_series(self) -> Series {
        Series {
            raw: self.raw.unwrap_or_default(),
            processed: self.processed,
            meta: self.meta,
        }
    }
}

/// On-disk shape of one chart file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRecord {
    /// On-disk schema version.
    pub schema_version: u32,
    /// Chart name.
    pub name: String,
    /// RFC 3339 on disk.
    pub created_at: DateTime<Utc>,
    /// Buffering and save policy.
    pub config: ChartConfig,
    /// X axis.
    pub x: SeriesRecord,
    /// Y axis.
    pub y: SeriesRecord,
}

/// Shared runtime handle of a chart: guarded data plus its transforms.
#[derive(Debug)]
pub struct Chart {
    data: Mutex<ChartData>,
    x_transform: Transform,
    y_transform: Transform,
}

impl Chart {
    /// Chart without transforms; the producer writes processed values itself.
    pub fn new(data: ChartData) -> Self {
        Self::with_transforms(data, Transform::None, Transform::None)
    }

    /// Chart whose raw samples are turned into processed ones by `x` and `y`.
    pub fn with_transforms(data: ChartData, x: Transform, y: Transform) -> Self {
        Self {
            data: Mutex::new(data),
            x_transform: x,
            y_transform: y,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChartData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name.
    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    /// Transform of one axis.
    pub fn transform(&self, axis: Axis) -> &Transform {
        match axis {
            Axis::X => &self.x_transform,
            Axis::Y => &self.y_transform,
        }
    }

    /// Run `f` with the data locked.
    pub fn with_data<R>(&self, f: impl FnOnce(&ChartData) -> R) -> R {
        f(&self.lock())
    }

    /// Run `f` with the data locked for writing.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut ChartData) -> R) -> R {
        f(&mut self.lock())
    }

    /// Append a raw sample for the watchdog to process.
    pub fn push_raw(&self, axis: Axis, value: impl Into<Value>) {
        self.lock().series_mut(axis).raw.push(value.into());
    }

    /// Append a processed value directly, bypassing the transform.
    pub fn push_processed(&self, axis: Axis, value: f64) {
        self.lock().series_mut(axis).processed.push(value);
    }

    /// Append one processed (x, y) point under a single lock.
    pub fn push_point(&self, x: f64, y: f64) {
        let mut data = self.lock();
        data.x_series.processed.push(x);
        data.y_series.processed.push(y);
    }

    /// One-shot materialization: append `f(v)` for every raw sample on each axis that
    /// has a transform, then clear raw if `pop_raw`.
    ///
    /// With `pop_raw` off a second call re-appends the same values.
    pub fn compute(&self) -> AppResult<()> {
        let mut data = self.lock();
        let pop_raw = data.config.pop_raw;
        let mut result = Ok(());
        for axis in [Axis::X, Axis::Y] {
            let transform = self.transform(axis);
            if !transform.is_set() {
                continue;
            }
            let series = data.series_mut(axis);
            match transform.apply_all(&series.raw) {
                Ok(values) => {
                    series.processed.extend(values);
                    if pop_raw {
                        series.raw.clear();
                    }
                }
                Err(e) => {
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        result
    }

    /// Watchdog step: bring processed up to date with raw according to the chart's
    /// policy.
    ///
    /// - `refresh_all`: recompute processed from all of raw.
    /// - `pop_raw` off: append only raw samples past `processed.len()`.
    /// - `pop_raw` on: append every raw sample seen, then drain exactly that prefix.
    ///
    /// A failing axis keeps its processed series unchanged for this pass; the other
    /// axis is still updated and the first error is returned.
    pub fn apply_transforms(&self) -> AppResult<()> {
        let mut data = self.lock();
        let config = data.config.clone();
        let mut result = Ok(());
        for axis in [Axis::X, Axis::Y] {
            let transform = self.transform(axis);
            if !transform.is_set() {
                continue;
            }
            if let Err(e) = apply_axis(data.series_mut(axis), transform, &config) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// See [`ChartData::get_length`].
    pub fn get_length(&self, selector: u8) -> usize {
        self.lock().get_length(selector)
    }

    /// See [`ChartData::sample_cap_exceeded`].
    pub fn sample_cap_exceeded(&self) -> bool {
        self.lock().sample_cap_exceeded()
    }

    /// Consistent copy of the chart's JSON projection.
    pub fn snapshot(&self, include_raw: bool) -> ChartRecord {
        self.lock().to_record(include_raw)
    }

    /// Save the chart, atomically if `config.atomic_save`.
    pub fn save_json(&self, path: &Path, include_raw: bool) -> AppResult<()> {
        let (record, atomic) = {
            let data = self.lock();
            (data.to_record(include_raw), data.config.atomic_save)
        };
        if atomic {
            storage::write_json_atomic(path, &record)
        } else {
            storage::write_json(path, &record)
        }
    }

    /// Save the chart through a temp file in the same directory and an atomic rename.
    pub fn save_json_atomic(&self, path: &Path, include_raw: bool) -> AppResult<()> {
        let record = self.snapshot(include_raw);
        storage::write_json_atomic(path, &record)
    }
}

fn apply_axis(series: &mut Series, transform: &Transform, config: &ChartConfig) -> AppResult<()> {
    if config.refresh_all {
        series.processed = transform.apply_all(&series.raw)?;
    } else if !config.pop_raw {
        let start = series.processed.len();
        if start < series.raw.len() {
            let values = transform.apply_all(&series.raw[start..])?;
            series.processed.extend(values);
        }
    } else {
        let observed = series.raw.len();
        let values = transform.apply_all(&series.raw[..observed])?;
        series.processed.extend(values);
        series.raw.drain(..observed);
    }
    Ok(())
}
