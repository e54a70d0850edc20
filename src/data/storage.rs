//! JSON chart storage.
//!
//! Charts are written either one file per chart or as a single merged file when a task
//! stops, and as dated backups while it runs. Atomic writes go through a
//! [`tempfile::NamedTempFile`] in the destination directory followed by a rename, so
//! readers never observe a partially written file.
use super::chart::ChartRecord;
use crate::error::AppResult;
use chrono::{DateTime, Local};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::trace;

/// Timestamp format used in every generated file name.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Contents of a `merged_charts_*.json` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedCharts {
    /// Every chart of the run.
    pub charts: Vec<ChartRecord>,
    /// Run metadata.
    pub metadata: MergedMetadata,
}

/// Who wrote a merged file, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedMetadata {
    /// Task that produced the charts.
    pub task_name: String,
    /// Empty when the task had no alias.
    pub custom_alias: String,
    /// Local time in [`FILE_TIMESTAMP_FORMAT`].
    pub timestamp: String,
}

/// Write `path` through a temp file in the same directory.
///
/// `fill` receives the temp file. The destination is replaced only after `fill`
/// succeeds and the data is synced; on any error the temp file is removed and the
/// destination is left as it was.
pub fn atomic_write<F>(path: &Path, fill: F) -> AppResult<()>
where
    F: FnOnce(&mut File) -> AppResult<()>,
{
    let dir = parent_dir(path);
    std::fs::create_dir_all(&dir)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    fill(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    trace!(path = %path.display(), "Atomic write complete");
    Ok(())
}

/// Serialize `value` as pretty JSON into `path` atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> AppResult<()> {
    atomic_write(path, |file| {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        Ok(())
    })
}

/// Serialize `value` as pretty JSON into `path` in place.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> AppResult<()> {
    std::fs::create_dir_all(parent_dir(path))?;
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> AppResult<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}

/// Read a per-chart or backup file.
pub fn load_chart(path: &Path) -> AppResult<ChartRecord> {
    read_json(path)
}

/// Read a merged chart file.
pub fn load_merged(path: &Path) -> AppResult<MergedCharts> {
    read_json(path)
}

/// Format a local timestamp for file names.
pub fn file_timestamp(at: DateTime<Local>) -> String {
    at.format(FILE_TIMESTAMP_FORMAT).to_string()
}

/// `{chart}_{alias}_{timestamp}.json`
pub fn chart_file_name(chart: &str, alias: &str, timestamp: &str) -> String {
    format!(
        "{}_{}_{}.json",
        sanitize(chart),
        sanitize(alias),
        timestamp
    )
}

/// `merged_charts_{alias}_{timestamp}.json`
pub fn merged_file_name(alias: &str, timestamp: &str) -> String {
    format!("merged_charts_{}_{}.json", sanitize(alias), timestamp)
}

/// `BKP_{chart}_{timestamp}.json`
pub fn backup_file_name(chart: &str, timestamp: &str) -> String {
    format!("BKP_{}_{}.json", sanitize(chart), timestamp)
}

/// Replace characters that are not safe in file names.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LabError;
    use chrono::TimeZone;

    fn temp_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    #[test]
    fn atomic_write_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.json");
        std::fs::write(&path, b"old").unwrap();

        write_json_atomic(&path, &serde_json::json!({"a": 1})).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"a\": 1"));
        assert_eq!(temp_files(dir.path()), vec![path]);
    }

    #[test]
    fn failed_fill_leaves_destination_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.json");
        std::fs::write(&path, b"{\"previous\": true}").unwrap();
        let before = std::fs::read(&path).unwrap();

        let result = atomic_write(&path, |file| {
            file.write_all(b"{\"partial\": ")?;
            Err(LabError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        });

        assert!(result.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(temp_files(dir.path()), vec![path]);
    }

    #[test]
    fn atomic_write_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup").join("2024-01-01").join("x.json");
        write_json_atomic(&path, &[1, 2, 3]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn file_names() {
        let ts = file_timestamp(Local.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap());
        assert_eq!(ts, "20240506_070809");
        assert_eq!(
            chart_file_name("IV curve", "sample/A", &ts),
            "IV_curve_sample_A_20240506_070809.json"
        );
        assert_eq!(
            merged_file_name("run1", &ts),
            "merged_charts_run1_20240506_070809.json"
        );
        assert_eq!(backup_file_name("iv", &ts), "BKP_iv_20240506_070809.json");
    }
}
