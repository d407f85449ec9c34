//! Local data lake with `snapshot_date=YYYY-MM-DD` partitions
//!
//! Tabular data is stored as CSV, metadata as JSON. Each pipeline stage
//! reads from and writes to a well-known prefix under the lake root.

use crate::error::ForecastError;
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const RAW_EU_PRICES: &str = "raw/eu_prices";
pub const RAW_FBX: &str = "raw/fbx_index";
pub const RAW_TARIFFS: &str = "raw/tariffs/reference";
pub const EU_PRICES: &str = "processed/eu_prices";
pub const FBX: &str = "processed/fbx";
pub const MACROS: &str = "processed/macros";
pub const TARIFFS_LATEST: &str = "processed/tariffs/latest";
pub const WEEKLY_PANEL: &str = "curated/weekly_panel";
pub const FEATURES: &str = "features/weekly_panel";
pub const MODELS: &str = "mlops/models";
pub const REGISTRY_FILE: &str = "mlops/registry.json";
pub const EVALUATION: &str = "mlops/evaluation";
pub const FORECAST_LEDGER: &str = "mlops/forecasts/ledger.jsonl";
pub const MONITORING_REPORTS: &str = "monitoring/reports";

lazy_static! {
    static ref PARTITION: Regex = Regex::new(r"^snapshot_date=(\d{4}-\d{2}-\d{2})$").unwrap();
}

#[derive(Debug, Clone)]
pub struct DataLake {
    root: PathBuf,
}

impl DataLake {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn snapshot_dir(&self, prefix: &str, date: NaiveDate) -> PathBuf {
        self.path(prefix).join(format!("snapshot_date={}", date.format("%Y-%m-%d")))
    }

    pub fn snapshot_path(&self, prefix: &str, date: NaiveDate, file: &str) -> PathBuf {
        self.snapshot_dir(prefix, date).join(file)
    }

    /// Newest file (by modification time) under a raw prefix with one of the
    /// given suffixes.
    pub fn latest_raw_file(&self, prefix: &str, suffixes: &[&str]) -> Result<PathBuf> {
        let dir = self.path(prefix);
        let entries = fs::read_dir(&dir).map_err(|e| {
            ForecastError::Ingestion(format!("cannot list {}: {}", dir.display(), e))
        })?;

        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !path.is_file() || !suffixes.iter().any(|s| name.ends_with(s)) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if newest.as_ref().map_or(true, |(t, _)| modified >= *t) {
                newest = Some((modified, path));
            }
        }

        newest.map(|(_, p)| p).ok_or_else(|| {
            ForecastError::Ingestion(format!(
                "no files with suffixes {:?} under {}",
                suffixes,
                dir.display()
            ))
        })
    }

    /// Snapshot dates present under a prefix, ascending.
    pub fn list_snapshots(&self, prefix: &str) -> Result<Vec<NaiveDate>> {
        let dir = self.path(prefix);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut dates: Vec<NaiveDate> = fs::read_dir(&dir)?
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                let caps = PARTITION.captures(&name)?;
                NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()
            })
            .collect();

        dates.sort();
        Ok(dates)
    }

    pub fn latest_snapshot(&self, prefix: &str) -> Result<Option<NaiveDate>> {
        Ok(self.list_snapshots(prefix)?.pop())
    }

    /// Latest snapshot date under a prefix, as an error when there is none.
    pub fn require_latest_snapshot(&self, prefix: &str) -> Result<NaiveDate> {
        self.latest_snapshot(prefix)?
            .ok_or_else(|| ForecastError::Storage(format!("no snapshots under {}", prefix)))
    }

    pub fn read_csv<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut rows = Vec::new();
        for record in reader.deserialize() {
            rows.push(record?);
        }
        debug!(path = %path.display(), rows = rows.len(), "read csv");
        Ok(rows)
    }

    pub fn write_csv<T: Serialize>(&self, path: &Path, rows: &[T]) -> Result<()> {
        ensure_parent(path)?;
        let mut writer = csv::Writer::from_path(path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        debug!(path = %path.display(), rows = rows.len(), "wrote csv");
        Ok(())
    }

    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        ensure_parent(path)?;
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        Ok(())
    }

    pub fn append_jsonl<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        ensure_parent(path)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        file.write_all(&line)?;
        Ok(())
    }

    /// Read a JSON-lines file. A missing file reads as empty; malformed
    /// lines are skipped with a warning.
    pub fn read_jsonl<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut items = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(item) => items.push(item),
                Err(e) => warn!(path = %path.display(), line = idx + 1, error = %e, "skipping malformed line"),
            }
        }
        Ok(items)
    }

    /// Load `file` from the requested snapshot; when that is missing or
    /// empty, fall back to the most recent snapshot that has rows.
    pub fn load_or_fallback<T: DeserializeOwned>(
        &self,
        prefix: &str,
        date: NaiveDate,
        file: &str,
    ) -> Result<Option<(NaiveDate, Vec<T>)>> {
        let requested = self.snapshot_path(prefix, date, file);
        if requested.exists() {
            let rows: Vec<T> = self.read_csv(&requested)?;
            if !rows.is_empty() {
                return Ok(Some((date, rows)));
            }
        }

        for snapshot in self.list_snapshots(prefix)?.into_iter().rev() {
            if snapshot == date {
                continue;
            }
            let path = self.snapshot_path(prefix, snapshot, file);
            if !path.exists() {
                continue;
            }
            let rows: Vec<T> = self.read_csv(&path)?;
            if !rows.is_empty() {
                warn!(prefix, file, requested = %date, fallback = %snapshot, "using fallback snapshot");
                return Ok(Some((snapshot, rows)));
            }
        }

        Ok(None)
    }

    /// Age in whole days of a file's last modification.
    pub fn file_age_days(&self, path: &Path, now: DateTime<Utc>) -> Result<i64> {
        let modified: DateTime<Utc> = fs::metadata(path)?.modified()?.into();
        Ok((now - modified).num_days())
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Fresh lake directory under the system temp dir.
#[cfg(test)]
pub(crate) fn temp_lake() -> DataLake {
    let root = std::env::temp_dir().join(format!("olive-lake-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&root).unwrap();
    DataLake::new(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        week_start: NaiveDate,
        value: Option<f64>,
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_snapshots_sorted_and_filtered() {
        let lake = temp_lake();
        for date in ["2025-03-01", "2025-01-15", "2025-02-10"] {
            fs::create_dir_all(lake.path(MACROS).join(format!("snapshot_date={}", date))).unwrap();
        }
        fs::create_dir_all(lake.path(MACROS).join("not_a_partition")).unwrap();

        let snapshots = lake.list_snapshots(MACROS).unwrap();
        assert_eq!(snapshots, vec![d("2025-01-15"), d("2025-02-10"), d("2025-03-01")]);
        assert_eq!(lake.latest_snapshot(MACROS).unwrap(), Some(d("2025-03-01")));
        assert_eq!(lake.latest_snapshot(FBX).unwrap(), None);
    }

    #[test]
    fn test_csv_roundtrip_with_missing_values() {
        let lake = temp_lake();
        let path = lake.snapshot_path(FBX, d("2025-01-06"), "fbx.csv");
        let rows = vec![
            Row { week_start: d("2025-01-06"), value: Some(1.5) },
            Row { week_start: d("2025-01-13"), value: None },
        ];
        lake.write_csv(&path, &rows).unwrap();
        let back: Vec<Row> = lake.read_csv(&path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_load_or_fallback_uses_latest_non_empty() {
        let lake = temp_lake();
        let old = vec![Row { week_start: d("2025-01-06"), value: Some(80.0) }];
        lake.write_csv(&lake.snapshot_path(MACROS, d("2025-01-10"), "brent.csv"), &old)
            .unwrap();
        lake.write_csv::<Row>(&lake.snapshot_path(MACROS, d("2025-01-17"), "brent.csv"), &[])
            .unwrap();

        let (snapshot, rows) = lake
            .load_or_fallback::<Row>(MACROS, d("2025-01-20"), "brent.csv")
            .unwrap()
            .unwrap();
        assert_eq!(snapshot, d("2025-01-10"));
        assert_eq!(rows, old);

        assert!(lake
            .load_or_fallback::<Row>(MACROS, d("2025-01-20"), "diesel.csv")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_latest_raw_file_filters_suffix() {
        let lake = temp_lake();
        let dir = lake.path(RAW_FBX);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("notes.txt"), "x").unwrap();
        fs::write(dir.join("fbx.csv"), "date,fbx\n").unwrap();

        let latest = lake.latest_raw_file(RAW_FBX, &[".csv"]).unwrap();
        assert!(latest.ends_with("fbx.csv"));
        assert!(lake.latest_raw_file(RAW_EU_PRICES, &[".csv"]).is_err());
    }

    #[test]
    fn test_jsonl_append_and_read() {
        let lake = temp_lake();
        let path = lake.path(FORECAST_LEDGER);
        lake.append_jsonl(&path, &Row { week_start: d("2025-01-06"), value: Some(1.0) })
            .unwrap();
        lake.append_jsonl(&path, &Row { week_start: d("2025-01-13"), value: None })
            .unwrap();
        let rows: Vec<Row> = lake.read_jsonl(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].value, None);
    }
}
