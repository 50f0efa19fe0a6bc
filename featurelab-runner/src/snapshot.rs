//! Snapshot store — named CSV exports of feature tables.
//!
//! A snapshot `name` lives at `{data_dir}/external_features_{name}.csv` with
//! header `date,<feature names…>`. Snapshots are immutable unless explicitly
//! overwritten, and every write goes through a temp file plus rename so a
//! reader never sees a half-written file.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use featurelab_core::{FeatureTable, FeatureVector};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const SNAPSHOT_PREFIX: &str = "external_features_";
const SNAPSHOT_EXTENSION: &str = "csv";
const DATE_COLUMN: &str = "date";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot '{name}' already exists at {}; pass --overwrite to replace it", path.display())]
    AlreadyExists { name: String, path: PathBuf },

    #[error("snapshot '{name}' not found (available: {})", format_available(available))]
    NotFound {
        name: String,
        available: Vec<String>,
    },

    #[error("invalid snapshot name '{0}': use letters, digits, '-' and '_'")]
    InvalidName(String),

    #[error("malformed {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

fn format_available(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SnapshotError + '_ {
    move |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Summary of one snapshot on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotInfo {
    pub name: String,
    pub path: PathBuf,
    pub rows: usize,
    /// Includes `date`.
    pub columns: Vec<String>,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub size_bytes: u64,
}

/// Directory of named snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    data_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.data_dir
            .join(format!("{SNAPSHOT_PREFIX}{name}.{SNAPSHOT_EXTENSION}"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// Write `table` as snapshot `name`.
    ///
    /// An existing snapshot is left untouched unless `overwrite` is set, in
    /// which case it is replaced in one rename.
    pub fn export(
        &self,
        table: &FeatureTable,
        name: &str,
        overwrite: bool,
    ) -> Result<PathBuf, SnapshotError> {
        validate_name(name)?;
        let path = self.path_for(name);
        if path.exists() && !overwrite {
            return Err(SnapshotError::AlreadyExists {
                name: name.to_string(),
                path,
            });
        }

        let columns = table.columns();
        let feature_names = table.feature_names();
        write_atomic(&path, |wtr| {
            wtr.write_record(&columns)?;
            for row in table.rows() {
                let mut record = Vec::with_capacity(columns.len());
                record.push(row.date.format("%Y-%m-%d").to_string());
                for feature in &feature_names {
                    record.push(
                        row.features
                            .get(feature)
                            .map(|v| v.to_string())
                            .unwrap_or_default(),
                    );
                }
                wtr.write_record(&record)?;
            }
            Ok(())
        })?;

        info!(
            name,
            path = %path.display(),
            rows = table.len(),
            columns = columns.len(),
            "snapshot exported"
        );
        Ok(path)
    }

    /// Read snapshot `name` back into a table.
    pub fn load(&self, name: &str) -> Result<FeatureTable, SnapshotError> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(SnapshotError::NotFound {
                name: name.to_string(),
                available: self.list()?,
            });
        }

        let malformed = |reason: String| SnapshotError::Malformed {
            path: path.clone(),
            reason,
        };

        let mut rdr = csv::Reader::from_path(&path)?;
        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        if headers.first().map(String::as_str) != Some(DATE_COLUMN) {
            return Err(malformed(format!("first column must be '{DATE_COLUMN}'")));
        }

        let mut table = FeatureTable::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let raw_date = record.get(0).unwrap_or_default();
            let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d")
                .map_err(|e| malformed(format!("row {}: bad date '{raw_date}': {e}", line + 1)))?;

            let mut features = FeatureVector::new();
            for (name, cell) in headers.iter().zip(record.iter()).skip(1) {
                let value: f64 = cell.parse().map_err(|_| {
                    malformed(format!("row {}: '{name}' is not a number: '{cell}'", line + 1))
                })?;
                features.insert(name.as_str(), value);
            }
            table
                .push(date, features)
                .map_err(|e| malformed(format!("row {}: {e}", line + 1)))?;
        }

        debug!(name, rows = table.len(), "snapshot loaded");
        Ok(table)
    }

    /// Snapshot names in the data directory, sorted. A missing directory
    /// holds no snapshots.
    pub fn list(&self) -> Result<Vec<String>, SnapshotError> {
        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.data_dir)(e)),
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let file_name = entry.file_name().into_string().ok()?;
                let stem = file_name.strip_suffix(&format!(".{SNAPSHOT_EXTENSION}"))?;
                stem.strip_prefix(SNAPSHOT_PREFIX).map(str::to_string)
            })
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn info(&self, name: &str) -> Result<SnapshotInfo, SnapshotError> {
        let table = self.load(name)?;
        let path = self.path_for(name);
        let size_bytes = fs::metadata(&path).map_err(io_err(&path))?.len();
        Ok(SnapshotInfo {
            name: name.to_string(),
            rows: table.len(),
            columns: table.columns(),
            first_date: table.first_date(),
            last_date: table.last_date(),
            size_bytes,
            path,
        })
    }

    /// Left-join an arbitrary CSV with snapshot `snapshot` on `date_column`
    /// and write `{data_dir}/{output_name}.csv`.
    ///
    /// Dates are matched on their `YYYY-MM-DD` prefix, so timestamps join on
    /// their day. Input rows without a matching snapshot row keep empty
    /// feature cells. Feature columns whose name already appears in the input
    /// are skipped.
    pub fn combine(
        &self,
        input_csv: &Path,
        snapshot: &str,
        date_column: &str,
        output_name: &str,
    ) -> Result<PathBuf, SnapshotError> {
        validate_name(output_name)?;
        let table = self.load(snapshot)?;

        let mut rdr = csv::Reader::from_path(input_csv)?;
        let input_headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let date_index = input_headers
            .iter()
            .position(|h| h == date_column)
            .ok_or_else(|| SnapshotError::Malformed {
                path: input_csv.to_path_buf(),
                reason: format!("no '{date_column}' column"),
            })?;

        let (features, shadowed): (Vec<String>, Vec<String>) = table
            .feature_names()
            .into_iter()
            .partition(|f| !input_headers.contains(f));
        if !shadowed.is_empty() {
            warn!(columns = ?shadowed, "input already has these columns; keeping input values");
        }

        let output = self
            .data_dir
            .join(format!("{output_name}.{SNAPSHOT_EXTENSION}"));
        let mut matched = 0usize;
        let mut total = 0usize;

        write_atomic(&output, |wtr| {
            wtr.write_record(input_headers.iter().chain(features.iter()))?;
            for record in rdr.records() {
                let record = record?;
                total += 1;
                let row = record
                    .get(date_index)
                    .and_then(parse_day)
                    .and_then(|date| table.row(date));
                if row.is_some() {
                    matched += 1;
                }
                let extra = features.iter().map(|f| {
                    row.and_then(|r| r.features.get(f))
                        .map(|v| v.to_string())
                        .unwrap_or_default()
                });
                let cells: Vec<String> = record.iter().map(str::to_string).chain(extra).collect();
                wtr.write_record(&cells)?;
            }
            Ok(())
        })?;

        info!(
            input = %input_csv.display(),
            snapshot,
            output = %output.display(),
            rows = total,
            matched,
            "combined dataset written"
        );
        Ok(output)
    }
}

fn validate_name(name: &str) -> Result<(), SnapshotError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(SnapshotError::InvalidName(name.to_string()))
    }
}

/// `YYYY-MM-DD` prefix of a date or timestamp cell.
fn parse_day(cell: &str) -> Option<NaiveDate> {
    let day = cell.trim().get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Write through a sibling temp file, then rename over `path`.
fn write_atomic<F>(path: &Path, write: F) -> Result<(), SnapshotError>
where
    F: FnOnce(&mut csv::Writer<fs::File>) -> Result<(), SnapshotError>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let result = (|| -> Result<(), SnapshotError> {
        let mut wtr = csv::Writer::from_path(&tmp)?;
        write(&mut wtr)?;
        wtr.flush().map_err(io_err(&tmp))?;
        drop(wtr);
        fs::rename(&tmp, path).map_err(io_err(path))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
