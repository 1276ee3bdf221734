//! # Durable Ledger
//!
//! Append-only, day-partitioned CSV store of one station's readings.
//!
//! Each UTC day of reading timestamps gets its own `{station_id}_{YYYY-MM-DD}.csv`
//! file. Rows are only ever appended, except when [`Ledger::mark_as_sent`]
//! rewrites a partition to flip `local_only` rows to `success`; that rewrite
//! goes through a temp file and an atomic rename.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::partition;
use crate::error::{Result, TelemetryError};
use crate::message::decoder::{parse_float, parse_integer};
use crate::message::protocol::{
    format_timestamp, parse_timestamp, Measurement, Reading, TransmissionStatus, FIELD_SEPARATOR,
    LEDGER_FIELDS,
};

/// Index of `transmission_status` within a ledger row
const STATUS_COLUMN: usize = LEDGER_FIELDS.len() - 1;

/// Summary of what a ledger currently holds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStats {
    pub root: PathBuf,
    pub partition_count: usize,
    pub total_rows: usize,
    pub unsent_rows: usize,
    pub total_bytes: u64,
    pub oldest_partition: Option<NaiveDate>,
    pub newest_partition: Option<NaiveDate>,
}

/// Per-station reading store under one root directory
#[derive(Debug, Clone)]
pub struct Ledger {
    root: PathBuf,
    station_id: String,
    max_files: usize,
}

impl Ledger {
    /// Create a ledger handle; nothing touches the disk until [`Ledger::initialize`]
    ///
    /// # Arguments
    ///
    /// * `root` - Directory holding the partition files
    /// * `station_id` - Owner station, used as the file name prefix
    /// * `max_files` - Number of day partitions kept by rotation
    pub fn new(root: impl Into<PathBuf>, station_id: impl Into<String>, max_files: usize) -> Self {
        Self {
            root: root.into(),
            station_id: station_id.into(),
            max_files,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    /// Ensure the storage root exists and is writable
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::Storage` if the directory cannot be created or
    /// a probe file cannot be written into it.
    pub fn initialize(&self) -> Result<()> {
        partition::ensure_writable_dir(&self.root).map_err(|source| TelemetryError::Storage {
            path: self.root.clone(),
            source,
        })?;
        debug!("Ledger ready at {}", self.root.display());
        Ok(())
    }

    /// Path of the partition file for a UTC day
    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.root.join(partition::partition_file_name(&self.station_id, date))
    }

    /// Partition files of this station, oldest first
    pub fn partitions(&self) -> std::io::Result<Vec<PathBuf>> {
        partition::list_partitions(&self.root, &self.station_id)
    }

    /// Durably append a reading to its UTC-day partition
    ///
    /// Never fails loudly: any I/O error is logged and reported as `false`.
    /// Rotation runs after a successful write and never removes the partition
    /// just written, even when a clock step dated it before every retained
    /// day; rotation failures are only logged.
    pub fn save_reading(&self, reading: &Reading) -> bool {
        match self.try_save_reading(reading) {
            Ok(path) => {
                debug!("Saved reading to {}", path.display());
                true
            }
            Err(e) => {
                error!(
                    "Failed to save reading {} under {}: {}",
                    format_timestamp(reading.timestamp()),
                    self.root.display(),
                    e
                );
                false
            }
        }
    }

    /// Append a reading, returning the partition written to
    pub(crate) fn try_save_reading(&self, reading: &Reading) -> std::io::Result<PathBuf> {
        let path = self.partition_path(reading.measurement.utc_date());
        partition::append_row(&path, &ledger_header(), &format_row(reading))?;
        self.rotate(&path);
        Ok(path)
    }

    fn rotate(&self, written: &Path) {
        if let Err(e) = partition::rotate(&self.root, &self.station_id, self.max_files, Some(written)) {
            warn!(
                "Rotation failed under {} (keeping files): {}",
                self.root.display(),
                e
            );
        }
    }

    /// Every stored reading whose status is `local_only`
    ///
    /// Rows that cannot be parsed are skipped with a warning, and so are
    /// partitions that cannot be read at all.
    ///
    /// # Errors
    ///
    /// Returns error only if the storage root cannot be listed
    pub fn get_unsent_readings(&self) -> Result<Vec<Reading>> {
        let mut unsent = Vec::new();
        for path in self.partitions()? {
            let Some(readings) = read_partition_or_warn(&path) else {
                continue;
            };
            unsent.extend(
                readings
                    .into_iter()
                    .filter(|r| r.transmission_status() == TransmissionStatus::LocalOnly),
            );
        }
        Ok(unsent)
    }

    /// Flip `local_only` rows with matching timestamps to `success`
    ///
    /// Timestamps are compared as instants, so `...T05:00:00Z` matches
    /// `...T00:00:00-05:00`. Rows with any other status or timestamp are
    /// written back byte-for-byte. A partition is rewritten (atomically) only
    /// if at least one of its rows changed. A partition that cannot be read or
    /// rewritten is logged and skipped; its rows stay `local_only` for the
    /// next reconciliation.
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of rows flipped across all partitions
    ///
    /// # Errors
    ///
    /// Returns error only if the storage root cannot be listed
    pub fn mark_as_sent(&self, timestamps: &[DateTime<FixedOffset>]) -> Result<usize> {
        if timestamps.is_empty() {
            return Ok(0);
        }
        let wanted: HashSet<DateTime<Utc>> =
            timestamps.iter().map(|ts| ts.with_timezone(&Utc)).collect();

        let mut flipped = 0;
        for path in self.partitions()? {
            let contents = match fs::read_to_string(&path) {
                Ok(contents) => contents,
                Err(e) => {
                    warn!("Skipping unreadable partition {}: {}", path.display(), e);
                    continue;
                }
            };
            let (rewritten, changed) = mark_rows_sent(&contents, &wanted);
            if changed == 0 {
                continue;
            }
            match partition::rewrite_atomic(&path, rewritten.as_bytes()) {
                Ok(()) => {
                    info!("Marked {} reading(s) as sent in {}", changed, path.display());
                    flipped += changed;
                }
                Err(e) => error!(
                    "Failed to rewrite {} ({} reading(s) stay local_only): {}",
                    path.display(),
                    changed,
                    e
                ),
            }
        }
        Ok(flipped)
    }

    /// File, row and delivery counts for this station
    pub fn storage_stats(&self) -> Result<StorageStats> {
        let partitions = self.partitions()?;
        let mut stats = StorageStats {
            root: self.root.clone(),
            partition_count: partitions.len(),
            total_rows: 0,
            unsent_rows: 0,
            total_bytes: 0,
            oldest_partition: partitions
                .first()
                .and_then(|p| partition::partition_date(p, &self.station_id)),
            newest_partition: partitions
                .last()
                .and_then(|p| partition::partition_date(p, &self.station_id)),
        };

        for path in &partitions {
            let Some(readings) = read_partition_or_warn(path) else {
                continue;
            };
            stats.total_bytes += fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            for reading in readings {
                stats.total_rows += 1;
                if reading.transmission_status() == TransmissionStatus::LocalOnly {
                    stats.unsent_rows += 1;
                }
            }
        }
        Ok(stats)
    }
}

/// Header line shared by ledger and mirror files
pub(crate) fn ledger_header() -> String {
    LEDGER_FIELDS.join(&FIELD_SEPARATOR.to_string())
}

/// One ledger row; absent optionals are empty fields
pub(crate) fn format_row(reading: &Reading) -> String {
    let m = &reading.measurement;
    let optional = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    [
        format_timestamp(&m.timestamp),
        m.station_id.clone(),
        m.raw_distance_mm.to_string(),
        m.snow_depth_mm.to_string(),
        optional(m.sensor_temp_c),
        optional(m.battery_voltage),
        reading.signal_quality.to_string(),
        reading.transmission_status().to_string(),
    ]
    .join(&FIELD_SEPARATOR.to_string())
}

/// Parse a ledger row back into a reading
pub(crate) fn parse_row(line: &str) -> Result<Reading> {
    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).map(str::trim).collect();
    if fields.len() != LEDGER_FIELDS.len() {
        return Err(TelemetryError::MalformedMessage(format!(
            "ledger row has {} fields, expected {}",
            fields.len(),
            LEDGER_FIELDS.len()
        )));
    }

    let optional = |name: &str, text: &str| -> Result<Option<f64>> {
        if text.is_empty() {
            Ok(None)
        } else {
            parse_float(name, text).map(Some)
        }
    };

    let measurement = Measurement {
        timestamp: parse_timestamp(fields[0])?,
        station_id: fields[1].to_string(),
        raw_distance_mm: parse_integer("raw_distance_mm", fields[2])?,
        snow_depth_mm: parse_integer("snow_depth_mm", fields[3])?,
        sensor_temp_c: optional("sensor_temp_c", fields[4])?,
        battery_voltage: optional("battery_voltage", fields[5])?,
    };
    let signal_quality = fields[6].parse::<u8>().map_err(|_| {
        TelemetryError::MalformedMessage(format!("signal_quality is not 0-100: {:?}", fields[6]))
    })?;
    let status = fields[STATUS_COLUMN].parse::<TransmissionStatus>()?;

    Ok(Reading::with_status(measurement, signal_quality, status))
}

/// Readings in one partition file, skipping the header and bad rows
fn read_partition(path: &Path) -> Result<Vec<Reading>> {
    let contents = fs::read_to_string(path)?;
    let mut readings = Vec::new();
    for (index, line) in contents.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        match parse_row(line) {
            Ok(reading) => readings.push(reading),
            Err(e) => warn!("Skipping row {} of {}: {}", index + 1, path.display(), e),
        }
    }
    Ok(readings)
}

fn read_partition_or_warn(path: &Path) -> Option<Vec<Reading>> {
    match read_partition(path) {
        Ok(readings) => Some(readings),
        Err(e) => {
            warn!("Skipping unreadable partition {}: {}", path.display(), e);
            None
        }
    }
}

/// Rewrite `contents`, flipping matching `local_only` rows to `success`
///
/// Untouched lines (header included) are copied verbatim with their line
/// endings. Returns the new contents and the number of rows changed.
fn mark_rows_sent(contents: &str, wanted: &HashSet<DateTime<Utc>>) -> (String, usize) {
    let mut out = String::with_capacity(contents.len() + 16);
    let mut changed = 0;

    for (index, line) in contents.split_inclusive('\n').enumerate() {
        let body = line.trim_end_matches(&['\n', '\r'][..]);
        let ending = &line[body.len()..];

        if index > 0 {
            let mut fields: Vec<&str> = body.split(FIELD_SEPARATOR).collect();
            let matches = fields.len() == LEDGER_FIELDS.len()
                && fields[STATUS_COLUMN].trim() == TransmissionStatus::LocalOnly.as_str()
                && parse_timestamp(fields[0])
                    .map(|ts| wanted.contains(&ts.with_timezone(&Utc)))
                    .unwrap_or(false);

            if matches {
                fields[STATUS_COLUMN] = TransmissionStatus::Success.as_str();
                out.push_str(&fields.join(&FIELD_SEPARATOR.to_string()));
                out.push_str(ending);
                changed += 1;
                continue;
            }
        }
        out.push_str(line);
    }
    (out, changed)
}
