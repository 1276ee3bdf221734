//! # Base-Station Archive
//!
//! Day-partitioned archive of every valid message the base station hears,
//! plus the in-memory network counters.
//!
//! Partitions are keyed by the base station's own UTC day at reception
//! (`base_station_{YYYY-MM-DD}.csv`), not by the station's timestamp, so a
//! station with a wrong clock cannot scatter rows across old files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TelemetryError};
use crate::message::protocol::{format_timestamp, Measurement, ARCHIVE_FIELDS, FIELD_SEPARATOR};
use crate::message::decode_message;
use crate::storage::partition;

/// File name prefix of archive partitions
pub const ARCHIVE_PREFIX: &str = "base_station";

/// Point-in-time view of the network as seen by the base station
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkStatus {
    /// Every payload handed to the archive, valid or not
    pub total_received: u64,
    /// Rows durably appended
    pub total_saved: u64,
    /// Payloads dropped because they did not decode
    pub total_malformed: u64,
    pub last_packet_at: Option<DateTime<Utc>>,
    /// Distinct stations with at least one saved row
    pub station_count: usize,
    /// Saved rows per station
    pub stations: BTreeMap<String, u64>,
}

/// What happened to one inbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Saved(Measurement),
    /// Dropped, with the decode error
    Malformed(String),
    /// Decoded but the append failed
    StorageFailed(String),
}

#[derive(Debug, Default)]
struct Counters {
    total_received: u64,
    total_saved: u64,
    total_malformed: u64,
    last_packet_at: Option<DateTime<Utc>>,
    per_station: BTreeMap<String, u64>,
}

/// The base station's archive and its counters
#[derive(Debug)]
pub struct Archive {
    root: PathBuf,
    counters: Counters,
}

impl Archive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counters: Counters::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the archive root and check it is writable
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::Storage` if the directory is unusable
    pub fn initialize(&self) -> Result<()> {
        partition::ensure_writable_dir(&self.root).map_err(|source| TelemetryError::Storage {
            path: self.root.clone(),
            source,
        })?;
        info!("Archive ready at {}", self.root.display());
        Ok(())
    }

    /// Partition a payload received at `now` lands in
    pub fn partition_path(&self, now: DateTime<Utc>) -> PathBuf {
        self.root
            .join(partition::partition_file_name(ARCHIVE_PREFIX, now.date_naive()))
    }

    /// Decode one payload and append it to today's partition
    ///
    /// Malformed payloads are counted and dropped. Nothing here returns an
    /// error: the receive loop keeps going whatever one packet contains.
    ///
    /// # Arguments
    ///
    /// * `payload` - Raw bytes from the radio
    /// * `rssi` - Signal strength of the packet, if the radio reports one
    /// * `now` - Reception time
    pub fn ingest(&mut self, payload: &[u8], rssi: Option<i16>, now: DateTime<Utc>) -> IngestOutcome {
        self.counters.total_received += 1;
        self.counters.last_packet_at = Some(now);

        let text = String::from_utf8_lossy(payload);
        let measurement = match decode_message(text.trim()) {
            Ok(measurement) => measurement,
            Err(e) => {
                self.counters.total_malformed += 1;
                warn!("Dropping malformed payload {:?}: {}", text.trim(), e);
                return IngestOutcome::Malformed(e.to_string());
            }
        };

        let path = self.partition_path(now);
        let row = format_row(&measurement, rssi, now);
        if let Err(e) = partition::append_row(&path, &archive_header(), &row) {
            error!(
                "DATA LOSS RISK: failed to archive reading from {} to {}: {}",
                measurement.station_id,
                path.display(),
                e
            );
            return IngestOutcome::StorageFailed(e.to_string());
        }

        self.counters.total_saved += 1;
        *self
            .counters
            .per_station
            .entry(measurement.station_id.clone())
            .or_insert(0) += 1;
        debug!("Archived reading from {} to {}", measurement.station_id, path.display());

        IngestOutcome::Saved(measurement)
    }

    /// Snapshot of the counters
    pub fn get_network_status(&self) -> NetworkStatus {
        NetworkStatus {
            total_received: self.counters.total_received,
            total_saved: self.counters.total_saved,
            total_malformed: self.counters.total_malformed,
            last_packet_at: self.counters.last_packet_at,
            station_count: self.counters.per_station.len(),
            stations: self.counters.per_station.clone(),
        }
    }
}

fn archive_header() -> String {
    ARCHIVE_FIELDS.join(&FIELD_SEPARATOR.to_string())
}

fn format_row(m: &Measurement, rssi: Option<i16>, received_at: DateTime<Utc>) -> String {
    let optional = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    [
        received_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        m.station_id.clone(),
        format_timestamp(&m.timestamp),
        m.raw_distance_mm.to_string(),
        m.snow_depth_mm.to_string(),
        optional(m.sensor_temp_c),
        optional(m.battery_voltage),
        rssi.map(|r| r.to_string()).unwrap_or_default(),
    ]
    .join(&FIELD_SEPARATOR.to_string())
}
