//! # Telemetry Message Types
//!
//! Core record definitions shared by the radio codec, the station ledger and
//! the base-station archive.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};

/// Number of comma-separated fields in a radio message
pub const MESSAGE_FIELD_COUNT: usize = 6;

/// Field separator on the wire and in stored rows
pub const FIELD_SEPARATOR: char = ',';

/// Wire placeholder for an absent optional numeric field
pub const ABSENT_FIELD: &str = "-";

/// Ledger header, in row order
pub const LEDGER_FIELDS: [&str; 8] = [
    "timestamp",
    "station_id",
    "raw_distance_mm",
    "snow_depth_mm",
    "sensor_temp_c",
    "battery_voltage",
    "signal_quality",
    "transmission_status",
];

/// Base-station archive header, in row order
pub const ARCHIVE_FIELDS: [&str; 8] = [
    "received_at",
    "station_id",
    "timestamp",
    "raw_distance_mm",
    "snow_depth_mm",
    "sensor_temp_c",
    "battery_voltage",
    "rssi",
];

/// Station identifiers left over from configuration templates
pub const RESERVED_STATION_IDS: [&str; 3] = ["STN_XX", "TEMPLATE", "CHANGE_ME"];

/// Returns true when `station_id` is one of the template placeholders
pub fn is_reserved_station_id(station_id: &str) -> bool {
    let upper = station_id.trim().to_ascii_uppercase();
    RESERVED_STATION_IDS.iter().any(|reserved| *reserved == upper)
}

/// Delivery state of a stored reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionStatus {
    /// Built but not yet through a delivery attempt
    Pending,
    /// Handed to the radio successfully
    Success,
    /// Stored durably, not confirmed delivered
    LocalOnly,
}

impl TransmissionStatus {
    /// Text used in ledger rows
    pub fn as_str(&self) -> &'static str {
        match self {
            TransmissionStatus::Pending => "pending",
            TransmissionStatus::Success => "success",
            TransmissionStatus::LocalOnly => "local_only",
        }
    }

    /// Whether a reading may move from `self` to `next`
    ///
    /// Only `pending -> success`, `pending -> local_only` and
    /// `local_only -> success` are allowed.
    pub fn can_transition_to(&self, next: TransmissionStatus) -> bool {
        matches!(
            (self, next),
            (TransmissionStatus::Pending, TransmissionStatus::Success)
                | (TransmissionStatus::Pending, TransmissionStatus::LocalOnly)
                | (TransmissionStatus::LocalOnly, TransmissionStatus::Success)
        )
    }
}

impl fmt::Display for TransmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransmissionStatus {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "pending" => Ok(TransmissionStatus::Pending),
            "success" => Ok(TransmissionStatus::Success),
            "local_only" => Ok(TransmissionStatus::LocalOnly),
            other => Err(TelemetryError::MalformedMessage(format!(
                "unknown transmission status {:?}",
                other
            ))),
        }
    }
}

/// The six measured fields carried over the radio
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Capture time; the original offset is kept
    pub timestamp: DateTime<FixedOffset>,

    /// Station that took the measurement
    pub station_id: String,

    /// Sensor-to-surface distance in millimetres
    pub raw_distance_mm: i32,

    /// Ground height minus distance; negative when the surface is below ground level
    pub snow_depth_mm: i32,

    /// Air temperature in Celsius
    pub sensor_temp_c: Option<f64>,

    /// Battery voltage (no hardware source yet)
    pub battery_voltage: Option<f64>,
}

impl Measurement {
    /// UTC calendar day used to pick the ledger partition
    pub fn utc_date(&self) -> NaiveDate {
        self.timestamp.with_timezone(&Utc).date_naive()
    }
}

/// A measurement plus its link quality and delivery state
///
/// Only the transmission status can change after construction, and only
/// along the transitions allowed by [`TransmissionStatus::can_transition_to`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub measurement: Measurement,

    /// Link quality at capture time (0-100)
    pub signal_quality: u8,

    transmission_status: TransmissionStatus,
}

impl Reading {
    /// New reading in the `pending` state
    pub fn new(measurement: Measurement, signal_quality: u8) -> Self {
        Self::with_status(measurement, signal_quality, TransmissionStatus::Pending)
    }

    /// Reading restored with a known status (e.g. from a ledger row)
    pub fn with_status(
        measurement: Measurement,
        signal_quality: u8,
        transmission_status: TransmissionStatus,
    ) -> Self {
        Self {
            measurement,
            signal_quality: signal_quality.min(100),
            transmission_status,
        }
    }

    pub fn transmission_status(&self) -> TransmissionStatus {
        self.transmission_status
    }

    /// Move to `next`, rejecting transitions the lifecycle forbids
    pub fn transition_to(&mut self, next: TransmissionStatus) -> Result<()> {
        if !self.transmission_status.can_transition_to(next) {
            return Err(TelemetryError::InvalidTransition {
                from: self.transmission_status,
                to: next,
            });
        }
        self.transmission_status = next;
        Ok(())
    }

    pub fn station_id(&self) -> &str {
        &self.measurement.station_id
    }

    pub fn timestamp(&self) -> &DateTime<FixedOffset> {
        &self.measurement.timestamp
    }
}

/// Canonical text form of a timestamp (`Z` for UTC, offset otherwise)
pub fn format_timestamp(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse an RFC 3339 timestamp, keeping its offset
pub fn parse_timestamp(text: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text.trim()).map_err(|e| {
        TelemetryError::MalformedMessage(format!("invalid timestamp {:?}: {}", text, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement(ts: &str) -> Measurement {
        Measurement {
            timestamp: parse_timestamp(ts).unwrap(),
            station_id: "STN_01".to_string(),
            raw_distance_mm: 1850,
            snow_depth_mm: 150,
            sensor_temp_c: None,
            battery_voltage: None,
        }
    }

    #[test]
    fn test_status_text_round_trip() {
        for status in [
            TransmissionStatus::Pending,
            TransmissionStatus::Success,
            TransmissionStatus::LocalOnly,
        ] {
            assert_eq!(status.as_str().parse::<TransmissionStatus>().unwrap(), status);
        }
        assert!("sent".parse::<TransmissionStatus>().is_err());
    }

    #[test]
    fn test_allowed_transitions() {
        use TransmissionStatus::*;
        assert!(Pending.can_transition_to(Success));
        assert!(Pending.can_transition_to(LocalOnly));
        assert!(LocalOnly.can_transition_to(Success));

        assert!(!Success.can_transition_to(LocalOnly));
        assert!(!Success.can_transition_to(Pending));
        assert!(!LocalOnly.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Success.can_transition_to(Success));
    }

    #[test]
    fn test_reading_rejects_invalid_transition() {
        let mut reading = Reading::new(measurement("2024-01-01T00:00:00Z"), 50);
        assert_eq!(reading.transmission_status(), TransmissionStatus::Pending);

        reading.transition_to(TransmissionStatus::LocalOnly).unwrap();
        reading.transition_to(TransmissionStatus::Success).unwrap();

        let err = reading.transition_to(TransmissionStatus::LocalOnly).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidTransition { .. }));
        assert_eq!(reading.transmission_status(), TransmissionStatus::Success);
    }

    #[test]
    fn test_signal_quality_is_clamped() {
        let reading = Reading::new(measurement("2024-01-01T00:00:00Z"), 250);
        assert_eq!(reading.signal_quality, 100);
    }

    #[test]
    fn test_utc_date_crosses_midnight_for_negative_offset() {
        let m = measurement("2024-01-15T23:59:00-05:00");
        assert_eq!(m.utc_date(), NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
    }

    #[test]
    fn test_format_timestamp_keeps_offset() {
        let utc = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(format_timestamp(&utc), "2024-01-01T00:00:00Z");

        let local = parse_timestamp("2024-01-15T23:59:00-05:00").unwrap();
        assert_eq!(format_timestamp(&local), "2024-01-15T23:59:00-05:00");
    }

    #[test]
    fn test_reserved_station_ids() {
        assert!(is_reserved_station_id("STN_XX"));
        assert!(is_reserved_station_id("change_me"));
        assert!(is_reserved_station_id(" template "));
        assert!(!is_reserved_station_id("STN_01"));
    }
}
