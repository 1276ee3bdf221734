//! # Error Types
//!
//! Custom error types for Snow Telemetry using `thiserror`.

use std::path::PathBuf;

use thiserror::Error;

use crate::message::TransmissionStatus;

/// Main error type for Snow Telemetry
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Radio payload did not match the six-field message format
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// No radio modem could be opened on any candidate port
    #[error("No radio modem found (tried: {0})")]
    RadioNotFound(String),

    /// Serial I/O failure talking to the radio modem
    #[error("Radio error: {0}")]
    Radio(String),

    /// Modem answered a command with `+ERR=<code>`
    #[error("Radio modem rejected command (+ERR={0})")]
    ModemRejected(u16),

    /// Modem answered with something other than the expected acknowledgement
    #[error("Unexpected modem response: {0:?}")]
    UnexpectedResponse(String),

    /// No acknowledgement or packet within the configured timeout
    #[error("Radio timed out after {0} ms")]
    RadioTimeout(u64),

    /// Payload exceeds what the modem can carry in one transmission
    #[error("Payload too large for radio: {0} bytes (max {1})")]
    PayloadTooLarge(usize, usize),

    /// Sensor device missing from sysfs
    #[error("Sensor not found: {0}")]
    SensorNotFound(String),

    /// Sensor device present but unreadable
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Storage root could not be created or written
    #[error("Storage unavailable at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Backup mirroring is required but its root is unusable
    #[error("Required backup storage unavailable at {path}: {reason}")]
    BackupRequired { path: PathBuf, reason: String },

    /// A reading's transmission status cannot move in the requested direction
    #[error("Invalid transmission status transition: {from} -> {to}")]
    InvalidTransition {
        from: TransmissionStatus,
        to: TransmissionStatus,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Snow Telemetry
pub type Result<T> = std::result::Result<T, TelemetryError>;
