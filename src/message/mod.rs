//! # Telemetry Message Module
//!
//! Readings, their delivery lifecycle, and the compact radio line format.
//!
//! This module handles:
//! - The `Measurement` / `Reading` record types
//! - The `pending -> success | local_only -> success` status lifecycle
//! - Encoding measurements into six comma-separated fields
//! - Decoding and validating inbound radio lines

pub mod protocol;
pub mod encoder;
pub mod decoder;

pub use decoder::decode_message;
pub use encoder::{encode_measurement, encode_reading};
pub use protocol::{Measurement, Reading, TransmissionStatus};
