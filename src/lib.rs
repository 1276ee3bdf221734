//! # Snow Telemetry Library
//!
//! Durable snow-depth telemetry for a field network of LoRa sensor stations
//! and the base station that collects their readings.
//!
//! Stations measure on a fixed interval, try to radio each reading to the
//! base station, and always keep a local copy whose status records whether
//! the radio accepted it. Nothing is lost when the link is down.

pub mod config;
pub mod error;
pub mod message;
pub mod storage;
pub mod radio;
pub mod sensors;
pub mod station;
pub mod base;
