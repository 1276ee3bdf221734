//! # Configuration Module
//!
//! Handles loading and validating station and base-station configuration
//! from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Result, TelemetryError};
use crate::message::protocol::{is_reserved_station_id, FIELD_SEPARATOR};
use crate::storage::SyncMode;

/// Sensor station configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StationConfig {
    pub station: StationIdentity,
    #[serde(default)]
    pub sensors: SensorConfig,
    pub radio: RadioConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

/// Base station configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BaseConfig {
    pub radio: RadioConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

/// Station identity, placement and measurement schedule
#[derive(Debug, Deserialize, Clone)]
pub struct StationIdentity {
    pub station_id: String,

    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: f64,

    /// Distance from the range finder to bare ground
    pub ground_height_mm: i32,

    #[serde(default = "default_measurement_interval_seconds")]
    pub measurement_interval_seconds: u64,

    #[serde(default = "default_samples_per_reading")]
    pub samples_per_reading: usize,
}

/// Sensor device locations
#[derive(Debug, Deserialize, Clone)]
pub struct SensorConfig {
    #[serde(default = "default_range_finder_path")]
    pub range_finder_path: String,

    #[serde(default = "default_w1_devices_dir")]
    pub w1_devices_dir: String,

    #[serde(default = "default_temp_sensor_enabled")]
    pub temp_sensor_enabled: bool,
}

/// LoRa modem configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RadioConfig {
    #[serde(default = "default_radio_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_frequency_mhz")]
    pub frequency_mhz: f64,

    #[serde(default = "default_spreading_factor")]
    pub spreading_factor: u8,

    #[serde(default = "default_bandwidth_hz")]
    pub bandwidth_hz: u32,

    #[serde(default = "default_tx_power_dbm")]
    pub tx_power_dbm: u8,

    #[serde(default = "default_network_id")]
    pub network_id: u8,

    /// This node's address
    #[serde(default = "default_station_address")]
    pub address: u16,

    #[serde(default = "default_base_station_address")]
    pub base_station_address: u16,
}

/// Primary ledger location and retention
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,

    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

/// Backup mirror settings
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackupConfig {
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub sync_mode: SyncMode,

    #[serde(default)]
    pub required: bool,
}

/// Base-station archive settings
#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_path")]
    pub path: String,

    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    #[serde(default = "default_status_interval_s")]
    pub status_interval_s: u64,
}

// Default value functions
fn default_measurement_interval_seconds() -> u64 { 900 }
fn default_samples_per_reading() -> usize { 5 }

fn default_range_finder_path() -> String { "/sys/bus/iio/devices/iio:device0/in_distance_raw".to_string() }
fn default_w1_devices_dir() -> String { "/sys/bus/w1/devices".to_string() }
fn default_temp_sensor_enabled() -> bool { true }

fn default_radio_port() -> String { "/dev/ttyS0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 3000 }
fn default_frequency_mhz() -> f64 { 915.0 }
fn default_spreading_factor() -> u8 { 7 }
fn default_bandwidth_hz() -> u32 { 125000 }
fn default_tx_power_dbm() -> u8 { 22 }
fn default_network_id() -> u8 { 18 }
fn default_station_address() -> u16 { 1 }
fn default_base_station_address() -> u16 { 0 }

fn default_storage_path() -> String { "/home/pi/snow_data".to_string() }
fn default_max_files() -> usize { 30 }

fn default_archive_path() -> String { "/home/pi/snow_base_data".to_string() }
fn default_receive_timeout_ms() -> u64 { 1000 }
fn default_status_interval_s() -> u64 { 300 }

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            range_finder_path: default_range_finder_path(),
            w1_devices_dir: default_w1_devices_dir(),
            temp_sensor_enabled: default_temp_sensor_enabled(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            max_files: default_max_files(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: default_archive_path(),
            receive_timeout_ms: default_receive_timeout_ms(),
            status_interval_s: default_status_interval_s(),
        }
    }
}

/// Bandwidths the modem's `AT+PARAMETER` accepts
pub const SUPPORTED_BANDWIDTHS_HZ: [u32; 10] = [
    7800, 10400, 15600, 20800, 31250, 41700, 62500, 125000, 250000, 500000,
];

fn invalid(msg: impl std::fmt::Display) -> TelemetryError {
    TelemetryError::Config(toml::de::Error::custom(msg))
}

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Err(invalid(format!("configuration file {} is empty", path.display())));
    }
    Ok(toml::from_str(&contents)?)
}

impl StationConfig {
    /// Load station configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read or is empty
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use snow_telemetry::config::StationConfig;
    ///
    /// let config = StationConfig::load("config/station_01.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: StationConfig = read_toml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        let station = &self.station;
        let id = station.station_id.trim();

        if id.is_empty() {
            return Err(invalid("station_id cannot be empty"));
        }
        if is_reserved_station_id(id) {
            return Err(invalid(format!(
                "station_id {:?} is a placeholder and must be unique",
                id
            )));
        }
        if id.contains(FIELD_SEPARATOR) || id != station.station_id {
            return Err(invalid("station_id cannot contain commas or surrounding whitespace"));
        }

        if !(-90.0..=90.0).contains(&station.latitude) {
            return Err(invalid("latitude must be between -90 and 90"));
        }
        if !(-180.0..=180.0).contains(&station.longitude) {
            return Err(invalid("longitude must be between -180 and 180"));
        }
        if station.latitude == 0.0 && station.longitude == 0.0 {
            return Err(invalid("latitude/longitude are still the template defaults (0, 0)"));
        }

        if station.ground_height_mm <= 0 {
            return Err(invalid("ground_height_mm must be greater than 0"));
        }
        if station.measurement_interval_seconds == 0 {
            return Err(invalid("measurement_interval_seconds must be greater than 0"));
        }
        if station.samples_per_reading == 0 || station.samples_per_reading > 50 {
            return Err(invalid("samples_per_reading must be between 1 and 50"));
        }

        if self.sensors.range_finder_path.is_empty() {
            return Err(invalid("range_finder_path cannot be empty"));
        }

        self.radio.validate()?;
        if self.radio.address == self.radio.base_station_address {
            return Err(invalid("station address and base_station_address must be different"));
        }

        if self.storage.path.is_empty() {
            return Err(invalid("storage path cannot be empty"));
        }
        if self.storage.max_files == 0 {
            return Err(invalid("max_files must be greater than 0"));
        }

        if let Some(backup) = &self.backup.path {
            if backup.is_empty() {
                return Err(invalid("backup path cannot be empty when set"));
            }
            if Path::new(backup) == Path::new(&self.storage.path) {
                return Err(invalid("backup path must differ from the primary storage path"));
            }
        } else if self.backup.required {
            return Err(invalid("backup is required but no backup path is configured"));
        }

        Ok(())
    }
}

impl BaseConfig {
    /// Load base-station configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: BaseConfig = read_toml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.radio.validate()?;

        if self.archive.path.is_empty() {
            return Err(invalid("archive path cannot be empty"));
        }
        if self.archive.receive_timeout_ms == 0 || self.archive.receive_timeout_ms > 60000 {
            return Err(invalid("receive_timeout_ms must be between 1 and 60000"));
        }
        if self.archive.status_interval_s == 0 {
            return Err(invalid("status_interval_s must be greater than 0"));
        }
        Ok(())
    }
}

impl RadioConfig {
    fn validate(&self) -> Result<()> {
        if self.port.is_empty() {
            return Err(invalid("radio port cannot be empty"));
        }
        if ![9600, 19200, 38400, 57600, 115200].contains(&self.baud_rate) {
            return Err(invalid("baud_rate must be one of: 9600, 19200, 38400, 57600, 115200"));
        }
        if self.timeout_ms == 0 || self.timeout_ms > 60000 {
            return Err(invalid("timeout_ms must be between 1 and 60000"));
        }
        if !(self.frequency_mhz >= 820.0 && self.frequency_mhz <= 1020.0) {
            return Err(invalid("frequency_mhz must be between 820 and 1020"));
        }
        if !(7..=12).contains(&self.spreading_factor) {
            return Err(invalid("spreading_factor must be between 7 and 12"));
        }
        if !SUPPORTED_BANDWIDTHS_HZ.contains(&self.bandwidth_hz) {
            return Err(invalid(format!(
                "bandwidth_hz {} is not supported by the modem",
                self.bandwidth_hz
            )));
        }
        if self.tx_power_dbm > 22 {
            return Err(invalid("tx_power_dbm must be between 0 and 22"));
        }
        Ok(())
    }
}
