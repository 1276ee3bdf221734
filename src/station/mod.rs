//! # Station Module
//!
//! The sensor station's measurement loop.
//!
//! Each cycle:
//! 1. Take a reading (depth, temperature, signal quality, timestamp)
//! 2. Attempt delivery and persist the reading with its status
//! 3. Update the status display
//! 4. Wait for the next tick
//!
//! The loop runs until the shutdown channel flips; the cycle in progress is
//! always allowed to finish. Hardware is released when the station is dropped.

pub mod delivery;

use std::time::Duration;

use chrono::{SubsecRound, Utc};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::StationConfig;
use crate::error::Result;
use crate::message::protocol::Measurement;
use crate::message::Reading;
use crate::radio::{signal_quality, LoRaModem, RadioTransport};
use crate::sensors::{
    DepthGauge, DepthSensor, IioRangeFinder, LogDisplay, StatusDisplay, TemperatureSensor,
    W1Thermometer,
};
use crate::storage::LocalStorage;

pub use delivery::{deliver, DeliveryReport, LocalOnlyReason};

/// The devices a station talks to
pub struct StationHardware {
    pub depth: Box<dyn DepthSensor>,
    pub temperature: Option<Box<dyn TemperatureSensor>>,
    pub display: Box<dyn StatusDisplay>,
    pub radio: Option<Box<dyn RadioTransport>>,
}

impl StationHardware {
    /// Open the Linux devices named in the configuration
    ///
    /// The range finder is mandatory. A missing thermometer or radio is
    /// logged and the station runs without it.
    ///
    /// # Errors
    ///
    /// Returns error if the range finder attribute does not exist
    pub async fn open(config: &StationConfig) -> Result<Self> {
        let range_finder = IioRangeFinder::open(&config.sensors.range_finder_path)?;
        info!("Range finder at {}", range_finder.path().display());
        let depth = DepthGauge::new(range_finder, config.station.ground_height_mm);

        let temperature: Option<Box<dyn TemperatureSensor>> = if config.sensors.temp_sensor_enabled {
            match W1Thermometer::discover(&config.sensors.w1_devices_dir) {
                Ok(sensor) => Some(Box::new(sensor)),
                Err(e) => {
                    warn!("Temperature sensor unavailable: {}", e);
                    None
                }
            }
        } else {
            info!("Temperature sensor disabled in configuration");
            None
        };

        let radio: Option<Box<dyn RadioTransport>> =
            match LoRaModem::open(&config.radio, config.radio.base_station_address).await {
                Ok(modem) => Some(Box::new(modem)),
                Err(e) => {
                    warn!("Radio unavailable, readings will be stored locally only: {}", e);
                    None
                }
            };

        Ok(Self {
            depth: Box::new(depth),
            temperature,
            display: Box::new(LogDisplay::new()),
            radio,
        })
    }
}

/// A sensor station: hardware, storage and schedule
pub struct SensorStation {
    config: StationConfig,
    hardware: StationHardware,
    storage: LocalStorage,
    last_tx_success: Option<bool>,
}

impl SensorStation {
    pub fn new(config: StationConfig, hardware: StationHardware, storage: LocalStorage) -> Self {
        Self {
            config,
            hardware,
            storage,
            last_tx_success: None,
        }
    }

    /// Open storage and hardware for `config`
    ///
    /// # Errors
    ///
    /// Returns error if storage cannot be initialized (including a required
    /// backup that is unavailable) or the range finder is missing
    pub async fn from_config(config: StationConfig) -> Result<Self> {
        let storage = LocalStorage::from_config(&config)?;
        let hardware = StationHardware::open(&config).await?;
        Ok(Self::new(config, hardware, storage))
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn has_radio(&self) -> bool {
        self.hardware.radio.is_some()
    }

    /// Sample the sensors into a new `pending` reading
    ///
    /// Returns `None` when the range finder produced no valid distance.
    pub fn take_reading(&mut self) -> Option<Reading> {
        let samples = self.config.station.samples_per_reading;
        let (distance, depth) = self.hardware.depth.get_reading(samples);
        let (raw_distance_mm, snow_depth_mm) = match (distance, depth) {
            (Some(distance), Some(depth)) => (distance, depth),
            _ => {
                warn!("No valid distance from range finder, skipping this cycle");
                return None;
            }
        };

        let sensor_temp_c = self
            .hardware
            .temperature
            .as_mut()
            .and_then(|sensor| sensor.read_temperature_c());
        let rssi = self.hardware.radio.as_ref().and_then(|radio| radio.last_rssi());

        let measurement = Measurement {
            timestamp: Utc::now().trunc_subsecs(0).fixed_offset(),
            station_id: self.config.station.station_id.clone(),
            raw_distance_mm,
            snow_depth_mm,
            sensor_temp_c,
            battery_voltage: None,
        };
        Some(Reading::new(measurement, signal_quality(rssi)))
    }

    /// Run one measure/deliver/display cycle
    pub async fn run_cycle(&mut self) -> Option<DeliveryReport> {
        match self.take_reading() {
            Some(mut reading) => {
                match deliver(&mut reading, self.hardware.radio.as_deref_mut(), &mut self.storage).await {
                    Ok(report) => {
                        self.last_tx_success = Some(report.transmitted());
                        self.update_display(Some(&reading));
                        Some(report)
                    }
                    Err(e) => {
                        error!("Delivery attempt rejected: {}", e);
                        None
                    }
                }
            }
            None => {
                self.update_display(None);
                None
            }
        }
    }

    fn update_display(&mut self, reading: Option<&Reading>) {
        let quality = reading.map(|r| r.signal_quality);
        self.hardware.display.update_status(
            &self.config.station.station_id,
            reading.map(|r| r.measurement.snow_depth_mm),
            reading.and_then(|r| r.measurement.sensor_temp_c),
            quality,
            self.last_tx_success,
        );
    }

    /// Measure on a fixed interval until `shutdown` flips to `true`
    ///
    /// The first cycle runs immediately. Ticks missed while a cycle overran
    /// are skipped so the schedule does not drift or bunch up.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let period = Duration::from_secs(self.config.station.measurement_interval_seconds);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Station {} measuring every {}s ({})",
            self.config.station.station_id,
            period.as_secs(),
            if self.has_radio() { "radio enabled" } else { "local only" }
        );

        let mut cycles: u64 = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    info!("Shutdown requested");
                    break;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            self.run_cycle().await;
            cycles += 1;
        }

        info!("Station stopped after {} cycles", cycles);
        Ok(())
    }
}

impl Drop for SensorStation {
    fn drop(&mut self) {
        if let Err(e) = self.hardware.depth.release() {
            error!("Failed to release range finder: {}", e);
        }
        if let Some(sensor) = self.hardware.temperature.as_mut() {
            if let Err(e) = sensor.release() {
                error!("Failed to release temperature sensor: {}", e);
            }
        }
        if let Err(e) = self.hardware.display.release() {
            error!("Failed to release display: {}", e);
        }
        info!("Station hardware released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use crate::message::TransmissionStatus;
    use crate::radio::MockRadioTransport;
    use crate::sensors::{MockDepthSensor, MockStatusDisplay, MockTemperatureSensor};
    use crate::storage::{BackupMirror, Ledger};
    use tempfile::TempDir;

    fn config(interval_s: u64) -> StationConfig {
        let text = format!(
            r#"
[station]
station_id = "STN_01"
latitude = 45.1
longitude = -111.2
elevation_m = 1200
ground_height_mm = 2000
measurement_interval_seconds = {}
samples_per_reading = 3

[radio]
"#,
            interval_s
        );
        toml::from_str(&text).unwrap()
    }

    fn storage(dir: &TempDir) -> LocalStorage {
        LocalStorage::open(
            Ledger::new(dir.path().join("sd"), "STN_01", 30),
            BackupMirror::disabled(),
        )
        .unwrap()
    }

    fn depth(reading: (Option<i32>, Option<i32>)) -> Box<MockDepthSensor> {
        let mut depth = MockDepthSensor::new();
        depth.expect_get_reading().with(mockall::predicate::eq(3)).returning(move |_| reading);
        depth.expect_release().times(1).returning(|| Ok(()));
        Box::new(depth)
    }

    fn display(calls: usize) -> Box<MockStatusDisplay> {
        let mut display = MockStatusDisplay::new();
        display.expect_update_status().times(calls).return_const(());
        display.expect_release().times(1).returning(|| Ok(()));
        Box::new(display)
    }

    #[test]
    fn test_take_reading_builds_pending_reading() {
        let dir = TempDir::new().unwrap();
        let mut temperature = MockTemperatureSensor::new();
        temperature.expect_read_temperature_c().returning(|| Some(-5.2));
        temperature.expect_release().returning(|| Ok(()));
        let mut radio = MockRadioTransport::new();
        radio.expect_last_rssi().return_const(Some(-75i16));

        let hardware = StationHardware {
            depth: depth((Some(1850), Some(150))),
            temperature: Some(Box::new(temperature)),
            display: display(0),
            radio: Some(Box::new(radio)),
        };
        let mut station = SensorStation::new(config(900), hardware, storage(&dir));

        let reading = station.take_reading().unwrap();
        assert_eq!(reading.station_id(), "STN_01");
        assert_eq!(reading.measurement.raw_distance_mm, 1850);
        assert_eq!(reading.measurement.snow_depth_mm, 150);
        assert_eq!(reading.measurement.sensor_temp_c, Some(-5.2));
        assert_eq!(reading.measurement.battery_voltage, None);
        assert_eq!(reading.signal_quality, 50);
        assert_eq!(reading.transmission_status(), TransmissionStatus::Pending);
        assert_eq!(reading.timestamp().timestamp_subsec_nanos(), 0);
        assert_eq!(reading.timestamp().offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_take_reading_without_distance_skips() {
        let dir = TempDir::new().unwrap();
        let hardware = StationHardware {
            depth: depth((None, None)),
            temperature: None,
            display: display(0),
            radio: None,
        };
        let mut station = SensorStation::new(config(900), hardware, storage(&dir));
        assert!(station.take_reading().is_none());
    }

    #[tokio::test]
    async fn test_cycle_without_radio_stores_local_only() {
        let dir = TempDir::new().unwrap();
        let mut display = MockStatusDisplay::new();
        display
            .expect_update_status()
            .withf(|id, depth, temp, quality, tx| {
                id == "STN_01"
                    && *depth == Some(150)
                    && temp.is_none()
                    && *quality == Some(0)
                    && *tx == Some(false)
            })
            .times(1)
            .return_const(());
        display.expect_release().returning(|| Ok(()));

        let hardware = StationHardware {
            depth: depth((Some(1850), Some(150))),
            temperature: None,
            display: Box::new(display),
            radio: None,
        };
        let mut station = SensorStation::new(config(900), hardware, storage(&dir));

        let report = station.run_cycle().await.unwrap();
        assert_eq!(report.reason, Some(LocalOnlyReason::NoRadio));
        assert_eq!(station.storage().get_unsent_readings().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_with_failing_radio_keeps_running() {
        let dir = TempDir::new().unwrap();
        let mut radio = MockRadioTransport::new();
        radio.expect_last_rssi().return_const(None);
        radio
            .expect_send()
            .times(2)
            .returning(|_| Err(TelemetryError::Radio("port closed".to_string())));

        let hardware = StationHardware {
            depth: depth((Some(1850), Some(150))),
            temperature: None,
            display: display(2),
            radio: Some(Box::new(radio)),
        };
        let mut station = SensorStation::new(config(900), hardware, storage(&dir));

        for _ in 0..2 {
            let report = station.run_cycle().await.unwrap();
            assert_eq!(report.status, TransmissionStatus::LocalOnly);
        }
        assert_eq!(station.storage().storage_stats().unwrap().unsent_rows, 2);
    }

    #[tokio::test]
    async fn test_cycle_without_distance_updates_display_only() {
        let dir = TempDir::new().unwrap();
        let hardware = StationHardware {
            depth: depth((None, None)),
            temperature: None,
            display: display(1),
            radio: None,
        };
        let mut station = SensorStation::new(config(900), hardware, storage(&dir));

        assert!(station.run_cycle().await.is_none());
        assert!(station.storage().ledger().partitions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let hardware = StationHardware {
            depth: depth((Some(1850), Some(150))),
            temperature: None,
            display: display(1),
            radio: None,
        };
        let mut station = SensorStation::new(config(3600), hardware, storage(&dir));

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
        });

        // First tick fires immediately, the next one is an hour away
        station.run(rx).await.unwrap();
        assert_eq!(station.storage().storage_stats().unwrap().total_rows, 1);
    }

    #[tokio::test]
    async fn test_drop_logs_release_failure() {
        let dir = TempDir::new().unwrap();
        let mut depth = MockDepthSensor::new();
        depth
            .expect_release()
            .times(1)
            .returning(|| Err(TelemetryError::Sensor("bus error".to_string())));
        let hardware = StationHardware {
            depth: Box::new(depth),
            temperature: None,
            display: display(0),
            radio: None,
        };

        // Drop must not panic when a release fails
        drop(SensorStation::new(config(900), hardware, storage(&dir)));
    }
}
