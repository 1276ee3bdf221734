//! # DS18B20 Temperature Sensor
//!
//! Reads a DS18B20 through the kernel `w1-therm` driver.
//!
//! The sensor appears as `<w1_devices_dir>/28-XXXXXXXXXXXX/w1_slave`:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The first line must end in `YES` (CRC valid); `t=` is in millidegrees.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::TemperatureSensor;
use crate::error::{Result, TelemetryError};

/// 1-Wire family code prefix for DS18B20 devices
const DS18B20_PREFIX: &str = "28-";

/// Reads retried after a CRC failure
const READ_ATTEMPTS: usize = 3;

/// DS18B20 on the 1-Wire bus
#[derive(Debug)]
pub struct W1Thermometer {
    device_path: PathBuf,
}

impl W1Thermometer {
    /// Find the first DS18B20 under `w1_devices_dir`
    ///
    /// Devices are scanned in name order so the choice is stable when
    /// several probes are attached.
    ///
    /// # Errors
    ///
    /// - `SensorNotFound`: the directory is missing or holds no `28-*` device
    /// - `Sensor`: the directory cannot be listed
    pub fn discover<P: AsRef<Path>>(w1_devices_dir: P) -> Result<Self> {
        let dir = w1_devices_dir.as_ref();
        if !dir.exists() {
            return Err(TelemetryError::SensorNotFound(format!(
                "{} does not exist (is the w1-gpio overlay enabled?)",
                dir.display()
            )));
        }

        let mut entries: Vec<_> = fs::read_dir(dir)
            .map_err(|e| TelemetryError::Sensor(format!("Failed to read {}: {}", dir.display(), e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TelemetryError::Sensor(format!("Failed to read directory entry: {}", e)))?;
        entries.sort_by_key(|entry| entry.path());

        for entry in entries {
            let path = entry.path();
            let is_ds18b20 = path
                .file_name()
                .map(|name| name.to_string_lossy().starts_with(DS18B20_PREFIX))
                .unwrap_or(false);
            if !is_ds18b20 {
                continue;
            }

            let device_path = path.join("w1_slave");
            if device_path.exists() {
                info!("Found DS18B20 at: {}", path.display());
                return Ok(Self { device_path });
            }
            debug!("{} has no w1_slave attribute", path.display());
        }

        Err(TelemetryError::SensorNotFound(format!(
            "no DS18B20 under {}",
            dir.display()
        )))
    }

    /// Device id such as `28-0123456789ab`
    pub fn device_id(&self) -> Option<String> {
        self.device_path
            .parent()
            .and_then(|dir| dir.file_name())
            .map(|name| name.to_string_lossy().into_owned())
    }
}

/// Temperature from one `w1_slave` read, `None` on CRC failure or bad format
fn parse_w1_slave(contents: &str) -> Option<f64> {
    let mut lines = contents.lines();
    let crc_line = lines.next()?;
    if !crc_line.trim_end().ends_with("YES") {
        return None;
    }
    let data_line = lines.next()?;
    let (_, millidegrees) = data_line.split_once("t=")?;
    let millidegrees: i32 = millidegrees.trim().parse().ok()?;
    Some(f64::from(millidegrees) / 1000.0)
}

impl TemperatureSensor for W1Thermometer {
    fn read_temperature_c(&mut self) -> Option<f64> {
        for attempt in 1..=READ_ATTEMPTS {
            let contents = match fs::read_to_string(&self.device_path) {
                Ok(contents) => contents,
                Err(e) => {
                    warn!("Error reading temperature: {}", e);
                    return None;
                }
            };
            if let Some(celsius) = parse_w1_slave(&contents) {
                return Some(celsius);
            }
            debug!("DS18B20 read {} of {} failed CRC", attempt, READ_ATTEMPTS);
        }
        warn!("DS18B20 returned no valid reading after {} attempts", READ_ATTEMPTS);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GOOD: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";

    fn probe(dir: &Path, id: &str, contents: &str) {
        let device = dir.join(id);
        fs::create_dir_all(&device).unwrap();
        fs::write(device.join("w1_slave"), contents).unwrap();
    }

    #[test]
    fn test_parse_w1_slave() {
        assert_eq!(parse_w1_slave(GOOD), Some(23.125));
        assert_eq!(
            parse_w1_slave("00 : crc=00 YES\n00 t=-5250\n"),
            Some(-5.25)
        );
        assert_eq!(parse_w1_slave("00 : crc=12 NO\n00 t=23125\n"), None);
        assert_eq!(parse_w1_slave("00 : crc=00 YES\n"), None);
        assert_eq!(parse_w1_slave(""), None);
    }

    #[test]
    fn test_discover_picks_first_ds18b20() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("w1_bus_master1")).unwrap();
        probe(dir.path(), "28-0000000000bb", GOOD);
        probe(dir.path(), "28-0000000000aa", GOOD);

        let sensor = W1Thermometer::discover(dir.path()).unwrap();
        assert_eq!(sensor.device_id().as_deref(), Some("28-0000000000aa"));
    }

    #[test]
    fn test_discover_without_device() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("w1_bus_master1")).unwrap();
        assert!(matches!(
            W1Thermometer::discover(dir.path()),
            Err(TelemetryError::SensorNotFound(_))
        ));
        assert!(W1Thermometer::discover(dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_read_temperature() {
        let dir = TempDir::new().unwrap();
        probe(dir.path(), "28-0000000000aa", GOOD);

        let mut sensor = W1Thermometer::discover(dir.path()).unwrap();
        assert_eq!(sensor.read_temperature_c(), Some(23.125));
    }

    #[test]
    fn test_read_temperature_crc_failure() {
        let dir = TempDir::new().unwrap();
        probe(dir.path(), "28-0000000000aa", "00 : crc=12 NO\n00 t=85000\n");

        let mut sensor = W1Thermometer::discover(dir.path()).unwrap();
        assert_eq!(sensor.read_temperature_c(), None);
    }

    #[test]
    fn test_read_temperature_device_removed() {
        let dir = TempDir::new().unwrap();
        probe(dir.path(), "28-0000000000aa", GOOD);

        let mut sensor = W1Thermometer::discover(dir.path()).unwrap();
        fs::remove_dir_all(dir.path().join("28-0000000000aa")).unwrap();
        assert_eq!(sensor.read_temperature_c(), None);
    }
}
