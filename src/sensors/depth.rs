//! # Depth Measurement
//!
//! Turns single distance samples from a downward-facing range finder into a
//! snow depth reading.
//!
//! ## Reduction
//!
//! - Samples outside `0..=4000 mm` are discarded as echoes or dropouts
//! - The median of the remaining samples is taken, rounded to whole mm
//! - Depth is `ground_height_mm - distance`, so it may be negative when the
//!   ground has settled below the configured height

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::DepthSensor;
use crate::error::{Result, TelemetryError};

/// Furthest distance the range finder reports reliably
pub const MAX_DISTANCE_MM: i32 = 4000;

/// One distance sample per call
#[cfg_attr(test, mockall::automock)]
pub trait RangeFinder: Send {
    /// Distance to the surface in mm, `None` on a failed measurement
    fn sample_mm(&mut self) -> Option<i32>;

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Median-filtered depth sensor over a [`RangeFinder`]
pub struct DepthGauge<R: RangeFinder> {
    range_finder: R,
    ground_height_mm: i32,
}

impl<R: RangeFinder> DepthGauge<R> {
    pub fn new(range_finder: R, ground_height_mm: i32) -> Self {
        Self {
            range_finder,
            ground_height_mm,
        }
    }

    /// Median of the valid samples, rounded half away from zero
    fn median_distance(&mut self, num_samples: usize) -> Option<i32> {
        let mut samples: Vec<i32> = (0..num_samples)
            .filter_map(|_| self.range_finder.sample_mm())
            .filter(|mm| (0..=MAX_DISTANCE_MM).contains(mm))
            .collect();

        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();

        let mid = samples.len() / 2;
        let median = if samples.len() % 2 == 0 {
            (f64::from(samples[mid - 1]) + f64::from(samples[mid])) / 2.0
        } else {
            f64::from(samples[mid])
        };
        debug!("Depth samples {:?}, median {}", samples, median);
        Some(median.round() as i32)
    }
}

impl<R: RangeFinder> DepthSensor for DepthGauge<R> {
    fn get_reading(&mut self, num_samples: usize) -> (Option<i32>, Option<i32>) {
        match self.median_distance(num_samples) {
            Some(distance) => (Some(distance), Some(self.ground_height_mm - distance)),
            None => (None, None),
        }
    }

    fn release(&mut self) -> Result<()> {
        self.range_finder.release()
    }
}

/// Range finder exposed through the Linux IIO subsystem
///
/// The driver publishes the latest distance as an integer number of
/// millimetres in a sysfs attribute such as `in_distance_raw`.
#[derive(Debug)]
pub struct IioRangeFinder {
    path: PathBuf,
}

impl IioRangeFinder {
    /// Use the attribute at `path`
    ///
    /// # Errors
    ///
    /// Returns `SensorNotFound` if the attribute does not exist
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TelemetryError::SensorNotFound(path.display().to_string()));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RangeFinder for IioRangeFinder {
    fn sample_mm(&mut self) -> Option<i32> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to read range finder {}: {}", self.path.display(), e);
                return None;
            }
        };
        match text.trim().parse::<i32>() {
            Ok(mm) => Some(mm),
            Err(_) => {
                warn!("Range finder returned non-numeric sample: {:?}", text.trim());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    struct ScriptedRangeFinder {
        samples: VecDeque<Option<i32>>,
    }

    impl ScriptedRangeFinder {
        fn new(samples: &[Option<i32>]) -> Self {
            Self {
                samples: samples.iter().copied().collect(),
            }
        }
    }

    impl RangeFinder for ScriptedRangeFinder {
        fn sample_mm(&mut self) -> Option<i32> {
            self.samples.pop_front().flatten()
        }
    }

    #[test]
    fn test_median_of_odd_samples() {
        let finder = ScriptedRangeFinder::new(&[Some(1850), Some(1900), Some(1800)]);
        let mut gauge = DepthGauge::new(finder, 2000);
        assert_eq!(gauge.get_reading(3), (Some(1850), Some(150)));
    }

    #[test]
    fn test_median_of_even_samples_rounds() {
        let finder = ScriptedRangeFinder::new(&[Some(1801), Some(1800), Some(1900), Some(1700)]);
        let mut gauge = DepthGauge::new(finder, 2000);
        // (1800 + 1801) / 2 = 1800.5
        assert_eq!(gauge.get_reading(4), (Some(1801), Some(199)));
    }

    #[test]
    fn test_out_of_range_and_failed_samples_discarded() {
        let finder = ScriptedRangeFinder::new(&[Some(-5), None, Some(1500), Some(9000), Some(1500)]);
        let mut gauge = DepthGauge::new(finder, 1400);
        assert_eq!(gauge.get_reading(5), (Some(1500), Some(-100)));
    }

    #[test]
    fn test_no_valid_samples() {
        let finder = ScriptedRangeFinder::new(&[None, Some(4001)]);
        let mut gauge = DepthGauge::new(finder, 2000);
        assert_eq!(gauge.get_reading(2), (None, None));
    }

    #[test]
    fn test_gauge_only_takes_requested_samples() {
        let mut finder = MockRangeFinder::new();
        finder.expect_sample_mm().times(2).returning(|| Some(1000));
        let mut gauge = DepthGauge::new(finder, 2000);
        assert_eq!(gauge.get_reading(2), (Some(1000), Some(1000)));
    }

    #[test]
    fn test_iio_range_finder_reads_sysfs_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in_distance_raw");
        fs::write(&path, "1234\n").unwrap();

        let mut finder = IioRangeFinder::open(&path).unwrap();
        assert_eq!(finder.sample_mm(), Some(1234));

        fs::write(&path, "busy\n").unwrap();
        assert_eq!(finder.sample_mm(), None);

        fs::remove_file(&path).unwrap();
        assert_eq!(finder.sample_mm(), None);
    }

    #[test]
    fn test_iio_range_finder_missing_device() {
        let dir = TempDir::new().unwrap();
        let result = IioRangeFinder::open(dir.path().join("missing"));
        assert!(matches!(result, Err(TelemetryError::SensorNotFound(_))));
    }
}
