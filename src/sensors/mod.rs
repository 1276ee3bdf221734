//! # Sensors Module
//!
//! Capability traits for the station's external collaborators and thin
//! Linux adapters behind them.
//!
//! This module handles:
//! - Depth measurement (`DepthSensor`) built from a single-sample range finder
//! - Air temperature (`TemperatureSensor`) from a DS18B20 on the 1-Wire bus
//! - The status display (`StatusDisplay`), backed by the log on headless units
//!
//! Every reading method returns `Option`: a missing sensor value is an
//! expected outcome in the field, not an error.

pub mod depth;
pub mod display;
pub mod temperature;

use crate::error::Result;

pub use depth::{DepthGauge, IioRangeFinder, RangeFinder};
pub use display::LogDisplay;
pub use temperature::W1Thermometer;

/// Snow depth source
#[cfg_attr(test, mockall::automock)]
pub trait DepthSensor: Send {
    /// Take `num_samples` distance samples and reduce them to one reading
    ///
    /// # Returns
    ///
    /// `(distance_mm, snow_depth_mm)`; both `None` when no sample was valid.
    fn get_reading(&mut self, num_samples: usize) -> (Option<i32>, Option<i32>);

    /// Release the underlying device
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Air temperature source
#[cfg_attr(test, mockall::automock)]
pub trait TemperatureSensor: Send {
    fn read_temperature_c(&mut self) -> Option<f64>;

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Local status output
#[cfg_attr(test, mockall::automock)]
pub trait StatusDisplay: Send {
    /// Show the latest cycle's outcome
    ///
    /// `last_tx_success` is `None` before the first transmission attempt.
    fn update_status(
        &mut self,
        station_id: &str,
        snow_depth_mm: Option<i32>,
        temperature_c: Option<f64>,
        signal_quality: Option<u8>,
        last_tx_success: Option<bool>,
    );

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}
