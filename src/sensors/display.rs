//! Log-backed status display for headless stations

use chrono::Local;
use tracing::info;

use super::StatusDisplay;

/// Renders the three status lines of the station's 128x32 OLED layout into
/// the log.
#[derive(Debug, Default)]
pub struct LogDisplay;

impl LogDisplay {
    pub fn new() -> Self {
        Self
    }
}

/// The three display lines, without the clock prefix
///
/// ```text
/// STN_01
/// Snow: 150mm
/// -5.2C Sig:78% OK
/// ```
pub fn status_lines(
    station_id: &str,
    snow_depth_mm: Option<i32>,
    temperature_c: Option<f64>,
    signal_quality: Option<u8>,
    last_tx_success: Option<bool>,
) -> [String; 3] {
    let depth = match snow_depth_mm {
        Some(mm) => format!("Snow: {}mm", mm),
        None => "Snow: --".to_string(),
    };
    let temp = match temperature_c {
        Some(c) => format!("{:.1}C", c),
        None => "--C".to_string(),
    };
    let signal = match signal_quality {
        Some(q) => format!("{}%", q),
        None => "--%".to_string(),
    };
    let tx = match last_tx_success {
        None => "",
        Some(true) => " OK",
        Some(false) => " !!",
    };

    [
        station_id.to_string(),
        depth,
        format!("{} Sig:{}{}", temp, signal, tx),
    ]
}

impl StatusDisplay for LogDisplay {
    fn update_status(
        &mut self,
        station_id: &str,
        snow_depth_mm: Option<i32>,
        temperature_c: Option<f64>,
        signal_quality: Option<u8>,
        last_tx_success: Option<bool>,
    ) {
        let [id, depth, status] = status_lines(
            station_id,
            snow_depth_mm,
            temperature_c,
            signal_quality,
            last_tx_success,
        );
        info!("[{} {}] {} | {}", id, Local::now().format("%H:%M"), depth, status);
    }
}
