//! # Radio Message Encoder
//!
//! Encodes a measurement into the six-field radio line.

use super::protocol::*;

/// Encode a measurement as a radio message
///
/// Field order: `station_id,timestamp,raw_distance_mm,snow_depth_mm,sensor_temp_c,battery_voltage`.
/// Temperature is written with one decimal, battery voltage with two; absent
/// values are written as `-`.
///
/// The station id is not escaped. Callers must not pass ids containing commas
/// (configuration validation rejects them).
///
/// # Examples
///
/// ```
/// use snow_telemetry::message::encoder::encode_measurement;
/// use snow_telemetry::message::protocol::{parse_timestamp, Measurement};
///
/// let m = Measurement {
///     timestamp: parse_timestamp("2024-01-01T00:00:00Z").unwrap(),
///     station_id: "STN_01".to_string(),
///     raw_distance_mm: 1850,
///     snow_depth_mm: 150,
///     sensor_temp_c: Some(-5.2),
///     battery_voltage: Some(12.45),
/// };
/// assert_eq!(encode_measurement(&m), "STN_01,2024-01-01T00:00:00Z,1850,150,-5.2,12.45");
/// ```
pub fn encode_measurement(measurement: &Measurement) -> String {
    let fields: [String; MESSAGE_FIELD_COUNT] = [
        measurement.station_id.clone(),
        format_timestamp(&measurement.timestamp),
        measurement.raw_distance_mm.to_string(),
        measurement.snow_depth_mm.to_string(),
        encode_optional(measurement.sensor_temp_c, 1),
        encode_optional(measurement.battery_voltage, 2),
    ];

    debug_assert!(
        !measurement.station_id.contains(FIELD_SEPARATOR),
        "station_id must not contain the field separator"
    );

    fields.join(&FIELD_SEPARATOR.to_string())
}

/// Encode the measurement carried by a reading
pub fn encode_reading(reading: &Reading) -> String {
    encode_measurement(&reading.measurement)
}

fn encode_optional(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => ABSENT_FIELD.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Measurement {
        Measurement {
            timestamp: parse_timestamp("2024-01-01T00:00:00Z").unwrap(),
            station_id: "STN_01".to_string(),
            raw_distance_mm: 1850,
            snow_depth_mm: 150,
            sensor_temp_c: Some(-5.2),
            battery_voltage: Some(12.45),
        }
    }

    #[test]
    fn test_encode_full_measurement() {
        assert_eq!(
            encode_measurement(&sample()),
            "STN_01,2024-01-01T00:00:00Z,1850,150,-5.2,12.45"
        );
    }

    #[test]
    fn test_encode_absent_optionals() {
        let mut m = sample();
        m.sensor_temp_c = None;
        m.battery_voltage = None;
        assert_eq!(
            encode_measurement(&m),
            "STN_01,2024-01-01T00:00:00Z,1850,150,-,-"
        );
    }

    #[test]
    fn test_encode_fixed_precision() {
        let mut m = sample();
        m.sensor_temp_c = Some(3.0);
        m.battery_voltage = Some(12.4567);
        let line = encode_measurement(&m);
        assert!(line.ends_with(",3.0,12.46"), "got {}", line);
    }

    #[test]
    fn test_encode_negative_depth_and_offset_timestamp() {
        let mut m = sample();
        m.timestamp = parse_timestamp("2024-01-15T23:59:00-05:00").unwrap();
        m.raw_distance_mm = 2100;
        m.snow_depth_mm = -100;
        assert_eq!(
            encode_measurement(&m),
            "STN_01,2024-01-15T23:59:00-05:00,2100,-100,-5.2,12.45"
        );
    }

    #[test]
    fn test_encode_always_six_fields() {
        let line = encode_reading(&Reading::new(sample(), 80));
        assert_eq!(line.split(FIELD_SEPARATOR).count(), MESSAGE_FIELD_COUNT);
    }
}
