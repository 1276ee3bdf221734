//! # Radio Message Decoder
//!
//! Parses and validates six-field radio lines back into measurements.

use super::protocol::*;
use crate::error::{Result, TelemetryError};

/// Decode a radio message
///
/// The line is split on `,` and every field is trimmed before parsing.
///
/// # Errors
///
/// Returns `MalformedMessage` if:
/// - The field count is not exactly six
/// - The station id is empty
/// - The timestamp is not RFC 3339
/// - A distance/depth field is not an integer
/// - An optional field is neither `-` nor a number
pub fn decode_message(line: &str) -> Result<Measurement> {
    let fields: Vec<&str> = line.trim().split(FIELD_SEPARATOR).map(str::trim).collect();

    if fields.len() != MESSAGE_FIELD_COUNT {
        return Err(TelemetryError::MalformedMessage(format!(
            "expected {} fields, got {}: {:?}",
            MESSAGE_FIELD_COUNT,
            fields.len(),
            line
        )));
    }

    let station_id = fields[0];
    if station_id.is_empty() {
        return Err(TelemetryError::MalformedMessage(
            "empty station_id".to_string(),
        ));
    }

    Ok(Measurement {
        station_id: station_id.to_string(),
        timestamp: parse_timestamp(fields[1])?,
        raw_distance_mm: parse_integer("raw_distance_mm", fields[2])?,
        snow_depth_mm: parse_integer("snow_depth_mm", fields[3])?,
        sensor_temp_c: parse_optional("sensor_temp_c", fields[4])?,
        battery_voltage: parse_optional("battery_voltage", fields[5])?,
    })
}

/// Parse a required integer field
pub(crate) fn parse_integer(name: &str, text: &str) -> Result<i32> {
    text.parse::<i32>().map_err(|_| {
        TelemetryError::MalformedMessage(format!("{} is not an integer: {:?}", name, text))
    })
}

fn parse_optional(name: &str, text: &str) -> Result<Option<f64>> {
    if text == ABSENT_FIELD {
        return Ok(None);
    }
    parse_float(name, text).map(Some)
}

/// Parse a float field, rejecting NaN and infinities
pub(crate) fn parse_float(name: &str, text: &str) -> Result<f64> {
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(TelemetryError::MalformedMessage(format!(
            "{} is not a number: {:?}",
            name, text
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::encoder::encode_measurement;

    #[test]
    fn test_decode_missing_optionals() {
        let m = decode_message("STN_01,2024-01-01T00:00:00Z,1800,200,-,-").unwrap();
        assert_eq!(m.station_id, "STN_01");
        assert_eq!(m.raw_distance_mm, 1800);
        assert_eq!(m.snow_depth_mm, 200);
        assert_eq!(m.sensor_temp_c, None);
        assert_eq!(m.battery_voltage, None);
    }

    #[test]
    fn test_round_trip() {
        let original = Measurement {
            timestamp: parse_timestamp("2024-01-01T00:00:00Z").unwrap(),
            station_id: "STN_01".to_string(),
            raw_distance_mm: 1850,
            snow_depth_mm: 150,
            sensor_temp_c: Some(-5.2),
            battery_voltage: Some(12.45),
        };

        let decoded = decode_message(&encode_measurement(&original)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_round_trip_offset_timestamp_and_negative_depth() {
        let original = Measurement {
            timestamp: parse_timestamp("2024-01-15T23:59:00-05:00").unwrap(),
            station_id: "RIDGE_7".to_string(),
            raw_distance_mm: 2150,
            snow_depth_mm: -150,
            sensor_temp_c: Some(0.5),
            battery_voltage: None,
        };

        let decoded = decode_message(&encode_measurement(&original)).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.timestamp.offset().local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn test_round_trip_rounds_to_wire_precision() {
        let original = Measurement {
            timestamp: parse_timestamp("2024-02-01T12:00:00Z").unwrap(),
            station_id: "STN_02".to_string(),
            raw_distance_mm: 1000,
            snow_depth_mm: 1000,
            sensor_temp_c: Some(-12.3456),
            battery_voltage: Some(11.987),
        };

        let decoded = decode_message(&encode_measurement(&original)).unwrap();
        assert!((decoded.sensor_temp_c.unwrap() - (-12.3)).abs() < 1e-9);
        assert!((decoded.battery_voltage.unwrap() - 11.99).abs() < 1e-9);
    }

    #[test]
    fn test_decode_trims_fields() {
        let m = decode_message(" STN_01 , 2024-01-01T00:00:00Z , 1800 , 200 , -3.5 , - \n").unwrap();
        assert_eq!(m.station_id, "STN_01");
        assert_eq!(m.sensor_temp_c, Some(-3.5));
    }

    #[test]
    fn test_decode_wrong_field_count() {
        for line in [
            "",
            "STN_01",
            "STN_01,2024-01-01T00:00:00Z,1800,200,-",
            "STN_01,2024-01-01T00:00:00Z,1800,200,-,-,extra",
            "STN_01,2024-01-01T00:00:00Z,1800,200,-,-,",
        ] {
            let result = decode_message(line);
            assert!(
                matches!(result, Err(TelemetryError::MalformedMessage(_))),
                "line {:?} should be malformed",
                line
            );
        }
    }

    #[test]
    fn test_decode_non_integer_distance() {
        let result = decode_message("STN_01,2024-01-01T00:00:00Z,18.5,200,-,-");
        assert!(matches!(result, Err(TelemetryError::MalformedMessage(_))));
    }

    #[test]
    fn test_decode_invalid_float() {
        let result = decode_message("STN_01,2024-01-01T00:00:00Z,1800,200,warm,-");
        assert!(matches!(result, Err(TelemetryError::MalformedMessage(_))));

        let result = decode_message("STN_01,2024-01-01T00:00:00Z,1800,200,-,NaN");
        assert!(matches!(result, Err(TelemetryError::MalformedMessage(_))));
    }

    #[test]
    fn test_decode_empty_station_and_bad_timestamp() {
        assert!(decode_message(",2024-01-01T00:00:00Z,1800,200,-,-").is_err());
        assert!(decode_message("STN_01,yesterday,1800,200,-,-").is_err());
    }
}
