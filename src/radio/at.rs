//! # LoRa Modem AT Protocol
//!
//! Command encoding and response parsing for REYAX RYLR-series UART modems.
//!
//! Commands are `AT+<NAME>=<args>\r\n`; the modem answers `+OK` or
//! `+ERR=<code>`. Inbound packets arrive unsolicited as
//! `+RCV=<address>,<length>,<data>,<rssi>,<snr>`.

use crate::config::{RadioConfig, SUPPORTED_BANDWIDTHS_HZ};
use crate::error::{Result, TelemetryError};

/// Largest payload the modem accepts in one `AT+SEND`
pub const MAX_PAYLOAD_LEN: usize = 240;

/// Line terminator expected by the modem
pub const LINE_ENDING: &str = "\r\n";

const RCV_PREFIX: &str = "+RCV=";
const ERR_PREFIX: &str = "+ERR=";

/// One parsed line from the modem
#[derive(Debug, Clone, PartialEq)]
pub enum ModemLine {
    /// Command accepted
    Ok,
    /// Command rejected with an error code
    Error(u16),
    /// Inbound packet
    Received(ReceivedPacket),
    /// Power-on banner
    Ready,
    /// Anything else (query answers, version strings)
    Other(String),
}

/// Packet delivered by the modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    /// Sender address
    pub address: u16,
    pub payload: Vec<u8>,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Signal-to-noise ratio in dB
    pub snr: i16,
}

/// `AT+SEND` command for `payload` addressed to `address`
///
/// # Errors
///
/// Returns error if:
/// - The payload is longer than [`MAX_PAYLOAD_LEN`]
/// - The payload contains a line break (it would end the command early)
pub fn send_command(address: u16, payload: &[u8]) -> Result<String> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(TelemetryError::PayloadTooLarge(payload.len(), MAX_PAYLOAD_LEN));
    }
    if payload.iter().any(|b| *b == b'\r' || *b == b'\n') {
        return Err(TelemetryError::Radio(
            "payload must not contain line breaks".to_string(),
        ));
    }

    Ok(format!(
        "AT+SEND={},{},{}{}",
        address,
        payload.len(),
        String::from_utf8_lossy(payload),
        LINE_ENDING
    ))
}

/// Commands that put the modem into the configured mode, in order
pub fn config_commands(config: &RadioConfig) -> Vec<String> {
    let bandwidth_code = SUPPORTED_BANDWIDTHS_HZ
        .iter()
        .position(|bw| *bw == config.bandwidth_hz)
        .unwrap_or(7);
    let band_hz = (config.frequency_mhz * 1_000_000.0).round() as u64;

    vec![
        format!("AT+ADDRESS={}{}", config.address, LINE_ENDING),
        format!("AT+NETWORKID={}{}", config.network_id, LINE_ENDING),
        format!("AT+BAND={}{}", band_hz, LINE_ENDING),
        format!(
            "AT+PARAMETER={},{},1,12{}",
            config.spreading_factor, bandwidth_code, LINE_ENDING
        ),
        format!("AT+CRFOP={}{}", config.tx_power_dbm, LINE_ENDING),
    ]
}

/// `line` without trailing `\r`/`\n`
pub fn trim_line_end(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b'\r' | b'\n'] = line {
        line = rest;
    }
    line
}

/// Parse one modem line (without its line ending)
///
/// `+RCV` payloads are raw bytes and need not be UTF-8; the rest of the
/// line is text.
///
/// # Errors
///
/// Returns `UnexpectedResponse` for `+RCV`/`+ERR` lines whose fields do not
/// parse.
pub fn parse_line(line: impl AsRef<[u8]>) -> Result<ModemLine> {
    let line = trim_line_end(line.as_ref());

    if let Some(body) = line.strip_prefix(RCV_PREFIX.as_bytes()) {
        return parse_received(body).map(ModemLine::Received).ok_or_else(|| {
            TelemetryError::UnexpectedResponse(String::from_utf8_lossy(line).into_owned())
        });
    }

    let text = String::from_utf8_lossy(line);
    let line: &str = &text;
    if line == "+OK" {
        return Ok(ModemLine::Ok);
    }
    if line == "+READY" {
        return Ok(ModemLine::Ready);
    }
    if let Some(code) = line.strip_prefix(ERR_PREFIX) {
        return code
            .trim()
            .parse::<u16>()
            .map(ModemLine::Error)
            .map_err(|_| TelemetryError::UnexpectedResponse(line.to_string()));
    }
    Ok(ModemLine::Other(line.to_string()))
}

/// `<address>,<length>,<data>,<rssi>,<snr>`; `data` may itself contain commas
fn parse_received(body: &[u8]) -> Option<ReceivedPacket> {
    let (address, rest) = split_field(body)?;
    let (length, rest) = split_field(rest)?;
    let length: usize = length.trim().parse().ok()?;

    if rest.len() < length {
        return None;
    }
    let payload = rest[..length].to_vec();

    let trailer = std::str::from_utf8(&rest[length..]).ok()?;
    let trailer = trailer.strip_prefix(',')?;
    let (rssi, snr) = trailer.split_once(',')?;

    Some(ReceivedPacket {
        address: address.trim().parse().ok()?,
        payload,
        rssi: rssi.trim().parse().ok()?,
        snr: snr.trim().parse().ok()?,
    })
}

/// Text up to the first comma, and the bytes after it
fn split_field(bytes: &[u8]) -> Option<(&str, &[u8])> {
    let pos = bytes.iter().position(|b| *b == b',')?;
    let field = std::str::from_utf8(&bytes[..pos]).ok()?;
    Some((field, &bytes[pos + 1..]))
}
