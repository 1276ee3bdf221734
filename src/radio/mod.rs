//! # Radio Module
//!
//! Handles the LoRa link between sensor stations and the base station.
//!
//! This module handles:
//! - The `RadioTransport` seam used by delivery and the receive loop
//! - Opening the UART-attached LoRa modem and configuring it
//! - Sending one payload per `AT+SEND` and waiting for the modem's `+OK`
//! - Receiving `+RCV` packets with a bounded timeout
//! - Mapping RSSI to a 0-100 signal quality

pub mod at;
pub mod port_trait;

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{timeout_at, Instant};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::config::RadioConfig;
use crate::error::{Result, TelemetryError};
use at::{ModemLine, ReceivedPacket};
use port_trait::{SerialPortIO, TokioSerialPort};

/// Default modem device paths to try after the configured one
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyS0",   // Pi mini-UART on the GPIO header
    "/dev/ttyAMA0", // Pi PL011 UART
    "/dev/ttyUSB0", // USB-to-serial adapters
];

/// Silence that ends the flush of a late acknowledgement
const DRAIN_QUIET: Duration = Duration::from_millis(100);

/// RSSI mapped to 0% signal quality
const RSSI_FLOOR_DBM: i32 = -120;

/// RSSI span from 0% to 100% signal quality
const RSSI_SPAN_DB: i32 = 90;

/// Abstract radio link
///
/// The layer below delivers a payload once or not at all; a successful
/// `send` only means the modem accepted it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RadioTransport: Send {
    /// Hand one payload to the radio
    async fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for one inbound payload
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// RSSI of the last received packet, in dBm
    fn last_rssi(&self) -> Option<i16>;
}

/// Signal quality percentage from RSSI
///
/// -120 dBm maps to 0 and -30 dBm to 100; unknown RSSI is 0.
pub fn signal_quality(rssi: Option<i16>) -> u8 {
    match rssi {
        Some(rssi) => {
            let quality = (i32::from(rssi) - RSSI_FLOOR_DBM) * 100 / RSSI_SPAN_DB;
            quality.clamp(0, 100) as u8
        }
        None => 0,
    }
}

/// UART-attached LoRa modem speaking the RYLR AT protocol
pub struct LoRaModem<P: SerialPortIO = TokioSerialPort> {
    port: P,
    device_path: String,
    /// Address packets are sent to
    destination: u16,
    /// Bound on waiting for a command acknowledgement
    ack_timeout: Duration,
    rx_buffer: Vec<u8>,
    /// Packets that arrived while waiting for an acknowledgement
    inbox: VecDeque<ReceivedPacket>,
    last_rssi: Option<i16>,
    /// The last command got no clean answer; its acknowledgement may still arrive
    ack_owed: bool,
}

impl<P: SerialPortIO> std::fmt::Debug for LoRaModem<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoRaModem")
            .field("device_path", &self.device_path)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

impl LoRaModem<TokioSerialPort> {
    /// Open and configure the modem
    ///
    /// Tries the configured port first, then the common Pi UART paths.
    ///
    /// # Arguments
    ///
    /// * `config` - Radio settings (port, baud rate, LoRa parameters, address)
    /// * `destination` - Address outgoing packets are sent to
    ///
    /// # Errors
    ///
    /// Returns error if no port opens or the modem rejects its configuration
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use snow_telemetry::config::StationConfig;
    /// use snow_telemetry::radio::LoRaModem;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let config = StationConfig::load("config/station_01.toml")?;
    ///     let modem = LoRaModem::open(&config.radio, config.radio.base_station_address).await?;
    ///     println!("Radio on {}", modem.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub async fn open(config: &RadioConfig, destination: u16) -> Result<Self> {
        let mut paths: Vec<&str> = vec![config.port.as_str()];
        paths.extend(DEFAULT_DEVICE_PATHS.iter().filter(|p| **p != config.port));

        let mut modem = Self::open_with_paths(&paths, config, destination)?;
        modem.configure(config).await?;
        Ok(modem)
    }

    /// Open the first serial path that works, without configuring the modem
    pub fn open_with_paths(paths: &[&str], config: &RadioConfig, destination: u16) -> Result<Self> {
        for path in paths {
            debug!("Trying to open radio port: {}", path);

            match Self::open_port(path, config.baud_rate) {
                Ok(port) => {
                    info!("Opened LoRa modem at {}", path);
                    return Ok(LoRaModem::with_port(
                        TokioSerialPort::new(port),
                        path.to_string(),
                        destination,
                        Duration::from_millis(config.timeout_ms),
                    ));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(TelemetryError::RadioNotFound(paths.join(", ")))
    }

    /// Open a specific serial port at 8N1
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TelemetryError::Radio(format!("Failed to open {}: {}", path, e)))
    }
}

impl<P: SerialPortIO> LoRaModem<P> {
    /// Wrap an already-open port
    pub fn with_port(port: P, device_path: String, destination: u16, ack_timeout: Duration) -> Self {
        Self {
            port,
            device_path,
            destination,
            ack_timeout,
            rx_buffer: Vec::with_capacity(512),
            inbox: VecDeque::new(),
            last_rssi: None,
            ack_owed: false,
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Send the address/network/band/parameter/power commands
    pub async fn configure(&mut self, config: &RadioConfig) -> Result<()> {
        for command in at::config_commands(config) {
            self.command(&command).await?;
        }
        info!(
            "LoRa modem configured: {} MHz, SF{}, {} Hz, {} dBm, address {}",
            config.frequency_mhz,
            config.spreading_factor,
            config.bandwidth_hz,
            config.tx_power_dbm,
            config.address
        );
        Ok(())
    }

    /// Write a command and wait for `+OK`
    ///
    /// Input left over from earlier commands is discarded first, so a late
    /// `+OK` can never be taken as this command's acknowledgement.
    async fn command(&mut self, command: &str) -> Result<()> {
        self.discard_stale_input().await?;

        self.port
            .write_all(command.as_bytes())
            .await
            .map_err(|e| TelemetryError::Radio(format!("Failed to write command: {}", e)))?;
        self.port
            .flush()
            .await
            .map_err(|e| TelemetryError::Radio(format!("Failed to flush radio port: {}", e)))?;

        let result = self.await_ack().await;
        if matches!(
            result,
            Err(TelemetryError::RadioTimeout(_) | TelemetryError::UnexpectedResponse(_))
        ) {
            self.ack_owed = true;
        }
        result
    }

    async fn await_ack(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.ack_timeout;
        loop {
            let line = match self.read_line(deadline).await? {
                Some(line) => line,
                None => {
                    return Err(TelemetryError::RadioTimeout(
                        self.ack_timeout.as_millis() as u64,
                    ))
                }
            };

            match at::parse_line(&line)? {
                ModemLine::Ok => return Ok(()),
                ModemLine::Error(code) => return Err(TelemetryError::ModemRejected(code)),
                ModemLine::Received(packet) => self.inbox.push_back(packet),
                ModemLine::Ready => debug!("Modem reported +READY"),
                ModemLine::Other(other) => {
                    return Err(TelemetryError::UnexpectedResponse(other));
                }
            }
        }
    }

    /// Drop buffered lines, keeping packets for `receive`
    ///
    /// When the previous command went unanswered the port is also read until
    /// it stays quiet for [`DRAIN_QUIET`], bounded by the ack timeout.
    async fn discard_stale_input(&mut self) -> Result<()> {
        while let Some(line) = self.next_buffered_line() {
            self.keep_packet(&line);
        }
        if !self.ack_owed {
            return Ok(());
        }

        let limit = Instant::now() + self.ack_timeout;
        loop {
            let deadline = (Instant::now() + DRAIN_QUIET).min(limit);
            match self.read_line(deadline).await? {
                Some(line) => self.keep_packet(&line),
                None => break,
            }
        }
        self.ack_owed = false;
        Ok(())
    }

    fn keep_packet(&mut self, line: &[u8]) {
        match at::parse_line(line) {
            Ok(ModemLine::Received(packet)) => self.inbox.push_back(packet),
            other => debug!("Discarding stale modem line: {:?}", other),
        }
    }

    /// Next complete non-empty line already in the buffer
    fn next_buffered_line(&mut self) -> Option<Vec<u8>> {
        while let Some(pos) = self.rx_buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.rx_buffer.drain(..=pos).collect();
            let line = at::trim_line_end(&raw);
            if !line.is_empty() {
                return Some(line.to_vec());
            }
        }
        None
    }

    /// Next non-empty line, or `None` once `deadline` passes
    async fn read_line(&mut self, deadline: Instant) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(line) = self.next_buffered_line() {
                return Ok(Some(line));
            }

            let mut chunk = [0u8; 256];
            match timeout_at(deadline, self.port.read(&mut chunk)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    return Err(TelemetryError::Radio("radio port closed".to_string()));
                }
                Ok(Ok(n)) => self.rx_buffer.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => {
                    return Err(TelemetryError::Radio(format!("Failed to read radio port: {}", e)));
                }
            }
        }
    }

    fn accept(&mut self, packet: ReceivedPacket) -> Vec<u8> {
        debug!(
            "Received {} bytes from address {} (RSSI {} dBm, SNR {} dB)",
            packet.payload.len(),
            packet.address,
            packet.rssi,
            packet.snr
        );
        self.last_rssi = Some(packet.rssi);
        packet.payload
    }
}

#[async_trait]
impl<P: SerialPortIO> RadioTransport for LoRaModem<P> {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let command = at::send_command(self.destination, payload)?;
        self.command(&command).await?;
        debug!("Sent {} byte payload to address {}", payload.len(), self.destination);
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if let Some(packet) = self.inbox.pop_front() {
            return Ok(Some(self.accept(packet)));
        }

        let deadline = Instant::now() + timeout;
        while let Some(line) = self.read_line(deadline).await? {
            match at::parse_line(&line) {
                Ok(ModemLine::Received(packet)) => return Ok(Some(self.accept(packet))),
                Ok(other) => debug!("Ignoring modem line while receiving: {:?}", other),
                Err(e) => warn!("Unparseable modem line: {}", e),
            }
        }
        Ok(None)
    }

    fn last_rssi(&self) -> Option<i16> {
        self.last_rssi
    }
}
