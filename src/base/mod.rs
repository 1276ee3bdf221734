//! # Base Station Module
//!
//! Receive loop of the fixed collection point.
//!
//! This module handles:
//! - Listening on the radio with a bounded receive timeout
//! - Handing every payload to the [`Archive`]
//! - Logging the network status as JSON on an interval and at shutdown

pub mod archive;

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::BaseConfig;
use crate::error::Result;
use crate::radio::{LoRaModem, RadioTransport};

pub use archive::{Archive, IngestOutcome, NetworkStatus};

/// Pause after a failed receive before listening again
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

enum Event {
    Shutdown,
    StatusDue,
    Received(Result<Option<Vec<u8>>>),
}

/// The base station: one radio, one archive
pub struct BaseStation {
    archive: Archive,
    radio: Box<dyn RadioTransport>,
    receive_timeout: Duration,
    status_interval: Duration,
}

impl BaseStation {
    pub fn new(
        archive: Archive,
        radio: Box<dyn RadioTransport>,
        receive_timeout: Duration,
        status_interval: Duration,
    ) -> Self {
        Self {
            archive,
            radio,
            receive_timeout,
            status_interval,
        }
    }

    /// Initialize the archive and open the radio
    ///
    /// # Errors
    ///
    /// Returns error if the archive root is unusable or no modem can be
    /// opened; a base station without a radio has nothing to do.
    pub async fn from_config(config: &BaseConfig) -> Result<Self> {
        let archive = Archive::new(&config.archive.path);
        archive.initialize()?;

        let modem = LoRaModem::open(&config.radio, config.radio.base_station_address).await?;
        info!("Base station listening on {}", modem.device_path());

        Ok(Self::new(
            archive,
            Box::new(modem),
            Duration::from_millis(config.archive.receive_timeout_ms),
            Duration::from_secs(config.archive.status_interval_s),
        ))
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn get_network_status(&self) -> NetworkStatus {
        self.archive.get_network_status()
    }

    /// Receive and archive until `shutdown` flips to `true`
    ///
    /// Shutdown is checked before every receive, so at most one bounded
    /// receive is in flight when it is requested.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut status_ticker = interval_at(Instant::now() + self.status_interval, self.status_interval);
        status_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Base station running (receive timeout {} ms, status every {}s)",
            self.receive_timeout.as_millis(),
            self.status_interval.as_secs()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => Event::Shutdown,
                _ = status_ticker.tick() => Event::StatusDue,
                received = self.radio.receive(self.receive_timeout) => Event::Received(received),
            };

            match event {
                Event::Shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                Event::StatusDue => self.log_status("Network status"),
                Event::Received(Ok(Some(payload))) => {
                    let rssi = self.radio.last_rssi();
                    self.archive.ingest(&payload, rssi, Utc::now());
                }
                Event::Received(Ok(None)) => {}
                Event::Received(Err(e)) => {
                    warn!("Radio receive failed: {}", e);
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            }
        }

        self.log_status("Final network status");
        info!("Base station stopped");
        Ok(())
    }

    fn log_status(&self, label: &str) {
        match serde_json::to_string(&self.get_network_status()) {
            Ok(json) => info!("{}: {}", label, json),
            Err(e) => warn!("Failed to serialize network status: {}", e),
        }
    }
}
