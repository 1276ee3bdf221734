//! # Storage Module
//!
//! Durable on-station storage of readings.
//!
//! This module handles:
//! - Day-partitioned CSV ledger with `sync_all` after every append
//! - Status reconciliation (`local_only -> success`) via atomic file replace
//! - Retention of the newest N day partitions
//! - Best-effort mirroring to a backup root

pub mod partition;
pub mod ledger;
pub mod backup;

use chrono::{DateTime, FixedOffset};
use tracing::{error, info};

use crate::config::StationConfig;
use crate::error::Result;
use crate::message::Reading;

pub use backup::{BackupMirror, BackupStatus, SyncMode};
pub use ledger::{Ledger, StorageStats};

/// What happened to one save across both roots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Row is durable in the primary ledger
    pub primary: bool,
    /// `None` when no mirror write was attempted
    pub mirrored: Option<bool>,
}

/// Primary ledger plus its backup mirror, initialized together
///
/// A `LocalStorage` only exists once both roots have been initialized, so
/// no reading is accepted when a required backup is missing.
#[derive(Debug)]
pub struct LocalStorage {
    ledger: Ledger,
    backup: BackupMirror,
}

impl LocalStorage {
    /// Initialize both roots and return the ready storage
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The primary root cannot be created or written
    /// - The backup is `required` and its root cannot be created
    pub fn open(ledger: Ledger, mut backup: BackupMirror) -> Result<Self> {
        ledger.initialize()?;
        backup.initialize()?;
        info!(
            "Local storage ready at {} (keeping {} days)",
            ledger.root().display(),
            ledger.max_files()
        );
        Ok(Self { ledger, backup })
    }

    /// Build and open storage from the station configuration
    pub fn from_config(config: &StationConfig) -> Result<Self> {
        let station_id = config.station.station_id.as_str();
        let ledger = Ledger::new(&config.storage.path, station_id, config.storage.max_files);
        let backup = match &config.backup.path {
            Some(path) => BackupMirror::new(
                path,
                station_id,
                config.storage.max_files,
                config.backup.sync_mode,
                config.backup.required,
            ),
            None => BackupMirror::disabled(),
        };
        Self::open(ledger, backup)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Save to the primary ledger, then mirror if the sync mode says so
    ///
    /// The mirror write is attempted regardless of the primary result.
    pub fn save_reading(&mut self, reading: &Reading) -> SaveOutcome {
        let primary = self.ledger.save_reading(reading);
        let mirrored = if self.backup.mirrors_immediately() {
            Some(self.backup.mirror_reading(reading))
        } else {
            None
        };
        SaveOutcome { primary, mirrored }
    }

    pub fn get_unsent_readings(&self) -> Result<Vec<Reading>> {
        self.ledger.get_unsent_readings()
    }

    /// Reconcile delivered readings in the primary ledger and the mirror
    ///
    /// Returns the number of primary rows flipped; mirror failures are only
    /// recorded in the backup status. The mirror is reconciled even when the
    /// primary fails, so the two roots do not drift apart.
    pub fn mark_as_sent(&mut self, timestamps: &[DateTime<FixedOffset>]) -> Result<usize> {
        let primary = self.ledger.mark_as_sent(timestamps);
        if self.backup.is_configured() {
            self.backup.mark_as_sent(timestamps);
        }
        primary
    }

    /// Copy the primary partitions to the backup root
    pub fn sync_backup(&mut self) -> usize {
        let copied = self.backup.sync_from(&self.ledger);
        if !self.backup.is_ready() {
            error!("Backup sync incomplete: {:?}", self.backup.status().last_error);
        }
        copied
    }

    pub fn backup_status(&self) -> BackupStatus {
        self.backup.status()
    }

    pub fn storage_stats(&self) -> Result<StorageStats> {
        self.ledger.storage_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use crate::message::protocol::{parse_timestamp, Measurement};
    use crate::message::TransmissionStatus;
    use std::fs;
    use tempfile::TempDir;

    fn reading(ts: &str, status: TransmissionStatus) -> Reading {
        Reading::with_status(
            Measurement {
                timestamp: parse_timestamp(ts).unwrap(),
                station_id: "STN_01".to_string(),
                raw_distance_mm: 1850,
                snow_depth_mm: 150,
                sensor_temp_c: Some(-1.5),
                battery_voltage: None,
            },
            60,
            status,
        )
    }

    #[test]
    fn test_healthy_backup_mirrors_every_save() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("sd"), "STN_01", 30);
        let backup = BackupMirror::new(dir.path().join("usb"), "STN_01", 30, SyncMode::Immediate, false);
        let mut storage = LocalStorage::open(ledger, backup).unwrap();

        for ts in ["2024-01-01T00:00:00Z", "2024-01-01T00:15:00Z", "2024-01-02T00:00:00Z"] {
            let outcome = storage.save_reading(&reading(ts, TransmissionStatus::Success));
            assert_eq!(outcome, SaveOutcome { primary: true, mirrored: Some(true) });
        }

        for name in ["STN_01_2024-01-01.csv", "STN_01_2024-01-02.csv"] {
            assert_eq!(
                fs::read(dir.path().join("sd").join(name)).unwrap(),
                fs::read(dir.path().join("usb").join(name)).unwrap()
            );
        }
        assert!(storage.backup_status().ready);
    }

    #[test]
    fn test_uncreatable_optional_backup_runs_primary_only() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let ledger = Ledger::new(dir.path().join("sd"), "STN_01", 30);
        let backup = BackupMirror::new(blocker.join("usb"), "STN_01", 30, SyncMode::Immediate, false);
        let mut storage = LocalStorage::open(ledger, backup).unwrap();

        let outcome = storage.save_reading(&reading("2024-01-01T00:00:00Z", TransmissionStatus::LocalOnly));
        assert!(outcome.primary);
        assert_eq!(outcome.mirrored, Some(false));

        let status = storage.backup_status();
        assert!(status.configured);
        assert!(!status.ready);
        assert!(!status.last_error.unwrap_or_default().is_empty());
    }

    #[test]
    fn test_uncreatable_required_backup_refuses_to_open() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let ledger = Ledger::new(dir.path().join("sd"), "STN_01", 30);
        let backup = BackupMirror::new(blocker.join("usb"), "STN_01", 30, SyncMode::Immediate, true);
        let result = LocalStorage::open(ledger, backup);

        assert!(matches!(result, Err(TelemetryError::BackupRequired { .. })));
    }

    #[test]
    fn test_mirror_attempted_when_primary_fails() {
        let dir = TempDir::new().unwrap();
        let sd = dir.path().join("sd");
        let ledger = Ledger::new(&sd, "STN_01", 30);
        let backup = BackupMirror::new(dir.path().join("usb"), "STN_01", 30, SyncMode::Immediate, false);
        let mut storage = LocalStorage::open(ledger, backup).unwrap();

        // SD card gone after startup
        fs::remove_dir_all(&sd).unwrap();
        fs::write(&sd, "x").unwrap();

        let outcome = storage.save_reading(&reading("2024-01-01T00:00:00Z", TransmissionStatus::LocalOnly));
        assert_eq!(outcome, SaveOutcome { primary: false, mirrored: Some(true) });
    }

    #[test]
    fn test_deferred_backup_skips_per_save_mirror() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("sd"), "STN_01", 30);
        let backup = BackupMirror::new(dir.path().join("usb"), "STN_01", 30, SyncMode::Deferred, false);
        let mut storage = LocalStorage::open(ledger, backup).unwrap();

        let outcome = storage.save_reading(&reading("2024-01-01T00:00:00Z", TransmissionStatus::Success));
        assert_eq!(outcome.mirrored, None);
        assert!(!dir.path().join("usb").join("STN_01_2024-01-01.csv").exists());

        assert_eq!(storage.sync_backup(), 1);
        assert!(dir.path().join("usb").join("STN_01_2024-01-01.csv").exists());
    }

    #[test]
    fn test_mark_as_sent_reaches_mirror() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("sd"), "STN_01", 30);
        let backup = BackupMirror::new(dir.path().join("usb"), "STN_01", 30, SyncMode::Immediate, false);
        let mut storage = LocalStorage::open(ledger, backup).unwrap();

        let ts = "2024-01-01T00:00:00Z";
        storage.save_reading(&reading(ts, TransmissionStatus::LocalOnly));
        assert_eq!(storage.get_unsent_readings().unwrap().len(), 1);

        let flipped = storage.mark_as_sent(&[parse_timestamp(ts).unwrap()]).unwrap();
        assert_eq!(flipped, 1);
        assert!(storage.get_unsent_readings().unwrap().is_empty());

        let mirrored = fs::read_to_string(dir.path().join("usb").join("STN_01_2024-01-01.csv")).unwrap();
        assert!(mirrored.lines().nth(1).unwrap().ends_with(",success"));
    }

    #[test]
    fn test_mark_as_sent_reaches_mirror_when_primary_fails() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("sd"), "STN_01", 30);
        let backup = BackupMirror::new(dir.path().join("usb"), "STN_01", 30, SyncMode::Immediate, false);
        let mut storage = LocalStorage::open(ledger, backup).unwrap();

        let ts = "2024-01-01T00:00:00Z";
        storage.save_reading(&reading(ts, TransmissionStatus::LocalOnly));
        fs::remove_dir_all(dir.path().join("sd")).unwrap();

        assert!(storage.mark_as_sent(&[parse_timestamp(ts).unwrap()]).is_err());

        let mirrored = fs::read_to_string(dir.path().join("usb").join("STN_01_2024-01-01.csv")).unwrap();
        assert!(mirrored.lines().nth(1).unwrap().ends_with(",success"));
    }
}
