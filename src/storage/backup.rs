//! # Backup Mirror
//!
//! Best-effort second copy of the station ledger under an independent root
//! (typically a USB stick next to the SD card).
//!
//! Nothing here returns an error to the delivery path: failures flip the
//! mirror to unready and are kept in `last_error`. The single exception is
//! [`BackupMirror::initialize`] when the mirror is marked `required`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ledger::Ledger;
use super::partition;
use crate::error::{Result, TelemetryError};
use crate::message::Reading;

/// When readings reach the backup root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Mirror every save as it happens
    #[default]
    Immediate,
    /// Only copy on an explicit [`BackupMirror::sync_from`]
    Deferred,
}

/// Point-in-time health of the mirror
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupStatus {
    pub configured: bool,
    pub path: Option<PathBuf>,
    pub sync_mode: SyncMode,
    pub required: bool,
    pub ready: bool,
    pub last_error: Option<String>,
}

/// Secondary ledger with its own health state
#[derive(Debug)]
pub struct BackupMirror {
    ledger: Option<Ledger>,
    sync_mode: SyncMode,
    required: bool,
    ready: bool,
    last_error: Option<String>,
}

impl BackupMirror {
    /// Mirror with no backup root; every operation is a no-op
    pub fn disabled() -> Self {
        Self {
            ledger: None,
            sync_mode: SyncMode::Immediate,
            required: false,
            ready: false,
            last_error: None,
        }
    }

    /// Mirror targeting `root` with the same naming and rotation as the primary
    pub fn new(
        root: impl Into<PathBuf>,
        station_id: impl Into<String>,
        max_files: usize,
        sync_mode: SyncMode,
        required: bool,
    ) -> Self {
        Self {
            ledger: Some(Ledger::new(root, station_id, max_files)),
            sync_mode,
            required,
            ready: false,
            last_error: None,
        }
    }

    /// Try to create the backup root
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::BackupRequired` only when the mirror is
    /// `required` and its root cannot be used. An optional mirror that fails
    /// here is left unready and the station runs primary-only.
    pub fn initialize(&mut self) -> Result<()> {
        let Some(ledger) = &self.ledger else {
            return Ok(());
        };

        match ledger.initialize() {
            Ok(()) => {
                self.ready = true;
                self.last_error = None;
                info!("Backup storage ready at {}", ledger.root().display());
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.ready = false;
                self.last_error = Some(reason.clone());

                if self.required {
                    return Err(TelemetryError::BackupRequired {
                        path: ledger.root().to_path_buf(),
                        reason,
                    });
                }
                warn!("Backup storage unavailable, continuing primary-only: {}", reason);
                Ok(())
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.ledger.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    /// Whether a save should also be mirrored right away
    pub fn mirrors_immediately(&self) -> bool {
        self.is_configured() && self.sync_mode == SyncMode::Immediate
    }

    /// Append a reading to the backup root
    ///
    /// Attempted even while unready so a re-inserted drive recovers on its
    /// own. Returns whether the row reached the backup.
    pub fn mirror_reading(&mut self, reading: &Reading) -> bool {
        let Some(ledger) = &self.ledger else {
            return false;
        };

        let result = partition::ensure_writable_dir(ledger.root())
            .and_then(|_| ledger.try_save_reading(reading));
        match result {
            Ok(_) => {
                if !self.ready {
                    info!("Backup storage at {} recovered", ledger.root().display());
                }
                self.ready = true;
                true
            }
            Err(e) => {
                let reason = format!("backup write failed: {}", e);
                warn!("{} ({})", reason, ledger.root().display());
                self.record_failure(reason);
                false
            }
        }
    }

    /// Apply a status reconciliation to the backup copy as well
    pub fn mark_as_sent(&mut self, timestamps: &[DateTime<FixedOffset>]) -> Option<usize> {
        let ledger = self.ledger.as_ref()?;
        match ledger.mark_as_sent(timestamps) {
            Ok(count) => Some(count),
            Err(e) => {
                let reason = format!("backup mark_as_sent failed: {}", e);
                warn!("{}", reason);
                self.record_failure(reason);
                None
            }
        }
    }

    /// Copy every primary partition into the backup root, then rotate it
    ///
    /// Each file is replaced atomically. Returns the number of files copied;
    /// on failure the error is recorded and the count so far is returned.
    pub fn sync_from(&mut self, primary: &Ledger) -> usize {
        let Some(ledger) = self.ledger.clone() else {
            return 0;
        };

        match copy_partitions(primary, &ledger) {
            Ok(copied) => {
                self.ready = true;
                if let Err(e) =
                    partition::rotate(ledger.root(), ledger.station_id(), ledger.max_files(), None)
                {
                    warn!("Backup rotation failed: {}", e);
                }
                info!(
                    "Synced {} partition(s) to backup at {}",
                    copied,
                    ledger.root().display()
                );
                copied
            }
            Err((copied, e)) => {
                let reason = format!("backup sync failed: {}", e);
                warn!("{}", reason);
                self.record_failure(reason);
                copied
            }
        }
    }

    pub fn status(&self) -> BackupStatus {
        BackupStatus {
            configured: self.is_configured(),
            path: self.ledger.as_ref().map(|l| l.root().to_path_buf()),
            sync_mode: self.sync_mode,
            required: self.required,
            ready: self.ready,
            last_error: self.last_error.clone(),
        }
    }

    fn record_failure(&mut self, reason: String) {
        self.ready = false;
        self.last_error = Some(reason);
    }
}

fn copy_partitions(
    primary: &Ledger,
    backup: &Ledger,
) -> std::result::Result<usize, (usize, std::io::Error)> {
    let mut copied = 0;
    partition::ensure_writable_dir(backup.root()).map_err(|e| (copied, e))?;
    let files = primary.partitions().map_err(|e| (copied, e))?;

    for source in files {
        let target = match source.file_name() {
            Some(name) => backup.root().join(name),
            None => continue,
        };
        copy_atomic(&source, &target).map_err(|e| (copied, e))?;
        copied += 1;
    }
    Ok(copied)
}

fn copy_atomic(source: &Path, target: &Path) -> std::io::Result<()> {
    let contents = fs::read(source)?;
    partition::rewrite_atomic(target, &contents)
}
