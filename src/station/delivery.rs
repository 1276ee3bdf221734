//! # Delivery Attempt
//!
//! One radio transmission attempt for a freshly built reading, followed by
//! exactly one durable save with the resulting status.
//!
//! ```text
//! pending --(radio present, send ok)-------> success
//! pending --(no radio, or send failed)-----> local_only
//! ```
//!
//! There is no automatic resend. Readings left `local_only` are reconciled
//! later through `LocalStorage::mark_as_sent`.

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::error::{Result, TelemetryError};
use crate::message::{encode_reading, Reading, TransmissionStatus};
use crate::radio::RadioTransport;
use crate::storage::LocalStorage;

/// Why a reading was kept `local_only`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalOnlyReason {
    /// Station is running without a radio
    NoRadio,
    /// The link failed (port I/O, timeout, oversized payload)
    SendFailed(String),
    /// The modem answered, but not with an acknowledgement
    Rejected(String),
}

impl fmt::Display for LocalOnlyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalOnlyReason::NoRadio => f.write_str("no radio"),
            LocalOnlyReason::SendFailed(e) => write!(f, "send failed: {}", e),
            LocalOnlyReason::Rejected(e) => write!(f, "modem rejected: {}", e),
        }
    }
}

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Final status the reading was saved with
    pub status: TransmissionStatus,
    /// Set whenever `status` is `local_only`
    pub reason: Option<LocalOnlyReason>,
    /// Row is durable in the primary ledger
    pub persisted: bool,
    /// `None` when no mirror write was attempted
    pub mirrored: Option<bool>,
}

impl DeliveryReport {
    pub fn transmitted(&self) -> bool {
        self.status == TransmissionStatus::Success
    }
}

fn classify(error: TelemetryError) -> LocalOnlyReason {
    match error {
        TelemetryError::ModemRejected(_) | TelemetryError::UnexpectedResponse(_) => {
            LocalOnlyReason::Rejected(error.to_string())
        }
        other => LocalOnlyReason::SendFailed(other.to_string()),
    }
}

/// Attempt delivery of `reading` and persist it with the outcome
///
/// The reading's status is updated in place.
///
/// # Arguments
///
/// * `reading` - A reading still in the `pending` state
/// * `radio` - The transport, or `None` when the station has no radio
/// * `storage` - Primary ledger and mirror
///
/// # Errors
///
/// Returns `InvalidTransition` if `reading` is not `pending`. Nothing is sent
/// or saved in that case. Transport and storage failures are reported in the
/// returned [`DeliveryReport`], never as errors.
pub async fn deliver<R>(
    reading: &mut Reading,
    radio: Option<&mut R>,
    storage: &mut LocalStorage,
) -> Result<DeliveryReport>
where
    R: RadioTransport + ?Sized,
{
    if reading.transmission_status() != TransmissionStatus::Pending {
        return Err(TelemetryError::InvalidTransition {
            from: reading.transmission_status(),
            to: TransmissionStatus::Success,
        });
    }

    let reason = match radio {
        None => Some(LocalOnlyReason::NoRadio),
        Some(radio) => {
            let payload = encode_reading(reading);
            debug!("Transmitting: {}", payload);
            match radio.send(payload.as_bytes()).await {
                Ok(()) => None,
                Err(e) => Some(classify(e)),
            }
        }
    };

    let status = match reason {
        None => TransmissionStatus::Success,
        Some(_) => TransmissionStatus::LocalOnly,
    };
    reading.transition_to(status)?;

    match &reason {
        None => info!("Transmitted reading {}", reading.measurement.timestamp),
        Some(reason) => warn!(
            "Reading {} kept local only ({})",
            reading.measurement.timestamp, reason
        ),
    }

    let outcome = storage.save_reading(reading);
    if !outcome.primary {
        error!(
            "DATA LOSS RISK: reading {} ({}) was not saved to primary storage",
            reading.measurement.timestamp, status
        );
    }
    if outcome.mirrored == Some(false) {
        warn!("Backup mirror did not record reading {}", reading.measurement.timestamp);
    }

    Ok(DeliveryReport {
        status,
        reason,
        persisted: outcome.primary,
        mirrored: outcome.mirrored,
    })
}
