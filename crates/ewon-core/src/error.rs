//! Error types for ewon-core.
//!
//! # Error Taxonomy
//!
//! | Error | Scope | Handling |
//! |-------|-------|----------|
//! | [`Error::MalformedRecord`] | one history record | Drop the record, keep going |
//! | [`Error::SyncFailed`] | one sync cycle | Abort the cycle, cursor unchanged |
//! | [`Error::Client`] | one API call | Surface to the caller |
//! | [`Error::InvalidResponse`] | one API call | Surface to the caller |
//! | [`Error::DeviceNotFound`] | lookup | Surface to the caller |
//! | [`Error::InvalidConfig`] | startup | Fix configuration and restart |
//!
//! Per-record problems never abort processing of other tags or values. The
//! device aggregate collects them and logs each at `warn`. There is no
//! automatic retry: a failed sync is reported with the device id and the
//! cursor that was attempted so it can be retried by hand or on the next
//! scheduled cycle.

use thiserror::Error;

use ewon_types::{MalformedRecordError, TransactionId};

use crate::datamailbox::ClientError;

/// Errors that can occur while talking to the Data Mailbox or processing
/// its responses.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The incremental sync call failed; the cursor was not advanced.
    #[error("Sync failed for device {device_id} (cursor {}): {source}", fmt_cursor(.cursor))]
    SyncFailed {
        /// Device the sync was issued for.
        device_id: i64,
        /// Cursor that was sent with the failed call.
        cursor: Option<TransactionId>,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// HTTP or API level failure of the Data Mailbox client.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The response decoded but is missing something required.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The requested device is not known upstream.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A history record could not be decoded.
    #[error(transparent)]
    MalformedRecord(#[from] MalformedRecordError),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn fmt_cursor(cursor: &Option<TransactionId>) -> String {
    cursor
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none".to_string())
}

impl Error {
    /// Wrap a failure of the sync call with its device and cursor context.
    pub fn sync_failed(device_id: i64, cursor: Option<TransactionId>, source: Error) -> Self {
        Self::SyncFailed {
            device_id,
            cursor,
            source: Box::new(source),
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether this error aborted a sync cycle.
    pub fn is_sync_failure(&self) -> bool {
        matches!(self, Self::SyncFailed { .. })
    }
}

/// Result type alias using ewon-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
