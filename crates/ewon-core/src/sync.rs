//! Incremental sync and the transaction cursor.
//!
//! The Data Mailbox keeps a server-side transaction window per cursor. A
//! sync call sends the last cursor it was given and receives the data
//! recorded since, together with a new cursor. The cursor is opaque: it is
//! stored and forwarded, never inspected.
//!
//! # Creating transactions
//!
//! `createTransaction` asks the server to open a new window. It defaults to
//! `true` only when no cursor exists yet; once a cursor exists, syncs reuse
//! it unless explicitly forced, so that duplicate windows are not opened by
//! accident.

use tracing::warn;

use ewon_types::{DevicePayload, SyncPayload, TransactionId};

use crate::error::{Error, Result};
use crate::traits::DataExchange;

/// Decide the `createTransaction` flag for a sync call.
///
/// ```
/// use ewon_core::sync::resolve_create_transaction;
/// use ewon_types::TransactionId;
///
/// assert!(resolve_create_transaction(None, None));
/// assert!(!resolve_create_transaction(Some(&TransactionId::from(42)), None));
/// assert!(resolve_create_transaction(Some(&TransactionId::from(42)), Some(true)));
/// ```
pub fn resolve_create_transaction(
    last_transaction_id: Option<&TransactionId>,
    requested: Option<bool>,
) -> bool {
    match (last_transaction_id, requested) {
        (_, Some(flag)) => flag,
        (None, None) => true,
        (Some(_), None) => false,
    }
}

/// The useful part of one successful sync response.
#[derive(Debug, Clone)]
pub struct SyncBatch {
    /// Cursor committed by the server for this call.
    pub transaction_id: TransactionId,
    /// Snapshot of the requested device, if the server returned any.
    pub device: Option<DevicePayload>,
    /// Whether more data is waiting behind the new cursor.
    pub more_data_available: bool,
}

impl SyncBatch {
    /// Validate a sync response for `device_id`.
    ///
    /// A response without a `transactionId` is malformed: accepting it
    /// would leave the stored cursor out of step with the server.
    pub fn from_payload(payload: SyncPayload, device_id: i64) -> Result<Self> {
        let transaction_id = payload
            .transaction_id
            .ok_or_else(|| Error::invalid_response("syncdata response has no transactionId"))?;

        let mut devices = payload.ewons;
        let device = match devices.iter().position(|d| d.id == device_id) {
            Some(index) => Some(devices.swap_remove(index)),
            None if devices.is_empty() => None,
            None => {
                warn!(
                    device_id,
                    returned = devices[0].id,
                    "Sync response did not contain the requested device, using first entry"
                );
                Some(devices.swap_remove(0))
            }
        };

        Ok(Self {
            transaction_id,
            device,
            more_data_available: payload.more_data_available,
        })
    }
}

/// Run one incremental sync for a single device.
pub async fn sync_device<C: DataExchange + ?Sized>(
    client: &C,
    device_id: i64,
    last_transaction_id: Option<&TransactionId>,
    create_transaction: bool,
) -> Result<SyncBatch> {
    let payload = client
        .sync(last_transaction_id, create_transaction, &[device_id])
        .await?;
    SyncBatch::from_payload(payload, device_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: i64) -> DevicePayload {
        DevicePayload {
            id,
            name: format!("ewon-{id}"),
            tags: Vec::new(),
            last_synchro_date: None,
        }
    }

    #[test]
    fn test_create_defaults_true_without_cursor() {
        assert!(resolve_create_transaction(None, None));
    }

    #[test]
    fn test_create_defaults_false_with_cursor() {
        let cursor = TransactionId::from(42);
        assert!(!resolve_create_transaction(Some(&cursor), None));
    }

    #[test]
    fn test_create_explicit_flag_wins() {
        let cursor = TransactionId::from(42);
        assert!(resolve_create_transaction(Some(&cursor), Some(true)));
        assert!(!resolve_create_transaction(None, Some(false)));
    }

    #[test]
    fn test_batch_requires_transaction_id() {
        let payload = SyncPayload {
            transaction_id: None,
            ewons: vec![device(1)],
            more_data_available: false,
        };
        let err = SyncBatch::from_payload(payload, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }

    #[test]
    fn test_batch_without_devices_is_no_data() {
        let payload = SyncPayload {
            transaction_id: Some(TransactionId::from(7)),
            ewons: Vec::new(),
            more_data_available: false,
        };
        let batch = SyncBatch::from_payload(payload, 1).unwrap();
        assert_eq!(batch.transaction_id, TransactionId::from(7));
        assert!(batch.device.is_none());
    }

    #[test]
    fn test_batch_picks_requested_device() {
        let payload = SyncPayload {
            transaction_id: Some(TransactionId::from(7)),
            ewons: vec![device(1), device(2)],
            more_data_available: true,
        };
        let batch = SyncBatch::from_payload(payload, 2).unwrap();
        assert_eq!(batch.device.unwrap().id, 2);
        assert!(batch.more_data_available);
    }

    #[test]
    fn test_batch_falls_back_to_first_device() {
        let payload = SyncPayload {
            transaction_id: Some(TransactionId::from(7)),
            ewons: vec![device(5)],
            more_data_available: false,
        };
        let batch = SyncBatch::from_payload(payload, 1).unwrap();
        assert_eq!(batch.device.unwrap().id, 5);
    }
}
