//! Trait abstraction over the remote data-exchange service.
//!
//! This module provides the [`DataExchange`] trait that abstracts over the
//! real Data Mailbox HTTP client and the mock used in tests.

use std::sync::Arc;

use async_trait::async_trait;

use ewon_types::{DevicePayload, DeviceSummary, MailboxStatus, SyncPayload, TransactionId};

use crate::error::Result;
use crate::history::HistoryQuery;

/// Operations the core needs from the remote data-exchange service.
///
/// Timeouts, retries and authentication are the implementor's concern; the
/// core treats every call as either fully succeeding or failing.
///
/// # Example
///
/// ```ignore
/// use ewon_core::{DataExchange, Result};
///
/// async fn print_devices<C: DataExchange>(client: &C) -> Result<()> {
///     for device in client.list_devices().await? {
///         println!("{} ({})", device.name, device.id);
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait DataExchange: Send + Sync {
    /// Account-level status.
    async fn get_status(&self) -> Result<MailboxStatus>;

    /// Devices visible to the account.
    async fn list_devices(&self) -> Result<Vec<DeviceSummary>>;

    /// Full current snapshot of one device.
    async fn get_device(&self, id: i64, name: Option<&str>) -> Result<DevicePayload>;

    /// Stored history of a single tag.
    async fn get_data(&self, query: &HistoryQuery) -> Result<DevicePayload>;

    /// Incremental sync from `last_transaction_id`.
    ///
    /// The cursor is opaque and only forwarded.
    async fn sync(
        &self,
        last_transaction_id: Option<&TransactionId>,
        create_transaction: bool,
        device_ids: &[i64],
    ) -> Result<SyncPayload>;
}

#[async_trait]
impl<T: DataExchange + ?Sized> DataExchange for Arc<T> {
    async fn get_status(&self) -> Result<MailboxStatus> {
        (**self).get_status().await
    }

    async fn list_devices(&self) -> Result<Vec<DeviceSummary>> {
        (**self).list_devices().await
    }

    async fn get_device(&self, id: i64, name: Option<&str>) -> Result<DevicePayload> {
        (**self).get_device(id, name).await
    }

    async fn get_data(&self, query: &HistoryQuery) -> Result<DevicePayload> {
        (**self).get_data(query).await
    }

    async fn sync(
        &self,
        last_transaction_id: Option<&TransactionId>,
        create_transaction: bool,
        device_ids: &[i64],
    ) -> Result<SyncPayload> {
        (**self)
            .sync(last_transaction_id, create_transaction, device_ids)
            .await
    }
}
