//! Mock data-exchange implementation for testing.
//!
//! This module provides a mock client that can be used for unit testing
//! without reaching the Data Mailbox.
//!
//! The [`MockDataExchange`] implements the [`DataExchange`] trait, allowing
//! it to be used interchangeably with the HTTP client in generic code.
//!
//! # Features
//!
//! - **Scripted syncs**: Queue sync responses that are returned in order
//! - **Failure injection**: Fail every call, or only the next `n` calls
//! - **Call recording**: Inspect the cursor and flags each sync was sent with

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use ewon_types::{DevicePayload, DeviceSummary, MailboxStatus, SyncPayload, TransactionId};

use crate::error::{Error, Result};
use crate::history::HistoryQuery;
use crate::traits::DataExchange;

/// Arguments of one recorded sync call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCall {
    pub last_transaction_id: Option<TransactionId>,
    pub create_transaction: bool,
    pub device_ids: Vec<i64>,
}

/// A mock Data Mailbox for testing.
///
/// # Example
///
/// ```
/// use ewon_core::{DataExchange, MockDataExchange};
/// use ewon_types::{DevicePayload, SyncPayload, TransactionId};
///
/// #[tokio::main]
/// async fn main() {
///     let mock = MockDataExchange::new();
///     mock.push_sync(SyncPayload {
///         transaction_id: Some(TransactionId::from(1)),
///         ..Default::default()
///     })
///     .await;
///
///     let payload = mock.sync(None, true, &[42]).await.unwrap();
///     assert_eq!(payload.transaction_id, Some(TransactionId::from(1)));
///     assert_eq!(mock.sync_calls().await.len(), 1);
/// }
/// ```
#[derive(Default)]
pub struct MockDataExchange {
    status: RwLock<MailboxStatus>,
    devices: RwLock<Vec<DevicePayload>>,
    history: RwLock<Option<DevicePayload>>,
    sync_responses: Mutex<VecDeque<SyncPayload>>,
    sync_calls: Mutex<Vec<SyncCall>>,
    should_fail: AtomicBool,
    fail_message: RwLock<String>,
    /// Number of upcoming calls that fail before calls succeed again.
    remaining_failures: AtomicU32,
    call_count: AtomicU32,
}

impl std::fmt::Debug for MockDataExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDataExchange")
            .field("should_fail", &self.should_fail.load(Ordering::Relaxed))
            .field("call_count", &self.call_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockDataExchange {
    /// Create an empty mock. Syncs with nothing queued return no devices
    /// and echo the sent cursor (or `0` when none was sent).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that knows one device.
    pub fn with_device(device: DevicePayload) -> Self {
        Self {
            devices: RwLock::new(vec![device]),
            ..Self::default()
        }
    }

    // --- Test control methods ---

    /// Add or replace a device snapshot returned by `get_device`.
    pub async fn set_device(&self, device: DevicePayload) {
        let mut devices = self.devices.write().await;
        devices.retain(|d| d.id != device.id);
        devices.push(device);
    }

    /// Set the response of `get_status`.
    pub async fn set_status(&self, status: MailboxStatus) {
        *self.status.write().await = status;
    }

    /// Set the response of `get_data`.
    pub async fn set_history(&self, payload: DevicePayload) {
        *self.history.write().await = Some(payload);
    }

    /// Queue a sync response.
    pub async fn push_sync(&self, payload: SyncPayload) {
        self.sync_responses.lock().await.push_back(payload);
    }

    /// Make every call fail until cleared.
    pub async fn set_should_fail(&self, fail: bool, message: Option<&str>) {
        self.should_fail.store(fail, Ordering::Relaxed);
        if let Some(msg) = message {
            *self.fail_message.write().await = msg.to_string();
        }
    }

    /// Make the next `count` calls fail.
    pub fn fail_next(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Every sync call made so far.
    pub async fn sync_calls(&self) -> Vec<SyncCall> {
        self.sync_calls.lock().await.clone()
    }

    /// Number of calls of any kind made so far.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    async fn check_should_fail(&self) -> Result<()> {
        self.call_count.fetch_add(1, Ordering::Relaxed);

        if self.remaining_failures.load(Ordering::Relaxed) > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::invalid_response(self.failure_message().await));
        }

        if self.should_fail.load(Ordering::Relaxed) {
            Err(Error::invalid_response(self.failure_message().await))
        } else {
            Ok(())
        }
    }

    async fn failure_message(&self) -> String {
        let message = self.fail_message.read().await;
        if message.is_empty() {
            "Mock failure".to_string()
        } else {
            message.clone()
        }
    }
}

#[async_trait]
impl DataExchange for MockDataExchange {
    async fn get_status(&self) -> Result<MailboxStatus> {
        self.check_should_fail().await?;
        Ok(self.status.read().await.clone())
    }

    async fn list_devices(&self) -> Result<Vec<DeviceSummary>> {
        self.check_should_fail().await?;
        Ok(self
            .devices
            .read()
            .await
            .iter()
            .map(|d| DeviceSummary {
                id: d.id,
                name: d.name.clone(),
                description: None,
                last_synchro_date: d.last_synchro_date.clone(),
            })
            .collect())
    }

    async fn get_device(&self, id: i64, name: Option<&str>) -> Result<DevicePayload> {
        self.check_should_fail().await?;
        self.devices
            .read()
            .await
            .iter()
            .find(|d| d.id == id || name.is_some_and(|n| n == d.name))
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))
    }

    async fn get_data(&self, query: &HistoryQuery) -> Result<DevicePayload> {
        self.check_should_fail().await?;
        self.history
            .read()
            .await
            .clone()
            .filter(|d| d.id == query.ewon_id)
            .ok_or_else(|| Error::DeviceNotFound(query.ewon_id.to_string()))
    }

    async fn sync(
        &self,
        last_transaction_id: Option<&TransactionId>,
        create_transaction: bool,
        device_ids: &[i64],
    ) -> Result<SyncPayload> {
        self.sync_calls.lock().await.push(SyncCall {
            last_transaction_id: last_transaction_id.cloned(),
            create_transaction,
            device_ids: device_ids.to_vec(),
        });
        self.check_should_fail().await?;

        let queued = self.sync_responses.lock().await.pop_front();
        Ok(queued.unwrap_or_else(|| SyncPayload {
            transaction_id: Some(
                last_transaction_id
                    .cloned()
                    .unwrap_or_else(|| TransactionId::from(0)),
            ),
            ewons: Vec::new(),
            more_data_available: false,
        }))
    }
}
