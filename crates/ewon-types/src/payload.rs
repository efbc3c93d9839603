//! Wire shapes returned by the Talk2M Data Mailbox API.
//!
//! Field names follow the upstream JSON (camelCase). Unknown fields are
//! ignored so that additions on the server side never break decoding.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::types::DataType;

/// Opaque transaction cursor used for incremental sync.
///
/// The cursor is only ever stored and forwarded. Its JSON representation
/// (number or string) is preserved so that it round-trips unchanged through
/// the command channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Repr);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
enum Repr {
    Number(i64),
    Text(String),
}

impl TransactionId {
    /// Render the cursor as an HTTP form parameter.
    pub fn as_param(&self) -> String {
        self.to_string()
    }
}

impl From<i64> for TransactionId {
    fn from(value: i64) -> Self {
        Self(Repr::Number(value))
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(Repr::Text(value.to_string()))
    }
}

impl From<String> for TransactionId {
    fn from(value: String) -> Self {
        Self(Repr::Text(value))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Number(n) => write!(f, "{}", n),
            Repr::Text(s) => f.write_str(s),
        }
    }
}

/// Account-level status returned by `getstatus`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxStatus {
    #[serde(default)]
    pub history_count: Option<u64>,
    #[serde(default)]
    pub first_history_date: Option<String>,
    #[serde(default)]
    pub last_history_date: Option<String>,
    /// Any other fields reported by the server.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One entry of the `getewons` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub last_synchro_date: Option<String>,
}

/// Wrapper of the `getewons` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceList {
    #[serde(default)]
    pub ewons: Vec<DeviceSummary>,
}

/// A device snapshot as returned by `getewon`, `getdata` and `syncdata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePayload {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: Vec<TagPayload>,
    #[serde(default)]
    pub last_synchro_date: Option<String>,
}

/// A tag and its history inside a device snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagPayload {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
}

/// One raw historical reading.
///
/// Both fields are kept loosely typed; validation happens when the record
/// is turned into a [`TagValue`](crate::TagValue).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
}

/// Response of the incremental `syncdata` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    #[serde(default)]
    pub transaction_id: Option<TransactionId>,
    #[serde(default)]
    pub ewons: Vec<DevicePayload>,
    #[serde(default)]
    pub more_data_available: bool,
}
