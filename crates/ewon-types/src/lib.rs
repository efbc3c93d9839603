//! Platform-agnostic types for Ewon gateway tag data.
//!
//! This crate provides the shapes shared by the Data Mailbox client and the
//! processor: upstream payloads, decoded tag values and the device clock
//! zone.
//!
//! # Features
//!
//! - Wire types for the Talk2M Data Mailbox API
//! - Typed tag values with boolean normalisation
//! - Timestamp relabelling with the device's IANA clock zone
//! - Per-record parse errors
//!
//! # Example
//!
//! ```
//! use ewon_types::{ClockZone, Tag, TagPayload};
//!
//! let payload: TagPayload = serde_json::from_str(r#"{
//!     "id": 3, "name": "Running", "dataType": "Bool",
//!     "history": [{"value": "1", "date": "2024-01-01T08:00:00"}]
//! }"#).unwrap();
//!
//! let (tag, rejected) = Tag::from_payload(&payload, ClockZone::UTC);
//! assert!(rejected.is_empty());
//! assert_eq!(tag.values[0].value(), &ewon_types::Value::Bool(true));
//! ```

pub mod clock;
pub mod error;
pub mod payload;
pub mod types;

pub use clock::ClockZone;
pub use error::{MalformedRecordError, ParseResult};
pub use payload::{
    DeviceList, DevicePayload, DeviceSummary, HistoryRecord, MailboxStatus, SyncPayload,
    TagPayload, TransactionId,
};
pub use types::{DataType, Tag, TagRef, TagValue, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_bool_decode_never_fails(s in ".*") {
            let raw = serde_json::Value::String(s.clone());
            let decoded = Value::decode(&DataType::Bool, &raw, "t").unwrap();
            let expected = matches!(s.as_str(), "1" | "True" | "true");
            prop_assert_eq!(decoded, Value::Bool(expected));
        }

        #[test]
        fn prop_relabel_preserves_wall_clock(
            secs in 0i64..4_000_000_000i64,
        ) {
            let naive = chrono::DateTime::from_timestamp(secs, 0).unwrap().naive_utc();
            let raw = naive.format("%Y-%m-%dT%H:%M:%S").to_string();
            let zone = ClockZone::parse_or_utc("Asia/Tokyo");
            let dt = zone.parse_timestamp(&raw).unwrap();
            // Tokyo has no DST, so every wall time maps to exactly one instant.
            prop_assert_eq!(dt.naive_local(), naive);
        }
    }
}
