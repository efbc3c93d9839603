//! Integration tests for ewon-core.
//!
//! These run without network access: the device aggregate is driven by the
//! mock client, and the HTTP client is pointed at a closed local port.

use std::time::Duration;

use ewon_core::datamailbox::ClientError;
use ewon_core::{
    AlignmentWindow, ClockZone, Credentials, DataMailboxClient, Error, Ewon, MockDataExchange,
    SyncOutcome, TransactionId, Value,
};
use ewon_types::SyncPayload;

const DEVICE_ID: i64 = 4242;

fn payload(json: &str) -> SyncPayload {
    serde_json::from_str(json).unwrap()
}

#[tokio::test]
async fn test_sync_then_frame_in_device_zone() {
    let mock = MockDataExchange::new();
    mock.push_sync(payload(
        r#"{
            "transactionId": "tx-1",
            "moreDataAvailable": true,
            "ewons": [{
                "id": 4242,
                "name": "pump-station",
                "tags": [
                    {"id": 1, "name": "Level", "dataType": "Float",
                     "history": [{"value": 3, "date": "2024-07-01T08:00:00+05:00"}]},
                    {"id": 2, "name": "Pump", "dataType": "Bool",
                     "history": [{"value": "true", "date": "2024-07-01T08:04:59"}]}
                ]
            }]
        }"#,
    ))
    .await;

    let mut ewon = Ewon::new(mock, DEVICE_ID).with_clock_zone(ClockZone::try_parse("Europe/Brussels").unwrap());
    let outcome = ewon.sync(None).await.unwrap();
    assert!(outcome.more_data_available());
    assert_eq!(ewon.last_transaction_id(), Some(&TransactionId::from("tx-1")));
    assert_eq!(ewon.name(), Some("pump-station"));

    let frames = ewon.build_frames(AlignmentWindow::default());
    assert_eq!(frames.len(), 1);

    // The embedded +05:00 offset is discarded; 08:00 is Brussels wall time.
    assert_eq!(frames[0].timestamp().to_rfc3339(), "2024-07-01T08:00:00+02:00");

    let values: Vec<_> = frames[0].values().map(|v| v.value().clone()).collect();
    assert_eq!(values, vec![Value::Bool(true), Value::Float(3.0)]);
}

#[tokio::test]
async fn test_window_bound_is_exclusive() {
    let mock = MockDataExchange::new();
    mock.push_sync(payload(
        r#"{
            "transactionId": 1,
            "ewons": [{
                "id": 4242,
                "tags": [
                    {"id": 1, "name": "A", "dataType": "Float",
                     "history": [{"value": 1.0, "date": "2024-01-01T10:00:00"}]},
                    {"id": 2, "name": "B", "dataType": "Float",
                     "history": [{"value": 2.0, "date": "2024-01-01T10:05:00"}]}
                ]
            }]
        }"#,
    ))
    .await;

    let mut ewon = Ewon::new(mock, DEVICE_ID);
    ewon.sync(None).await.unwrap();
    assert_eq!(ewon.build_frames(AlignmentWindow::default()).len(), 2);
    assert_eq!(
        ewon.build_frames(AlignmentWindow::from_secs(301).unwrap()).len(),
        1
    );
}

#[tokio::test]
async fn test_unreachable_mailbox_is_sync_failure() {
    let client = DataMailboxClient::with_base_url(
        "http://127.0.0.1:9",
        Credentials::new("token", "dev"),
        Duration::from_secs(2),
    )
    .unwrap();
    let mut ewon = Ewon::new(client, DEVICE_ID).with_cursor(Some(TransactionId::from(7)));

    let err = ewon.sync(None).await.unwrap_err();
    match err {
        Error::SyncFailed { source, cursor, .. } => {
            assert_eq!(cursor, Some(TransactionId::from(7)));
            assert!(matches!(
                *source,
                Error::Client(ClientError::NotReachable { .. })
            ));
        }
        other => panic!("expected SyncFailed, got {:?}", other),
    }
    assert_eq!(ewon.last_transaction_id(), Some(&TransactionId::from(7)));
}

#[tokio::test]
async fn test_no_data_outcome() {
    let mut ewon = Ewon::new(MockDataExchange::new(), DEVICE_ID);
    assert_eq!(ewon.sync(None).await.unwrap(), SyncOutcome::NoData);
    assert_eq!(ewon.last_transaction_id(), Some(&TransactionId::from(0)));
}
