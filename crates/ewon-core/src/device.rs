//! The Ewon device aggregate.
//!
//! An [`Ewon`] is the long-lived root for one remote gateway. It owns the
//! resumable transaction cursor and the transient tag snapshot and frames
//! that are rebuilt on every refresh or sync.
//!
//! One aggregate is meant to be driven from a single call site. To poll
//! several gateways, construct one aggregate per gateway; nothing is shared
//! between instances.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use ewon_types::{ClockZone, DevicePayload, MalformedRecordError, Tag, TransactionId};

use crate::error::{Error, Result};
use crate::frames::{AlignmentWindow, Frame, build_frames};
use crate::sync::{SyncBatch, resolve_create_transaction, sync_device};
use crate::traits::DataExchange;

/// Key for looking up a tag on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKey<'a> {
    Name(&'a str),
    Id(i64),
}

impl<'a> From<&'a str> for TagKey<'a> {
    fn from(name: &'a str) -> Self {
        TagKey::Name(name)
    }
}

impl From<i64> for TagKey<'_> {
    fn from(id: i64) -> Self {
        TagKey::Id(id)
    }
}

/// Result of a successful sync call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The device snapshot was replaced with the returned data.
    Updated {
        /// Whether the server holds more data behind the new cursor.
        more_data_available: bool,
    },
    /// The server returned no entry for the device. The cursor still
    /// advanced; the tag snapshot was left untouched.
    NoData,
}

impl SyncOutcome {
    pub fn is_no_data(&self) -> bool {
        matches!(self, SyncOutcome::NoData)
    }

    pub fn more_data_available(&self) -> bool {
        matches!(
            self,
            SyncOutcome::Updated {
                more_data_available: true
            }
        )
    }
}

/// Serialisable overview of a device aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EwonSummary {
    pub id: i64,
    pub name: Option<String>,
    pub clock_zone: String,
    pub last_transaction_id: Option<TransactionId>,
    pub tag_count: usize,
    pub value_count: usize,
    pub frame_count: usize,
    pub rejected_count: usize,
}

/// Aggregate root for one Ewon gateway.
pub struct Ewon<C> {
    client: C,
    id: i64,
    name: Option<String>,
    clock_zone: ClockZone,
    last_transaction_id: Option<TransactionId>,
    tags: Vec<Tag>,
    frames: Vec<Frame>,
    rejected: Vec<MalformedRecordError>,
}

impl<C> std::fmt::Debug for Ewon<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ewon")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("clock_zone", &self.clock_zone)
            .field("last_transaction_id", &self.last_transaction_id)
            .field("tags", &self.tags.len())
            .field("frames", &self.frames.len())
            .finish()
    }
}

impl<C: DataExchange> Ewon<C> {
    /// Create an aggregate for device `id` with an empty snapshot.
    pub fn new(client: C, id: i64) -> Self {
        Self {
            client,
            id,
            name: None,
            clock_zone: ClockZone::UTC,
            last_transaction_id: None,
            tags: Vec::new(),
            frames: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Set the device name sent along with snapshot requests.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the clock zone used to relabel timestamps.
    #[must_use]
    pub fn with_clock_zone(mut self, zone: ClockZone) -> Self {
        self.clock_zone = zone;
        self
    }

    /// Resume from a previously stored cursor.
    #[must_use]
    pub fn with_cursor(mut self, cursor: Option<TransactionId>) -> Self {
        self.last_transaction_id = cursor;
        self
    }

    /// Set the clock zone by IANA name, falling back to UTC when invalid.
    ///
    /// Only affects snapshots loaded afterwards.
    pub fn set_clock_zone(&mut self, name: &str) {
        self.clock_zone = ClockZone::parse_or_utc(name);
        info!(device_id = self.id, "Clock timezone set to {}", self.clock_zone);
    }

    pub fn set_last_transaction_id(&mut self, cursor: Option<TransactionId>) {
        self.last_transaction_id = cursor;
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn clock_zone(&self) -> ClockZone {
        self.clock_zone
    }

    pub fn last_transaction_id(&self) -> Option<&TransactionId> {
        self.last_transaction_id.as_ref()
    }

    /// Tags of the current snapshot, unique by id, in upstream order.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Frames from the last [`build_frames`](Self::build_frames), in
    /// discovery order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Records dropped while loading the current snapshot.
    pub fn rejected_records(&self) -> &[MalformedRecordError] {
        &self.rejected
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetch the full current snapshot, replacing every tag.
    ///
    /// Previously built frames are discarded.
    pub async fn refresh(&mut self) -> Result<()> {
        let payload = self.client.get_device(self.id, self.name.as_deref()).await?;
        self.apply_snapshot(&payload);
        Ok(())
    }

    /// Run one incremental sync from the stored cursor.
    ///
    /// `create_transaction` defaults to `true` only when no cursor is
    /// stored. On success the cursor is replaced with the one the server
    /// committed; on any failure it is left untouched and
    /// [`Error::SyncFailed`] is returned.
    pub async fn sync(&mut self, create_transaction: Option<bool>) -> Result<SyncOutcome> {
        let create = resolve_create_transaction(self.last_transaction_id.as_ref(), create_transaction);
        debug!(
            device_id = self.id,
            cursor = ?self.last_transaction_id,
            create_transaction = create,
            "Syncing device"
        );

        let batch = match sync_device(&self.client, self.id, self.last_transaction_id.as_ref(), create).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(
                    device_id = self.id,
                    cursor = ?self.last_transaction_id,
                    "Sync failed: {}",
                    e
                );
                return Err(Error::sync_failed(self.id, self.last_transaction_id.clone(), e));
            }
        };

        Ok(self.apply_sync(batch))
    }

    fn apply_sync(&mut self, batch: SyncBatch) -> SyncOutcome {
        self.last_transaction_id = Some(batch.transaction_id);

        match batch.device {
            Some(payload) => {
                self.apply_snapshot(&payload);
                SyncOutcome::Updated {
                    more_data_available: batch.more_data_available,
                }
            }
            None => {
                debug!(device_id = self.id, "Sync returned no data");
                SyncOutcome::NoData
            }
        }
    }

    /// Replace the tag snapshot with `payload`.
    ///
    /// Records that fail to parse are dropped and logged; the rest of the
    /// snapshot is kept. Duplicate tag ids keep the last entry.
    pub fn apply_snapshot(&mut self, payload: &DevicePayload) {
        if !payload.name.is_empty() {
            self.name = Some(payload.name.clone());
        }

        let mut tags: Vec<Tag> = Vec::with_capacity(payload.tags.len());
        let mut rejected = Vec::new();
        for tag_payload in &payload.tags {
            let (tag, errors) = Tag::from_payload(tag_payload, self.clock_zone);
            for err in &errors {
                warn!(device_id = self.id, "Dropping malformed record: {}", err);
            }
            rejected.extend(errors);

            match tags.iter_mut().find(|t| t.id == tag.id) {
                Some(existing) => {
                    warn!(device_id = self.id, tag_id = tag.id, "Duplicate tag id in snapshot");
                    *existing = tag;
                }
                None => tags.push(tag),
            }
        }

        self.tags = tags;
        self.rejected = rejected;
        self.frames.clear();

        info!(
            device_id = self.id,
            tags = self.tags.len(),
            values = self.tags.iter().map(Tag::value_count).sum::<usize>(),
            rejected = self.rejected.len(),
            "Loaded device snapshot"
        );
    }

    /// Look up a tag by name or id.
    ///
    /// Absence is normal (configuration may name optional tags), so this
    /// returns `None` rather than an error.
    pub fn get_tag<'k>(&self, key: impl Into<TagKey<'k>>) -> Option<&Tag> {
        match key.into() {
            TagKey::Name(name) => self.get_tag_by_name(name),
            TagKey::Id(id) => self.get_tag_by_id(id),
        }
    }

    pub fn get_tag_by_name(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name == name)
    }

    pub fn get_tag_by_id(&self, id: i64) -> Option<&Tag> {
        self.tags.iter().find(|t| t.id == id)
    }

    /// Align the current snapshot into frames, replacing any earlier build.
    ///
    /// This never fetches: callers populate the snapshot with
    /// [`refresh`](Self::refresh) or [`sync`](Self::sync) first. An empty
    /// snapshot yields no frames.
    pub fn build_frames(&mut self, window: AlignmentWindow) -> &[Frame] {
        if self.tags.is_empty() {
            debug!(device_id = self.id, "No tags loaded, no frames to build");
        }
        self.frames = build_frames(&self.tags, window);
        debug!(device_id = self.id, frames = self.frames.len(), "Built frames");
        &self.frames
    }

    /// Overview for display.
    pub fn summary(&self) -> EwonSummary {
        EwonSummary {
            id: self.id,
            name: self.name.clone(),
            clock_zone: self.clock_zone.to_string(),
            last_transaction_id: self.last_transaction_id.clone(),
            tag_count: self.tags.len(),
            value_count: self.tags.iter().map(Tag::value_count).sum(),
            frame_count: self.frames.len(),
            rejected_count: self.rejected.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDataExchange;
    use ewon_types::{DataType, HistoryRecord, SyncPayload, TagPayload};
    use serde_json::json;

    const DEVICE_ID: i64 = 81234;

    fn record(value: serde_json::Value, date: &str) -> HistoryRecord {
        HistoryRecord {
            value,
            date: Some(date.to_string()),
            quality: None,
        }
    }

    fn tag_payload(id: i64, name: &str, data_type: DataType, history: Vec<HistoryRecord>) -> TagPayload {
        TagPayload {
            id,
            name: name.to_string(),
            data_type,
            description: Some(format!("{name} description  ")),
            history,
        }
    }

    fn snapshot() -> DevicePayload {
        DevicePayload {
            id: DEVICE_ID,
            name: "plant-a".to_string(),
            tags: vec![
                tag_payload(
                    1,
                    "CH4",
                    DataType::Float,
                    vec![
                        record(json!(1.5), "2024-01-01T10:00:00"),
                        record(json!(1.7), "2024-01-01T10:03:00"),
                    ],
                ),
                tag_payload(
                    2,
                    "Running",
                    DataType::Bool,
                    vec![
                        record(json!("true"), "2024-01-01T10:01:00"),
                        record(json!(0), "bogus"),
                    ],
                ),
            ],
            last_synchro_date: None,
        }
    }

    fn sync_payload(cursor: i64, devices: Vec<DevicePayload>) -> SyncPayload {
        SyncPayload {
            transaction_id: Some(TransactionId::from(cursor)),
            ewons: devices,
            more_data_available: false,
        }
    }

    #[tokio::test]
    async fn test_refresh_replaces_tags() {
        let mock = MockDataExchange::with_device(snapshot());
        let mut ewon = Ewon::new(mock, DEVICE_ID);
        ewon.refresh().await.unwrap();

        assert_eq!(ewon.name(), Some("plant-a"));
        assert_eq!(ewon.tags().len(), 2);
        assert_eq!(ewon.rejected_records().len(), 1);
        assert_eq!(
            ewon.get_tag("CH4").unwrap().description.as_deref(),
            Some("CH4 description")
        );

        let mut smaller = snapshot();
        smaller.tags.truncate(1);
        ewon.client().set_device(smaller).await;
        ewon.refresh().await.unwrap();
        assert_eq!(ewon.tags().len(), 1);
        assert!(ewon.get_tag("Running").is_none());
        assert!(ewon.rejected_records().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_discards_frames() {
        let mut ewon = Ewon::new(MockDataExchange::with_device(snapshot()), DEVICE_ID);
        ewon.refresh().await.unwrap();
        ewon.build_frames(AlignmentWindow::default());
        assert_eq!(ewon.frames().len(), 1);

        ewon.refresh().await.unwrap();
        assert!(ewon.frames().is_empty());
    }

    #[tokio::test]
    async fn test_get_tag_by_name_or_id() {
        let mut ewon = Ewon::new(MockDataExchange::with_device(snapshot()), DEVICE_ID);
        ewon.refresh().await.unwrap();
        assert_eq!(ewon.get_tag(2).unwrap().name, "Running");
        assert_eq!(ewon.get_tag("Running").unwrap().id, 2);
        assert!(ewon.get_tag("Missing").is_none());
        assert!(ewon.get_tag(99).is_none());
    }

    #[tokio::test]
    async fn test_first_sync_creates_transaction() {
        let mock = MockDataExchange::new();
        mock.push_sync(sync_payload(42, vec![snapshot()])).await;
        let mut ewon = Ewon::new(mock, DEVICE_ID);

        let outcome = ewon.sync(None).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Updated {
                more_data_available: false
            }
        );
        assert_eq!(ewon.last_transaction_id(), Some(&TransactionId::from(42)));
        assert_eq!(ewon.tags().len(), 2);

        let calls = ewon.client().sync_calls().await;
        assert!(calls[0].create_transaction);
        assert_eq!(calls[0].last_transaction_id, None);
        assert_eq!(calls[0].device_ids, vec![DEVICE_ID]);
    }

    #[tokio::test]
    async fn test_resumed_sync_reuses_cursor() {
        let mock = MockDataExchange::new();
        mock.push_sync(sync_payload(43, vec![snapshot()])).await;
        let mut ewon = Ewon::new(mock, DEVICE_ID).with_cursor(Some(TransactionId::from(42)));

        ewon.sync(None).await.unwrap();
        let calls = ewon.client().sync_calls().await;
        assert!(!calls[0].create_transaction);
        assert_eq!(calls[0].last_transaction_id, Some(TransactionId::from(42)));
        assert_eq!(ewon.last_transaction_id(), Some(&TransactionId::from(43)));
    }

    #[tokio::test]
    async fn test_forced_create_with_cursor() {
        let mock = MockDataExchange::new();
        let mut ewon = Ewon::new(mock, DEVICE_ID).with_cursor(Some(TransactionId::from(42)));
        ewon.sync(Some(true)).await.unwrap();
        assert!(ewon.client().sync_calls().await[0].create_transaction);
    }

    #[tokio::test]
    async fn test_sync_without_devices_is_no_data() {
        let mock = MockDataExchange::with_device(snapshot());
        mock.push_sync(sync_payload(50, Vec::new())).await;
        let mut ewon = Ewon::new(mock, DEVICE_ID);
        ewon.refresh().await.unwrap();

        let outcome = ewon.sync(None).await.unwrap();
        assert!(outcome.is_no_data());
        assert_eq!(ewon.last_transaction_id(), Some(&TransactionId::from(50)));
        assert_eq!(ewon.tags().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_sync_keeps_cursor() {
        let mock = MockDataExchange::new();
        mock.fail_next(1);
        let mut ewon = Ewon::new(mock, DEVICE_ID).with_cursor(Some(TransactionId::from(42)));

        let err = ewon.sync(None).await.unwrap_err();
        match &err {
            Error::SyncFailed {
                device_id, cursor, ..
            } => {
                assert_eq!(*device_id, DEVICE_ID);
                assert_eq!(cursor, &Some(TransactionId::from(42)));
            }
            other => panic!("expected SyncFailed, got {:?}", other),
        }
        assert_eq!(ewon.last_transaction_id(), Some(&TransactionId::from(42)));
    }

    #[tokio::test]
    async fn test_sync_missing_transaction_id_keeps_cursor() {
        let mock = MockDataExchange::new();
        mock.push_sync(SyncPayload {
            transaction_id: None,
            ewons: vec![snapshot()],
            more_data_available: false,
        })
        .await;
        let mut ewon = Ewon::new(mock, DEVICE_ID).with_cursor(Some(TransactionId::from(7)));

        assert!(ewon.sync(None).await.unwrap_err().is_sync_failure());
        assert_eq!(ewon.last_transaction_id(), Some(&TransactionId::from(7)));
        assert!(ewon.tags().is_empty());
    }

    #[tokio::test]
    async fn test_cursor_tracks_last_successful_sync() {
        let mock = MockDataExchange::new();
        mock.push_sync(sync_payload(1, Vec::new())).await;
        mock.push_sync(sync_payload(2, Vec::new())).await;
        let mut ewon = Ewon::new(mock, DEVICE_ID);

        ewon.sync(None).await.unwrap();
        ewon.client().fail_next(1);
        assert!(ewon.sync(None).await.is_err());
        assert_eq!(ewon.last_transaction_id(), Some(&TransactionId::from(1)));

        ewon.sync(None).await.unwrap();
        assert_eq!(ewon.last_transaction_id(), Some(&TransactionId::from(2)));

        ewon.client().fail_next(1);
        assert!(ewon.sync(None).await.is_err());
        assert_eq!(ewon.last_transaction_id(), Some(&TransactionId::from(2)));
    }

    #[tokio::test]
    async fn test_build_frames_on_empty_snapshot_does_not_fetch() {
        let mock = MockDataExchange::with_device(snapshot());
        let mut ewon = Ewon::new(mock, DEVICE_ID);
        assert!(ewon.build_frames(AlignmentWindow::default()).is_empty());
        assert_eq!(ewon.client().call_count(), 0);
    }

    #[tokio::test]
    async fn test_build_frames_aligns_snapshot() {
        let mut ewon = Ewon::new(MockDataExchange::with_device(snapshot()), DEVICE_ID);
        ewon.refresh().await.unwrap();

        let frames = ewon.build_frames(AlignmentWindow::default()).to_vec();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 3);
        let names: Vec<_> = frames[0].values().map(|v| v.tag_name()).collect();
        assert_eq!(names, vec!["Running", "CH4", "CH4"]);

        // Rebuilding replaces rather than appends.
        ewon.build_frames(AlignmentWindow::default());
        assert_eq!(ewon.frames(), &frames[..]);
    }

    #[tokio::test]
    async fn test_clock_zone_applied_to_snapshot() {
        let mock = MockDataExchange::with_device(snapshot());
        let mut ewon = Ewon::new(mock, DEVICE_ID);
        ewon.set_clock_zone("Europe/Brussels");
        ewon.refresh().await.unwrap();

        let value = &ewon.get_tag("CH4").unwrap().values[0];
        assert_eq!(value.timestamp().timezone(), chrono_tz::Europe::Brussels);
        assert_eq!(value.timestamp().to_rfc3339(), "2024-01-01T10:00:00+01:00");
    }

    #[tokio::test]
    async fn test_invalid_clock_zone_falls_back() {
        let mut ewon = Ewon::new(MockDataExchange::new(), DEVICE_ID);
        ewon.set_clock_zone("Nowhere/Special");
        assert_eq!(ewon.clock_zone(), ClockZone::UTC);
    }

    #[tokio::test]
    async fn test_duplicate_tag_ids_keep_last() {
        let mut payload = snapshot();
        payload.tags.push(tag_payload(1, "CH4-dup", DataType::Float, Vec::new()));
        let mut ewon = Ewon::new(MockDataExchange::new(), DEVICE_ID);
        ewon.apply_snapshot(&payload);
        assert_eq!(ewon.tags().len(), 2);
        assert_eq!(ewon.get_tag(1).unwrap().name, "CH4-dup");
    }

    #[tokio::test]
    async fn test_summary() {
        let mock = MockDataExchange::new();
        mock.push_sync(sync_payload(9, vec![snapshot()])).await;
        let mut ewon = Ewon::new(mock, DEVICE_ID);
        ewon.sync(None).await.unwrap();
        ewon.build_frames(AlignmentWindow::default());

        let summary = ewon.summary();
        assert_eq!(summary.tag_count, 2);
        assert_eq!(summary.value_count, 3);
        assert_eq!(summary.frame_count, 1);
        assert_eq!(summary.rejected_count, 1);
        assert_eq!(summary.last_transaction_id, Some(TransactionId::from(9)));
        assert_eq!(summary.clock_zone, "UTC");
    }
}
