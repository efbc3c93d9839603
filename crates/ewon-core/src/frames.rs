//! Frame alignment.
//!
//! Tags on a gateway are sampled on independent cadences, so their
//! histories do not share timestamps. A [`Frame`] groups the readings that
//! happened at approximately the same instant so they can be published as
//! a single state update.
//!
//! # Algorithm
//!
//! Values are visited tag by tag, each tag in its upstream order. Every
//! value is placed into the first existing frame, in creation order, whose
//! anchor equals the value's timestamp or lies strictly within the
//! alignment window of it. If none matches, a new frame is anchored at the
//! value's timestamp.
//!
//! This is first-fit, not best-fit: when several frames are within the
//! window, the oldest-created one wins even if another is closer.
//!
//! Matched values are inserted at the front of the frame, so the last value
//! seen for a frame is the first one yielded by [`Frame::values`].
//!
//! # Invariants
//!
//! - A frame's anchor never changes once created; frames only grow.
//! - Frames are never merged or removed during a build.
//! - Every value is placed in exactly one frame.
//! - Every value is within the window of (or equal to) its frame's anchor.
//!
//! [`build_frames`] is a pure function of its inputs: building twice from
//! the same tags yields equal frames and never duplicates values.

use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::debug;

use ewon_types::{Tag, TagValue};

use crate::error::{Error, Result};

/// Default alignment window in seconds (5 minutes).
pub const DEFAULT_WINDOW_SECS: u64 = 300;

/// Tolerance within which two readings count as simultaneous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentWindow(TimeDelta);

impl Default for AlignmentWindow {
    fn default() -> Self {
        Self(TimeDelta::seconds(DEFAULT_WINDOW_SECS as i64))
    }
}

impl AlignmentWindow {
    /// Create a window from whole seconds.
    ///
    /// A zero window only groups exactly equal timestamps.
    pub fn from_secs(secs: u64) -> Result<Self> {
        i64::try_from(secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .map(Self)
            .ok_or_else(|| Error::invalid_config(format!("alignment window {secs}s is too large")))
    }

    /// Window length.
    pub fn duration(&self) -> TimeDelta {
        self.0
    }

    /// Whether `timestamp` belongs with a frame anchored at `anchor`.
    ///
    /// ```
    /// use chrono::TimeZone;
    /// use ewon_core::AlignmentWindow;
    ///
    /// let window = AlignmentWindow::default();
    /// let anchor = chrono_tz::UTC.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
    /// assert!(window.matches(anchor, anchor + chrono::TimeDelta::seconds(299)));
    /// assert!(!window.matches(anchor, anchor + chrono::TimeDelta::seconds(300)));
    /// ```
    pub fn matches(&self, anchor: DateTime<Tz>, timestamp: DateTime<Tz>) -> bool {
        anchor == timestamp || (anchor - timestamp).abs() < self.0
    }
}

/// Readings that occurred at approximately the same instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    timestamp: DateTime<Tz>,
    tag_values: VecDeque<TagValue>,
}

impl Frame {
    /// Start a frame anchored at `value`'s timestamp.
    pub fn new(value: TagValue) -> Self {
        let timestamp = value.timestamp();
        let mut tag_values = VecDeque::with_capacity(4);
        tag_values.push_back(value);
        Self {
            timestamp,
            tag_values,
        }
    }

    /// Anchor timestamp.
    pub fn timestamp(&self) -> DateTime<Tz> {
        self.timestamp
    }

    /// Values, most recently inserted first.
    pub fn values(&self) -> impl Iterator<Item = &TagValue> {
        self.tag_values.iter()
    }

    pub fn len(&self) -> usize {
        self.tag_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tag_values.is_empty()
    }

    /// Whether `value` would be accepted by this frame.
    pub fn accepts(&self, value: &TagValue, window: AlignmentWindow) -> bool {
        window.matches(self.timestamp, value.timestamp())
    }

    fn insert(&mut self, value: TagValue) {
        self.tag_values.push_front(value);
    }
}

/// Incremental first-fit frame builder.
#[derive(Debug, Clone, Default)]
pub struct FrameBuilder {
    window: AlignmentWindow,
    frames: Vec<Frame>,
}

impl FrameBuilder {
    pub fn new(window: AlignmentWindow) -> Self {
        Self {
            window,
            frames: Vec::new(),
        }
    }

    /// Place one value, returning the index of the frame it landed in.
    pub fn place(&mut self, value: TagValue) -> usize {
        if let Some(index) = self.frames.iter().position(|f| f.accepts(&value, self.window)) {
            self.frames[index].insert(value);
            return index;
        }

        debug!(
            tag = value.tag_name(),
            "Creating new frame at {}",
            value.timestamp().to_rfc3339()
        );
        self.frames.push(Frame::new(value));
        self.frames.len() - 1
    }

    /// Place every value of `tag`, in its upstream order.
    pub fn add_tag(&mut self, tag: &Tag) {
        for value in &tag.values {
            self.place(value.clone());
        }
    }

    /// Frames in creation order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

/// Align the values of `tags` into frames.
///
/// Frames are returned in creation (discovery) order. No tags, or tags
/// without values, yield no frames.
pub fn build_frames(tags: &[Tag], window: AlignmentWindow) -> Vec<Frame> {
    let mut builder = FrameBuilder::new(window);
    for tag in tags {
        builder.add_tag(tag);
    }
    builder.into_frames()
}

/// Order frames by anchor timestamp, keeping discovery order for ties.
pub fn sort_chronologically(frames: &mut [Frame]) {
    frames.sort_by_key(Frame::timestamp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ewon_types::{DataType, TagRef, Value};
    use proptest::prelude::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Tz> {
        chrono_tz::UTC.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    fn tag(id: i64, name: &str, times: &[DateTime<Tz>]) -> Tag {
        let tag_ref = TagRef {
            id,
            name: name.to_string(),
        };
        Tag {
            id,
            name: name.to_string(),
            data_type: DataType::Float,
            description: None,
            values: times
                .iter()
                .enumerate()
                .map(|(i, t)| TagValue::new(tag_ref.clone(), Value::Float(i as f64), *t))
                .collect(),
        }
    }

    fn names(frame: &Frame) -> Vec<&str> {
        frame.values().map(|v| v.tag_name()).collect()
    }

    #[test]
    fn test_values_within_window_share_a_frame() {
        let tags = vec![
            tag(1, "A", &[at(10, 0, 0), at(10, 3, 0)]),
            tag(2, "B", &[at(10, 1, 0)]),
        ];
        let frames = build_frames(&tags, AlignmentWindow::default());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp(), at(10, 0, 0));
        assert_eq!(frames[0].len(), 3);
    }

    #[test]
    fn test_values_outside_window_split() {
        let tags = vec![tag(1, "A", &[at(10, 0, 0)]), tag(2, "B", &[at(10, 10, 0)])];
        let frames = build_frames(&tags, AlignmentWindow::default());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].timestamp(), at(10, 0, 0));
        assert_eq!(frames[1].timestamp(), at(10, 10, 0));
    }

    #[test]
    fn test_window_upper_bound_is_exclusive() {
        let tags = vec![tag(1, "A", &[at(10, 0, 0)]), tag(2, "B", &[at(10, 5, 0)])];
        let frames = build_frames(&tags, AlignmentWindow::default());
        assert_eq!(frames.len(), 2);

        let tags = vec![tag(1, "A", &[at(10, 0, 0)]), tag(2, "B", &[at(10, 4, 59)])];
        let frames = build_frames(&tags, AlignmentWindow::default());
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_window_is_symmetric() {
        let tags = vec![tag(1, "A", &[at(10, 5, 0)]), tag(2, "B", &[at(10, 1, 0)])];
        let frames = build_frames(&tags, AlignmentWindow::default());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp(), at(10, 5, 0));
    }

    #[test]
    fn test_zero_window_groups_exact_matches_only() {
        let window = AlignmentWindow::from_secs(0).unwrap();
        let tags = vec![
            tag(1, "A", &[at(10, 0, 0)]),
            tag(2, "B", &[at(10, 0, 0), at(10, 0, 1)]),
        ];
        let frames = build_frames(&tags, window);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 2);
    }

    #[test]
    fn test_first_fit_not_best_fit() {
        // Frames at 10:00 and 10:06 both accept 10:04; the older one wins
        // even though 10:06 is closer.
        let tags = vec![
            tag(1, "A", &[at(10, 0, 0), at(10, 6, 0)]),
            tag(2, "B", &[at(10, 4, 0)]),
        ];
        let frames = build_frames(&tags, AlignmentWindow::default());
        assert_eq!(frames.len(), 2);
        assert_eq!(names(&frames[0]), vec!["B", "A"]);
        assert_eq!(names(&frames[1]), vec!["A"]);
    }

    #[test]
    fn test_matched_values_inserted_at_front() {
        let tags = vec![
            tag(1, "A", &[at(10, 0, 0)]),
            tag(2, "B", &[at(10, 1, 0)]),
            tag(3, "C", &[at(10, 2, 0)]),
        ];
        let frames = build_frames(&tags, AlignmentWindow::default());
        assert_eq!(names(&frames[0]), vec!["C", "B", "A"]);
    }

    #[test]
    fn test_frames_keep_discovery_order() {
        let tags = vec![tag(1, "A", &[at(11, 0, 0)]), tag(2, "B", &[at(10, 0, 0)])];
        let mut frames = build_frames(&tags, AlignmentWindow::default());
        assert_eq!(frames[0].timestamp(), at(11, 0, 0));

        sort_chronologically(&mut frames);
        assert_eq!(frames[0].timestamp(), at(10, 0, 0));
        assert_eq!(frames[1].timestamp(), at(11, 0, 0));
    }

    #[test]
    fn test_empty_inputs() {
        assert!(build_frames(&[], AlignmentWindow::default()).is_empty());
        let tags = vec![tag(1, "A", &[])];
        assert!(build_frames(&tags, AlignmentWindow::default()).is_empty());
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let tags = vec![
            tag(1, "A", &[at(10, 0, 0), at(10, 30, 0)]),
            tag(2, "B", &[at(10, 2, 0)]),
        ];
        let first = build_frames(&tags, AlignmentWindow::default());
        let second = build_frames(&tags, AlignmentWindow::default());
        assert_eq!(first, second);
        let total: usize = second.iter().map(Frame::len).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_place_returns_frame_index() {
        let mut builder = FrameBuilder::new(AlignmentWindow::default());
        let a = tag(1, "A", &[at(10, 0, 0), at(12, 0, 0), at(10, 1, 0)]);
        let indices: Vec<usize> = a.values.iter().map(|v| builder.place(v.clone())).collect();
        assert_eq!(indices, vec![0, 1, 0]);
    }

    #[test]
    fn test_window_from_secs_overflow() {
        assert!(AlignmentWindow::from_secs(u64::MAX).is_err());
        assert_eq!(
            AlignmentWindow::from_secs(60).unwrap().duration(),
            TimeDelta::seconds(60)
        );
    }

    #[test]
    fn test_frame_serializes_anchor_and_values() {
        let frames = build_frames(&[tag(1, "A", &[at(10, 0, 0)])], AlignmentWindow::default());
        let json = serde_json::to_value(&frames[0]).unwrap();
        assert!(
            json["timestamp"]
                .as_str()
                .unwrap()
                .starts_with("2024-01-01T10:00:00")
        );
        assert_eq!(json["tag_values"][0]["tag"]["name"], "A");
    }

    fn arb_tags() -> impl Strategy<Value = Vec<Tag>> {
        // Up to 5 tags with up to 20 values each, spread over 2 hours.
        prop::collection::vec(prop::collection::vec(0i64..7200, 0..20), 0..5).prop_map(|tags| {
            let base = at(8, 0, 0);
            tags.into_iter()
                .enumerate()
                .map(|(i, offsets)| {
                    let times: Vec<_> = offsets
                        .into_iter()
                        .map(|s| base + TimeDelta::seconds(s))
                        .collect();
                    tag(i as i64, &format!("T{i}"), &times)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_every_value_within_window_of_anchor(tags in arb_tags(), window_secs in 0u64..900) {
            let window = AlignmentWindow::from_secs(window_secs).unwrap();
            for frame in build_frames(&tags, window) {
                for value in frame.values() {
                    prop_assert!(window.matches(frame.timestamp(), value.timestamp()));
                }
            }
        }

        #[test]
        fn prop_partition_preserves_every_value(tags in arb_tags()) {
            let frames = build_frames(&tags, AlignmentWindow::default());
            let placed: usize = frames.iter().map(Frame::len).sum();
            let total: usize = tags.iter().map(Tag::value_count).sum();
            prop_assert_eq!(placed, total);
            prop_assert!(frames.iter().all(|f| !f.is_empty()));
        }

        #[test]
        fn prop_frame_count_monotonic(tags in arb_tags()) {
            let mut builder = FrameBuilder::new(AlignmentWindow::default());
            let mut last = 0;
            for tag in &tags {
                for value in &tag.values {
                    builder.place(value.clone());
                    let count = builder.frames().len();
                    prop_assert!(count >= last);
                    prop_assert!(count <= last + 1);
                    last = count;
                }
            }
        }

        #[test]
        fn prop_anchors_never_move(tags in arb_tags()) {
            let mut builder = FrameBuilder::new(AlignmentWindow::default());
            let mut anchors: Vec<DateTime<Tz>> = Vec::new();
            for tag in &tags {
                for value in &tag.values {
                    builder.place(value.clone());
                    let current: Vec<_> = builder.frames().iter().map(Frame::timestamp).collect();
                    prop_assert_eq!(&current[..anchors.len()], &anchors[..]);
                    anchors = current;
                }
            }
        }
    }
}
