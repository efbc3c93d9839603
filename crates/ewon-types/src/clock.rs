//! Device clock timezone handling.
//!
//! Ewon gateways report history timestamps in the wall-clock time of the
//! device. Whatever offset the upstream string carries is discarded and the
//! configured zone is attached to the naive wall-clock reading instead. This
//! is a relabel, not a conversion: `10:00:00+02:00` with a zone of
//! `America/Chicago` becomes `10:00:00` Chicago time.

use core::fmt;

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeDelta, TimeZone};
use chrono_tz::Tz;
use tracing::warn;

/// Timezone configured for a device's clock.
///
/// Defaults to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockZone(Tz);

impl Default for ClockZone {
    fn default() -> Self {
        Self::UTC
    }
}

impl ClockZone {
    /// The UTC clock zone.
    pub const UTC: ClockZone = ClockZone(Tz::UTC);

    /// Wrap an IANA zone.
    pub fn new(tz: Tz) -> Self {
        Self(tz)
    }

    /// Parse an IANA zone name, returning `None` when it is unknown.
    pub fn try_parse(name: &str) -> Option<Self> {
        name.trim().parse::<Tz>().ok().map(Self)
    }

    /// Parse an IANA zone name, falling back to UTC with a warning.
    ///
    /// An invalid zone is a configuration mistake, not a reason to stop
    /// ingesting data.
    ///
    /// ```
    /// use ewon_types::ClockZone;
    ///
    /// assert_eq!(ClockZone::parse_or_utc("Europe/Brussels").name(), "Europe/Brussels");
    /// assert_eq!(ClockZone::parse_or_utc("Mars/Olympus"), ClockZone::UTC);
    /// ```
    pub fn parse_or_utc(name: &str) -> Self {
        match name.trim().parse::<Tz>() {
            Ok(tz) => Self(tz),
            Err(err) => {
                warn!(zone = name, "Invalid clock timezone, falling back to UTC: {}", err);
                Self::UTC
            }
        }
    }

    /// The wrapped zone.
    pub fn tz(&self) -> Tz {
        self.0
    }

    /// IANA name of the zone.
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Attach this zone to a naive wall-clock time.
    ///
    /// Ambiguous wall times (clocks falling back) resolve to the earlier
    /// instant. Wall times inside a gap (clocks springing forward) are
    /// interpreted with the offset in force just before the transition.
    pub fn relabel(&self, naive: NaiveDateTime) -> DateTime<Tz> {
        match self.0.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(earliest, _) => earliest,
            LocalResult::None => {
                let before = self
                    .0
                    .offset_from_utc_datetime(&(naive - TimeDelta::days(1)))
                    .fix();
                let utc = naive - TimeDelta::seconds(i64::from(before.local_minus_utc()));
                self.0.from_utc_datetime(&utc)
            }
        }
    }

    /// Parse an ISO-8601 string and relabel it with this zone.
    pub fn parse_timestamp(&self, raw: &str) -> Result<DateTime<Tz>, chrono::ParseError> {
        parse_wall_clock(raw).map(|naive| self.relabel(naive))
    }
}

impl fmt::Display for ClockZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parse an ISO-8601 timestamp into its wall-clock part.
///
/// Accepts RFC 3339 strings, offsets without a colon, naive date-times
/// separated by `T` or a space, and bare dates (midnight).
pub fn parse_wall_clock(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(dt.naive_local());
    }

    const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive);
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map(|date| date.and_time(chrono::NaiveTime::MIN))
}
