//! Tag history range queries.
//!
//! The Data Mailbox `getdata` endpoint returns the stored history of one tag
//! between two optional bounds. Bounds can be given as an instant, as Unix
//! epoch seconds, or as an ISO-8601 string; all are normalised to ISO-8601
//! before being sent.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};

use crate::datamailbox::ClientError;

/// One end of a history range.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeBound {
    /// An absolute instant.
    Instant(DateTime<FixedOffset>),
    /// Seconds since the Unix epoch (UTC).
    EpochSeconds(i64),
    /// An ISO-8601 string, validated before use.
    Iso(String),
}

impl TimeBound {
    /// Render the bound as an ISO-8601 string.
    ///
    /// ```
    /// use ewon_core::history::TimeBound;
    ///
    /// let bound = TimeBound::EpochSeconds(0);
    /// assert_eq!(bound.to_iso_string().unwrap(), "1970-01-01T00:00:00+00:00");
    /// ```
    pub fn to_iso_string(&self) -> Result<String, ClientError> {
        match self {
            TimeBound::Instant(dt) => Ok(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
            TimeBound::EpochSeconds(secs) => DateTime::<Utc>::from_timestamp(*secs, 0)
                .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, false))
                .ok_or_else(|| ClientError::InvalidTimeBound(secs.to_string())),
            TimeBound::Iso(raw) => {
                if let Ok(dt) = DateTime::parse_from_rfc3339(raw.trim()) {
                    return Ok(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false));
                }
                ewon_types::clock::parse_wall_clock(raw)
                    .map(|naive| naive.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
                    .map_err(|_| ClientError::InvalidTimeBound(raw.clone()))
            }
        }
    }
}

impl From<DateTime<Utc>> for TimeBound {
    fn from(value: DateTime<Utc>) -> Self {
        TimeBound::Instant(value.fixed_offset())
    }
}

impl From<DateTime<FixedOffset>> for TimeBound {
    fn from(value: DateTime<FixedOffset>) -> Self {
        TimeBound::Instant(value)
    }
}

impl From<i64> for TimeBound {
    fn from(value: i64) -> Self {
        TimeBound::EpochSeconds(value)
    }
}

impl From<&str> for TimeBound {
    fn from(value: &str) -> Self {
        TimeBound::Iso(value.to_string())
    }
}

/// Parameters of a `getdata` request.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub ewon_id: i64,
    pub tag_id: i64,
    pub from: Option<TimeBound>,
    pub to: Option<TimeBound>,
    pub limit: Option<u32>,
}

impl HistoryQuery {
    /// Query the whole stored history of one tag.
    pub fn new(ewon_id: i64, tag_id: i64) -> Self {
        Self {
            ewon_id,
            tag_id,
            from: None,
            to: None,
            limit: None,
        }
    }

    /// Set the lower bound.
    #[must_use]
    pub fn from(mut self, bound: impl Into<TimeBound>) -> Self {
        self.from = Some(bound.into());
        self
    }

    /// Set the upper bound.
    #[must_use]
    pub fn to(mut self, bound: impl Into<TimeBound>) -> Self {
        self.to = Some(bound.into());
        self
    }

    /// Limit the number of records returned.
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Form parameters for the request.
    pub fn to_params(&self) -> Result<Vec<(&'static str, String)>, ClientError> {
        let mut params = vec![
            ("ewonId", self.ewon_id.to_string()),
            ("tagId", self.tag_id.to_string()),
        ];
        if let Some(from) = &self.from {
            params.push(("from", from.to_iso_string()?));
        }
        if let Some(to) = &self.to {
            params.push(("to", to.to_iso_string()?));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        Ok(params)
    }
}
