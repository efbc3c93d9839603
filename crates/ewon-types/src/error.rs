//! Error types for record parsing in ewon-types.

use thiserror::Error;

/// A single upstream history record could not be turned into a tag value.
///
/// These errors are isolated per record: the caller drops the record and
/// keeps processing the rest of the tag.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum MalformedRecordError {
    /// The `date` field was absent or null.
    #[error("record for tag '{tag}' has no timestamp")]
    MissingTimestamp {
        /// Name of the tag the record belongs to.
        tag: String,
    },

    /// The `date` field was not a valid ISO-8601 timestamp.
    #[error("record for tag '{tag}' has unparseable timestamp '{raw}': {reason}")]
    InvalidTimestamp {
        /// Name of the tag the record belongs to.
        tag: String,
        /// The raw string received from upstream.
        raw: String,
        /// Parser message.
        reason: String,
    },

    /// The `value` field had a shape that cannot be represented.
    #[error("record for tag '{tag}' has unsupported value: {raw}")]
    InvalidValue {
        /// Name of the tag the record belongs to.
        tag: String,
        /// The raw JSON value, rendered.
        raw: String,
    },
}

impl MalformedRecordError {
    /// Name of the tag whose record was rejected.
    pub fn tag(&self) -> &str {
        match self {
            Self::MissingTimestamp { tag }
            | Self::InvalidTimestamp { tag, .. }
            | Self::InvalidValue { tag, .. } => tag,
        }
    }
}

/// Result type alias for record parsing.
pub type ParseResult<T> = std::result::Result<T, MalformedRecordError>;
