//! Core types for Ewon tag data.

use core::fmt;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::clock::ClockZone;
use crate::error::{MalformedRecordError, ParseResult};
use crate::payload::{HistoryRecord, TagPayload};

/// Declared data type of a tag.
///
/// Unknown type names are kept verbatim in [`DataType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    /// Boolean tag.
    Bool,
    /// Floating point tag.
    Float,
    /// Signed integer tag.
    Integer,
    /// Unsigned 32-bit tag.
    DWord,
    /// Text tag.
    String,
    /// Any other type name reported upstream.
    Other(std::string::String),
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Other(std::string::String::new())
    }
}

impl From<&str> for DataType {
    fn from(value: &str) -> Self {
        match value {
            "Bool" => DataType::Bool,
            "Float" => DataType::Float,
            "Integer" => DataType::Integer,
            "DWord" => DataType::DWord,
            "String" => DataType::String,
            other => DataType::Other(other.to_string()),
        }
    }
}

impl From<std::string::String> for DataType {
    fn from(value: std::string::String) -> Self {
        DataType::from(value.as_str())
    }
}

impl From<DataType> for std::string::String {
    fn from(value: DataType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Bool => f.write_str("Bool"),
            DataType::Float => f.write_str("Float"),
            DataType::Integer => f.write_str("Integer"),
            DataType::DWord => f.write_str("DWord"),
            DataType::String => f.write_str("String"),
            DataType::Other(name) => f.write_str(name),
        }
    }
}

/// A decoded tag value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Null,
}

impl Value {
    /// Decode a raw JSON value according to the tag's declared type.
    ///
    /// Bool tags accept a fixed set of truthy encodings (`1`, `"1"`,
    /// `"True"`, `"true"`); every other input, including unexpected shapes,
    /// reads as `false`. Float tags widen integers to floats. All other
    /// values pass through as decoded. Arrays and objects are rejected.
    pub fn decode(data_type: &DataType, raw: &serde_json::Value, tag: &str) -> ParseResult<Self> {
        use serde_json::Value as Json;

        if *data_type == DataType::Bool {
            return Ok(Value::Bool(is_truthy(raw)));
        }

        match raw {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) if *data_type == DataType::Float => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| invalid_value(tag, raw)),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Integer(i)),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| invalid_value(tag, raw)),
            },
            Json::String(s) => Ok(Value::Text(s.clone())),
            Json::Array(_) | Json::Object(_) => Err(invalid_value(tag, raw)),
        }
    }

    /// The value as JSON, for publishing.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Null => serde_json::Value::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Null => f.write_str("null"),
        }
    }
}

fn is_truthy(raw: &serde_json::Value) -> bool {
    match raw {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64() == Some(1.0),
        serde_json::Value::String(s) => matches!(s.as_str(), "1" | "True" | "true"),
        _ => false,
    }
}

fn invalid_value(tag: &str, raw: &serde_json::Value) -> MalformedRecordError {
    MalformedRecordError::InvalidValue {
        tag: tag.to_string(),
        raw: raw.to_string(),
    }
}

/// Identity of the tag a value belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagRef {
    pub id: i64,
    pub name: String,
}

/// One immutable reading of a tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagValue {
    tag: TagRef,
    value: Value,
    timestamp: DateTime<Tz>,
}

impl TagValue {
    /// Create a value directly.
    pub fn new(tag: TagRef, value: Value, timestamp: DateTime<Tz>) -> Self {
        Self {
            tag,
            value,
            timestamp,
        }
    }

    /// Build a value from an upstream history record.
    ///
    /// The record's timestamp is parsed as ISO-8601 and relabelled with
    /// `zone`; any offset embedded in the string is discarded.
    pub fn from_record(
        tag: &TagRef,
        data_type: &DataType,
        record: &HistoryRecord,
        zone: ClockZone,
    ) -> ParseResult<Self> {
        let raw_date = record
            .date
            .as_deref()
            .ok_or_else(|| MalformedRecordError::MissingTimestamp {
                tag: tag.name.clone(),
            })?;

        let timestamp =
            zone.parse_timestamp(raw_date)
                .map_err(|e| MalformedRecordError::InvalidTimestamp {
                    tag: tag.name.clone(),
                    raw: raw_date.to_string(),
                    reason: e.to_string(),
                })?;

        let value = Value::decode(data_type, &record.value, &tag.name)?;

        Ok(Self {
            tag: tag.clone(),
            value,
            timestamp,
        })
    }

    pub fn tag(&self) -> &TagRef {
        &self.tag
    }

    pub fn tag_name(&self) -> &str {
        &self.tag.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn timestamp(&self) -> DateTime<Tz> {
        self.timestamp
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={} @ {}",
            self.tag.name,
            self.value,
            self.timestamp.to_rfc3339()
        )
    }
}

/// A named data stream on a device, with the values fetched in one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub data_type: DataType,
    /// Description with trailing whitespace removed.
    pub description: Option<String>,
    /// Values in upstream order (normally chronological).
    pub values: Vec<TagValue>,
}

impl Tag {
    /// Build a tag from its upstream payload.
    ///
    /// Records that cannot be parsed are left out of [`Tag::values`] and
    /// returned alongside so the caller can report them.
    pub fn from_payload(payload: &TagPayload, zone: ClockZone) -> (Self, Vec<MalformedRecordError>) {
        let tag_ref = TagRef {
            id: payload.id,
            name: payload.name.clone(),
        };

        let mut values = Vec::with_capacity(payload.history.len());
        let mut rejected = Vec::new();
        for record in &payload.history {
            match TagValue::from_record(&tag_ref, &payload.data_type, record, zone) {
                Ok(value) => values.push(value),
                Err(e) => rejected.push(e),
            }
        }

        let tag = Self {
            id: payload.id,
            name: payload.name.clone(),
            data_type: payload.data_type.clone(),
            description: payload
                .description
                .as_deref()
                .map(|d| d.trim_end().to_string()),
            values,
        };
        (tag, rejected)
    }

    pub fn tag_ref(&self) -> TagRef {
        TagRef {
            id: self.id,
            name: self.name.clone(),
        }
    }

    /// Number of values held by this tag.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Most recent value by timestamp, if any.
    pub fn latest(&self) -> Option<&TagValue> {
        self.values.iter().max_by_key(|v| v.timestamp())
    }
}
