//! UI element construction from device tags.
//!
//! The element tree is built in two phases. [`partition_tags`] first splits
//! the device's tags into the explicitly configured, the excluded and the
//! remaining sets without touching the device's own tag list.
//! [`construct_ui`] then maps each set to elements.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ewon_types::{DataType, Tag};

/// Period of the gateway's upload schedule, in seconds.
pub const CONNECTION_PERIOD_SECS: u64 = 60 * 60;

/// Number of missed uploads before the gateway is shown as offline.
pub const CONNECTION_ALLOWED_MISSES: u32 = 6;

/// UI settings, read from `[ui]` or the `EWON_UI_SETTINGS` JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    /// Overview plot shown first, if configured.
    pub multiplot: Option<MultiplotSettings>,
    /// Tags with explicit display settings, in display order.
    pub tags: Vec<TagUiSettings>,
    /// Tag names that never get an element.
    pub exclude_tags: Vec<String>,
    /// Add an element for every tag that is neither configured nor excluded.
    pub auto_include: bool,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            multiplot: None,
            tags: Vec::new(),
            exclude_tags: Vec::new(),
            auto_include: true,
        }
    }
}

impl UiSettings {
    /// Parse settings from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiplotSettings {
    pub series: Vec<String>,
    #[serde(default)]
    pub default_active: Vec<bool>,
}

/// Display settings for one tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagUiSettings {
    pub tag_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub ranges: Option<serde_json::Value>,
    #[serde(default)]
    pub form: Option<String>,
    #[serde(default)]
    pub dec_precision: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Periodic,
    Constant,
}

/// A declarative UI element.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum UiElement {
    Multiplot {
        name: String,
        display_name: String,
        series: Vec<String>,
        series_active: Vec<bool>,
    },
    BooleanVariable {
        name: String,
        display_name: String,
    },
    NumericVariable {
        name: String,
        display_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        dec_precision: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ranges: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        form: Option<String>,
    },
    ConnectionInfo {
        name: String,
        display_name: String,
        connection_type: ConnectionType,
        connection_period: u64,
        next_connection: u64,
        allowed_misses: u32,
    },
}

impl UiElement {
    /// Element name; for variables this is the tag name state is published
    /// under.
    pub fn name(&self) -> &str {
        match self {
            UiElement::Multiplot { name, .. }
            | UiElement::BooleanVariable { name, .. }
            | UiElement::NumericVariable { name, .. }
            | UiElement::ConnectionInfo { name, .. } => name,
        }
    }

    fn connection_info() -> Self {
        UiElement::ConnectionInfo {
            name: "connectionInfo".to_string(),
            display_name: "Connection Info".to_string(),
            connection_type: ConnectionType::Periodic,
            connection_period: CONNECTION_PERIOD_SECS,
            next_connection: CONNECTION_PERIOD_SECS,
            allowed_misses: CONNECTION_ALLOWED_MISSES,
        }
    }
}

/// The device's tags split by how the UI treats them.
#[derive(Debug, Default)]
pub struct TagPartition<'a> {
    /// Configured tags found on the device, in configuration order.
    pub configured: Vec<(&'a TagUiSettings, &'a Tag)>,
    pub excluded: Vec<&'a Tag>,
    /// Tags neither configured nor excluded, in device order.
    pub remaining: Vec<&'a Tag>,
}

/// Split `tags` according to `settings`.
///
/// Configured or excluded names that do not exist on the device are
/// skipped with a warning.
pub fn partition_tags<'a>(settings: &'a UiSettings, tags: &'a [Tag]) -> TagPartition<'a> {
    let mut partition = TagPartition::default();
    let mut claimed = HashSet::new();

    for tag_settings in &settings.tags {
        match tags.iter().find(|t| t.name == tag_settings.tag_name) {
            Some(tag) => {
                claimed.insert(tag.id);
                partition.configured.push((tag_settings, tag));
            }
            None => warn!("Configured UI tag '{}' not found on device", tag_settings.tag_name),
        }
    }

    for name in &settings.exclude_tags {
        match tags.iter().find(|t| &t.name == name) {
            Some(tag) => {
                claimed.insert(tag.id);
                partition.excluded.push(tag);
            }
            None => warn!("Excluded UI tag '{}' not found on device", name),
        }
    }

    partition.remaining = tags.iter().filter(|t| !claimed.contains(&t.id)).collect();
    partition
}

/// Map a tag to its element. Only Bool and Float tags are displayed.
pub fn tag_to_element(settings: Option<&TagUiSettings>, tag: &Tag) -> Option<UiElement> {
    let name = settings.map_or_else(|| tag.name.clone(), |s| s.tag_name.clone());
    let display_name = settings
        .and_then(|s| s.display_name.clone())
        .or_else(|| tag.description.clone().filter(|d| !d.is_empty()))
        .unwrap_or_else(|| tag.name.clone());

    match tag.data_type {
        DataType::Bool => Some(UiElement::BooleanVariable { name, display_name }),
        DataType::Float => Some(UiElement::NumericVariable {
            name,
            display_name,
            dec_precision: settings.and_then(|s| s.dec_precision),
            ranges: settings.and_then(|s| s.ranges.clone()),
            form: settings.and_then(|s| s.form.clone()),
        }),
        _ => {
            debug!("No UI element for tag '{}' of type {}", tag.name, tag.data_type);
            None
        }
    }
}

/// Build the UI element tree for a device.
///
/// The multiplot comes first, then configured tags in configuration order.
/// With `auto_include` on, the remaining tags follow in device order and a
/// connection-info element closes the list; with it off, the list ends
/// after the configured tags.
pub fn construct_ui(settings: &UiSettings, tags: &[Tag]) -> Vec<UiElement> {
    let mut elements = Vec::new();

    if let Some(multiplot) = &settings.multiplot {
        elements.push(UiElement::Multiplot {
            name: "overviewPlot".to_string(),
            display_name: "Overview".to_string(),
            series: multiplot.series.clone(),
            series_active: multiplot.default_active.clone(),
        });
    }

    let partition = partition_tags(settings, tags);
    elements.extend(
        partition
            .configured
            .iter()
            .filter_map(|(tag_settings, tag)| tag_to_element(Some(tag_settings), tag)),
    );

    if !settings.auto_include {
        return elements;
    }

    elements.extend(
        partition
            .remaining
            .iter()
            .filter_map(|tag| tag_to_element(None, tag)),
    );
    elements.push(UiElement::connection_info());
    elements
}
