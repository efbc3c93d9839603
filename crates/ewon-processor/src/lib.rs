//! Uplink processor for Ewon gateways.
//!
//! This crate turns the tag history of one Ewon gateway into a stream of
//! time-aligned state records:
//! - Syncs new data from the Talk2M Data Mailbox, resuming from the stored
//!   transaction cursor
//! - Groups readings into frames and publishes one state record per frame
//! - Stores the new cursor once every frame has been published
//! - Builds the declarative UI element tree for the gateway's tags
//!
//! # Configuration
//!
//! The processor reads `~/.config/ewon-processor/config.toml` and overlays
//! the `DM_TOKEN`, `DEVELOPER_ID`, `EWON_ID`, `EWON_NAME`, `EWON_CLOCK_TZ`
//! and `EWON_UI_SETTINGS` environment keys:
//!
//! ```toml
//! [data_mailbox]
//! token = "..."
//! developer_id = "..."
//!
//! [ewon]
//! id = 81234
//! clock_tz = "Europe/Brussels"
//!
//! [output]
//! state_path = "/var/lib/ewon-processor/ui_state.jsonl"
//! cmds_path = "/var/lib/ewon-processor/ui_cmds.json"
//! ```

pub mod channel;
pub mod config;
pub mod processor;
pub mod ui;

pub use channel::{
    ChannelError, CommandChannel, FileCommandChannel, JsonLinesPublisher, MemoryCommandChannel,
    MemoryPublisher, StatePublisher, StateRecord,
};
pub use config::{Config, ConfigError, ValidationError};
pub use processor::{CycleReport, MessageType, Processor, ProcessorError, ProcessorOptions};
pub use ui::{UiElement, UiSettings, construct_ui};
