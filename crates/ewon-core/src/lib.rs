//! Core library for reading Ewon gateways through the Talk2M Data Mailbox.
//!
//! This crate talks to the Data Mailbox, keeps the resumable transaction
//! cursor for a device, and aligns tag readings from independent streams
//! into time frames.
//!
//! # Features
//!
//! - **Data Mailbox client**: status, device listing, snapshots, history and
//!   incremental sync over HTTPS
//! - **Resumable sync**: the transaction cursor only advances on success
//! - **Frame alignment**: first-fit grouping of readings within a window
//! - **Mock client**: scripted responses and failure injection for tests
//!
//! # Quick Start
//!
//! ```no_run
//! use ewon_core::{AlignmentWindow, Credentials, DataMailboxClient, Ewon};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = DataMailboxClient::new(Credentials::new("token", "dev-id"))?;
//!     let mut ewon = Ewon::new(client, 81234);
//!     ewon.set_clock_zone("Europe/Brussels");
//!
//!     ewon.sync(None).await?;
//!     for frame in ewon.build_frames(AlignmentWindow::default()) {
//!         println!("{} ({} values)", frame.timestamp(), frame.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod datamailbox;
pub mod device;
pub mod error;
pub mod frames;
pub mod history;
pub mod mock;
pub mod sync;
pub mod traits;

pub use datamailbox::{ClientError, Credentials, DataMailboxClient};
pub use device::{Ewon, EwonSummary, SyncOutcome, TagKey};
pub use error::{Error, Result};
pub use frames::{AlignmentWindow, Frame, FrameBuilder, build_frames, sort_chronologically};
pub use history::{HistoryQuery, TimeBound};
pub use mock::{MockDataExchange, SyncCall};
pub use sync::{SyncBatch, resolve_create_transaction};
pub use traits::DataExchange;

// Re-export the shared types so downstream crates need a single dependency.
pub use ewon_types::{
    ClockZone, DataType, DevicePayload, DeviceSummary, MailboxStatus, MalformedRecordError, Tag,
    TagRef, TagValue, TransactionId, Value,
};
