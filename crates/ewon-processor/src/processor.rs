//! Uplink processing: sync the gateway, align frames, publish, and persist
//! the resume point.
//!
//! The cursor written to the command channel always trails what has been
//! published: it is stored only after every frame of a batch was pushed. A
//! failed sync publishes nothing and leaves the stored cursor alone, so the
//! next run retries from the same point.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, error, info};

use ewon_core::{AlignmentWindow, DataExchange, Ewon, SyncOutcome, TransactionId, sort_chronologically};

use crate::channel::{ChannelError, CommandChannel, StatePublisher};
use crate::ui::{UiElement, UiSettings, construct_ui};

/// Kind of message the processor was invoked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Deploy,
    Downlink,
    Uplink,
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEPLOY" => Ok(MessageType::Deploy),
            "DOWNLINK" => Ok(MessageType::Downlink),
            "UPLINK" => Ok(MessageType::Uplink),
            other => Err(format!("unknown message type '{}'", other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Deploy => f.write_str("DEPLOY"),
            MessageType::Downlink => f.write_str("DOWNLINK"),
            MessageType::Uplink => f.write_str("UPLINK"),
        }
    }
}

/// Processor errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProcessorError {
    #[error(transparent)]
    Device(#[from] ewon_core::Error),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Outcome of one uplink cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    /// Sync calls made.
    pub batches: u32,
    pub frames_published: usize,
    pub values_published: usize,
    /// Cursor stored at the end of the cycle.
    pub cursor: Option<TransactionId>,
    /// The last sync returned no device data.
    pub no_data: bool,
}

/// Tuning for an uplink cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessorOptions {
    pub window: AlignmentWindow,
    /// Sync calls per cycle while the server reports more data.
    pub max_batches: u32,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            window: AlignmentWindow::default(),
            max_batches: 1,
        }
    }
}

/// Drives one gateway through deploy and uplink messages.
pub struct Processor<C, P, K> {
    ewon: Ewon<C>,
    publisher: P,
    commands: K,
    ui: UiSettings,
    options: ProcessorOptions,
}

impl<C, P, K> Processor<C, P, K>
where
    C: DataExchange,
    P: StatePublisher,
    K: CommandChannel,
{
    pub fn new(ewon: Ewon<C>, publisher: P, commands: K, ui: UiSettings) -> Self {
        Self {
            ewon,
            publisher,
            commands,
            ui,
            options: ProcessorOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ProcessorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn ewon(&self) -> &Ewon<C> {
        &self.ewon
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn commands(&self) -> &K {
        &self.commands
    }

    /// Route a message. Downlinks are accepted and ignored.
    pub async fn handle(&mut self, message: MessageType) -> Result<Option<CycleReport>, ProcessorError> {
        debug!("Handling {} message", message);
        match message {
            MessageType::Deploy => self.on_deploy().await.map(Some),
            MessageType::Downlink => Ok(None),
            MessageType::Uplink => self.run_cycle().await.map(Some),
        }
    }

    /// Build the UI element tree from the current device snapshot.
    ///
    /// Fetches the snapshot first if none is loaded.
    pub async fn build_ui(&mut self) -> Result<Vec<UiElement>, ProcessorError> {
        if self.ewon.tags().is_empty() {
            self.ewon.refresh().await?;
        }
        Ok(construct_ui(&self.ui, self.ewon.tags()))
    }

    /// Push the UI tree once, then run an uplink.
    pub async fn on_deploy(&mut self) -> Result<CycleReport, ProcessorError> {
        let elements = self.build_ui().await?;
        info!(device_id = self.ewon.id(), elements = elements.len(), "Publishing UI");
        self.publisher.publish_ui(&elements).await?;
        self.run_cycle().await
    }

    /// Run one uplink cycle.
    ///
    /// Each sync batch is published frame by frame in chronological order
    /// and only then is its cursor stored. A batch with no device data
    /// still stores the cursor the server returned. An unchanged cursor is
    /// not rewritten.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, ProcessorError> {
        let mut stored = self.commands.read_cursor().await?;
        self.ewon.set_last_transaction_id(stored.clone());

        let mut report = CycleReport {
            cursor: stored.clone(),
            ..Default::default()
        };
        for _ in 0..self.options.max_batches.max(1) {
            report.batches += 1;
            let outcome = self.ewon.sync(None).await?;

            let more = match outcome {
                SyncOutcome::NoData => {
                    report.no_data = true;
                    false
                }
                SyncOutcome::Updated {
                    more_data_available,
                } => {
                    report.no_data = false;
                    let (frames, values) = self.publish_frames().await?;
                    report.frames_published += frames;
                    report.values_published += values;
                    more_data_available
                }
            };

            self.store_cursor(&mut stored).await?;
            report.cursor = stored.clone();
            if !more {
                break;
            }
        }

        info!(
            device_id = self.ewon.id(),
            batches = report.batches,
            frames = report.frames_published,
            values = report.values_published,
            "Uplink complete"
        );
        Ok(report)
    }

    async fn publish_frames(&mut self) -> Result<(usize, usize), ProcessorError> {
        let mut frames = self.ewon.build_frames(self.options.window).to_vec();
        sort_chronologically(&mut frames);

        let mut values = 0;
        for frame in &frames {
            // Newest insert comes first; older readings of the same tag are shadowed.
            let mut staged = HashSet::new();
            for value in frame.values() {
                if !staged.insert(value.tag_name()) {
                    continue;
                }
                if let Err(e) = self
                    .publisher
                    .update_variable(value.tag_name(), value.value())
                    .await
                {
                    self.log_publish_failure(frame.timestamp(), &e);
                    return Err(e.into());
                }
                values += 1;
            }
            if let Err(e) = self.publisher.push(true, frame.timestamp(), true).await {
                self.log_publish_failure(frame.timestamp(), &e);
                return Err(e.into());
            }
        }
        Ok((frames.len(), values))
    }

    fn log_publish_failure(&self, frame: DateTime<Tz>, e: &ChannelError) {
        error!(
            device_id = self.ewon.id(),
            frame = %frame,
            "Publish failed, cursor not stored: {}",
            e
        );
    }

    async fn store_cursor(&mut self, stored: &mut Option<TransactionId>) -> Result<(), ProcessorError> {
        let Some(cursor) = self.ewon.last_transaction_id() else {
            return Ok(());
        };
        if stored.as_ref() == Some(cursor) {
            debug!(device_id = self.ewon.id(), "Cursor unchanged, not stored");
            return Ok(());
        }
        self.commands.write_cursor(cursor).await?;
        *stored = Some(cursor.clone());
        Ok(())
    }
}
