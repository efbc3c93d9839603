//! Downstream state and command channels.
//!
//! A [`StatePublisher`] receives one state record per frame: variable
//! updates are staged with [`update_variable`](StatePublisher::update_variable)
//! and flushed as a single timestamped record by
//! [`push`](StatePublisher::push). A [`CommandChannel`] holds the resume
//! point of the incremental sync under
//! `{"cmds": {"last_ewon_transaction_id": ..}}`.
//!
//! Two backends are provided: in-memory channels for tests and dry runs,
//! and file-backed channels used by the binary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use ewon_types::{TransactionId, Value};

use crate::ui::UiElement;

/// Channel errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ChannelError {
    #[error("Failed to publish: {0}")]
    Publish(String),
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid command document {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One flushed state record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateRecord {
    pub timestamp: DateTime<Tz>,
    pub record_log: bool,
    pub state: BTreeMap<String, Value>,
}

/// Sink for UI state updates.
#[async_trait]
pub trait StatePublisher: Send + Sync {
    /// Replace the UI element tree.
    async fn publish_ui(&mut self, elements: &[UiElement]) -> Result<(), ChannelError>;

    /// Stage one variable update for the next [`push`](Self::push).
    ///
    /// Staging the same name twice keeps the last value.
    async fn update_variable(&mut self, name: &str, value: &Value) -> Result<(), ChannelError>;

    /// Flush the staged updates as one record stamped with `timestamp`.
    ///
    /// With nothing staged, a record is only written when `even_if_empty`
    /// is set.
    async fn push(
        &mut self,
        record_log: bool,
        timestamp: DateTime<Tz>,
        even_if_empty: bool,
    ) -> Result<(), ChannelError>;
}

/// Store for the sync resume point.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn read_cursor(&self) -> Result<Option<TransactionId>, ChannelError>;

    async fn write_cursor(&mut self, cursor: &TransactionId) -> Result<(), ChannelError>;
}

/// Command document shape shared with the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandDocument {
    #[serde(default)]
    pub cmds: Commands,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commands {
    #[serde(default)]
    pub last_ewon_transaction_id: Option<TransactionId>,
}

// ==========================================================================
// In-memory channels
// ==========================================================================

/// State publisher that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    staged: BTreeMap<String, Value>,
    records: Vec<StateRecord>,
    ui: Option<Vec<UiElement>>,
    /// Fail the push after this many records have been written.
    fail_after: Option<usize>,
    fail_staging: bool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every push after the first `count` records fail.
    pub fn fail_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Make every variable update fail.
    pub fn fail_staging(mut self) -> Self {
        self.fail_staging = true;
        self
    }

    pub fn records(&self) -> &[StateRecord] {
        &self.records
    }

    pub fn ui(&self) -> Option<&[UiElement]> {
        self.ui.as_deref()
    }
}

#[async_trait]
impl StatePublisher for MemoryPublisher {
    async fn publish_ui(&mut self, elements: &[UiElement]) -> Result<(), ChannelError> {
        self.ui = Some(elements.to_vec());
        Ok(())
    }

    async fn update_variable(&mut self, name: &str, value: &Value) -> Result<(), ChannelError> {
        if self.fail_staging {
            return Err(ChannelError::Publish(format!("cannot stage {}", name)));
        }
        self.staged.insert(name.to_string(), value.clone());
        Ok(())
    }

    async fn push(
        &mut self,
        record_log: bool,
        timestamp: DateTime<Tz>,
        even_if_empty: bool,
    ) -> Result<(), ChannelError> {
        if self.fail_after.is_some_and(|n| self.records.len() >= n) {
            return Err(ChannelError::Publish("memory publisher closed".to_string()));
        }
        let state = std::mem::take(&mut self.staged);
        if state.is_empty() && !even_if_empty {
            return Ok(());
        }
        self.records.push(StateRecord {
            timestamp,
            record_log,
            state,
        });
        Ok(())
    }
}

/// Command channel that keeps the cursor in memory.
#[derive(Debug, Default)]
pub struct MemoryCommandChannel {
    cursor: Option<TransactionId>,
    writes: usize,
}

impl MemoryCommandChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cursor(cursor: impl Into<TransactionId>) -> Self {
        Self {
            cursor: Some(cursor.into()),
            writes: 0,
        }
    }

    pub fn cursor(&self) -> Option<&TransactionId> {
        self.cursor.as_ref()
    }

    /// Number of cursor writes so far.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

#[async_trait]
impl CommandChannel for MemoryCommandChannel {
    async fn read_cursor(&self) -> Result<Option<TransactionId>, ChannelError> {
        Ok(self.cursor.clone())
    }

    async fn write_cursor(&mut self, cursor: &TransactionId) -> Result<(), ChannelError> {
        self.cursor = Some(cursor.clone());
        self.writes += 1;
        Ok(())
    }
}

// ==========================================================================
// File-backed channels
// ==========================================================================

/// State publisher appending one JSON document per line.
///
/// UI trees are written as `{"ui": [..]}`; state records as
/// `{"timestamp": .., "record_log": .., "state": {..}}`.
#[derive(Debug)]
pub struct JsonLinesPublisher {
    path: PathBuf,
    staged: BTreeMap<String, Value>,
}

impl JsonLinesPublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            staged: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append_line(&self, line: String) -> Result<(), ChannelError> {
        let write_err = |source| ChannelError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(write_err)?;
        file.write_all(line.as_bytes()).await.map_err(write_err)?;
        file.write_all(b"\n").await.map_err(write_err)?;
        file.flush().await.map_err(write_err)
    }
}

#[async_trait]
impl StatePublisher for JsonLinesPublisher {
    async fn publish_ui(&mut self, elements: &[UiElement]) -> Result<(), ChannelError> {
        let line = serde_json::to_string(&serde_json::json!({ "ui": elements }))?;
        self.append_line(line).await
    }

    async fn update_variable(&mut self, name: &str, value: &Value) -> Result<(), ChannelError> {
        self.staged.insert(name.to_string(), value.clone());
        Ok(())
    }

    async fn push(
        &mut self,
        record_log: bool,
        timestamp: DateTime<Tz>,
        even_if_empty: bool,
    ) -> Result<(), ChannelError> {
        let state = std::mem::take(&mut self.staged);
        if state.is_empty() && !even_if_empty {
            return Ok(());
        }
        let record = StateRecord {
            timestamp,
            record_log,
            state,
        };
        let line = serde_json::to_string(&record)?;
        self.append_line(line).await?;
        debug!("Published state record at {}", timestamp);
        Ok(())
    }
}

/// Command channel persisted as a JSON file.
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash never leaves a half-written cursor behind. Keys other than
/// `cmds.last_ewon_transaction_id` are preserved.
#[derive(Debug, Clone)]
pub struct FileCommandChannel {
    path: PathBuf,
}

impl FileCommandChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Option<serde_json::Value>, ChannelError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ChannelError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| ChannelError::Parse {
                path: self.path.clone(),
                source,
            })
    }
}

#[async_trait]
impl CommandChannel for FileCommandChannel {
    async fn read_cursor(&self) -> Result<Option<TransactionId>, ChannelError> {
        let Some(document) = self.read_document().await? else {
            return Ok(None);
        };
        let document: CommandDocument =
            serde_json::from_value(document).map_err(|source| ChannelError::Parse {
                path: self.path.clone(),
                source,
            })?;
        Ok(document.cmds.last_ewon_transaction_id)
    }

    async fn write_cursor(&mut self, cursor: &TransactionId) -> Result<(), ChannelError> {
        let mut document = match self.read_document().await? {
            Some(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        let cmds = document
            .entry("cmds")
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if !cmds.is_object() {
            *cmds = serde_json::Value::Object(serde_json::Map::new());
        }
        if let serde_json::Value::Object(cmds) = cmds {
            cmds.insert(
                "last_ewon_transaction_id".to_string(),
                serde_json::to_value(cursor)?,
            );
        }

        let content = serde_json::to_string_pretty(&serde_json::Value::Object(document))?;
        let write_err = |source| ChannelError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;

        debug!("Stored cursor {} in {}", cursor, self.path.display());
        Ok(())
    }
}
