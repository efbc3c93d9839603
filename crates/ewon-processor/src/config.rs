//! Processor configuration.
//!
//! Configuration is read from a TOML file and then overlaid with the
//! environment keys the processor has always been deployed with
//! (`DM_TOKEN`, `DEVELOPER_ID`, `EWON_ID`, `EWON_NAME`, `EWON_CLOCK_TZ`,
//! `EWON_UI_SETTINGS`).
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
//! [frames]
//! window_secs = 300
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ewon_core::datamailbox::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
use ewon_core::frames::DEFAULT_WINDOW_SECS;
use ewon_core::{AlignmentWindow, ClockZone, Credentials};

use crate::ui::UiSettings;

/// Environment keys read by [`Config::apply_env`].
pub const ENV_TOKEN: &str = "DM_TOKEN";
pub const ENV_DEVELOPER_ID: &str = "DEVELOPER_ID";
pub const ENV_EWON_ID: &str = "EWON_ID";
pub const ENV_EWON_NAME: &str = "EWON_NAME";
pub const ENV_CLOCK_TZ: &str = "EWON_CLOCK_TZ";
pub const ENV_UI_SETTINGS: &str = "EWON_UI_SETTINGS";

/// Largest accepted alignment window (one day).
pub const MAX_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Processor configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_mailbox: DataMailboxConfig,
    pub ewon: EwonConfig,
    pub frames: FramesConfig,
    pub sync: SyncConfig,
    pub output: OutputConfig,
    pub ui: UiSettings,
}

impl Config {
    /// Load configuration from the default path, or defaults if absent.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Overlay the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`, keyed by the environment key names.
    ///
    /// Empty values are ignored. Values that cannot be parsed are reported
    /// together as a validation error.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut errors = Vec::new();

        if let Some(token) = get(ENV_TOKEN) {
            self.data_mailbox.token = token;
        }
        if let Some(developer_id) = get(ENV_DEVELOPER_ID) {
            self.data_mailbox.developer_id = developer_id;
        }
        if let Some(raw) = get(ENV_EWON_ID) {
            match raw.trim().parse::<i64>() {
                Ok(id) => self.ewon.id = Some(id),
                Err(_) => errors.push(ValidationError {
                    field: "ewon.id".to_string(),
                    message: format!("{} '{}' is not an integer", ENV_EWON_ID, raw),
                }),
            }
        }
        if let Some(name) = get(ENV_EWON_NAME) {
            self.ewon.name = Some(name);
        }
        if let Some(tz) = get(ENV_CLOCK_TZ) {
            self.ewon.clock_tz = tz;
        }
        if let Some(json) = get(ENV_UI_SETTINGS) {
            match UiSettings::from_json(&json) {
                Ok(ui) => self.ui = ui,
                Err(e) => errors.push(ValidationError {
                    field: "ui".to_string(),
                    message: format!("{} is not valid UI settings JSON: {}", ENV_UI_SETTINGS, e),
                }),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Data Mailbox credentials are present
    /// - The base URL is http(s) and the timeout is non-zero
    /// - The alignment window is between 1 second and 1 day
    /// - At least one sync batch is allowed per run
    /// - Output paths are not empty
    ///
    /// The device id is checked separately by [`Config::ewon_id`] since
    /// account-level commands do not need it. An unknown clock zone is not
    /// an error; it falls back to UTC when used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.data_mailbox.validate());
        errors.extend(self.frames.validate());
        errors.extend(self.sync.validate());
        errors.extend(self.output.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// The configured device id.
    pub fn ewon_id(&self) -> Result<i64, ConfigError> {
        self.ewon.id.ok_or_else(|| {
            ConfigError::Validation(vec![ValidationError {
                field: "ewon.id".to_string(),
                message: format!("device id is required (set it in [ewon] or {})", ENV_EWON_ID),
            }])
        })
    }

    /// Load, overlay the environment and validate.
    pub fn load_validated(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::load_default()?,
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }
}

/// Data Mailbox account settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataMailboxConfig {
    pub token: String,
    pub developer_id: String,
    /// Talk2M account name; only sent when set.
    pub account: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for DataMailboxConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            developer_id: String::new(),
            account: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl std::fmt::Debug for DataMailboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataMailboxConfig")
            .field("token", &"<redacted>")
            .field("developer_id", &self.developer_id)
            .field("account", &self.account)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl DataMailboxConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.token.is_empty() {
            errors.push(ValidationError {
                field: "data_mailbox.token".to_string(),
                message: format!("token cannot be empty (set it or {})", ENV_TOKEN),
            });
        }
        if self.developer_id.is_empty() {
            errors.push(ValidationError {
                field: "data_mailbox.developer_id".to_string(),
                message: format!("developer id cannot be empty (set it or {})", ENV_DEVELOPER_ID),
            });
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            errors.push(ValidationError {
                field: "data_mailbox.base_url".to_string(),
                message: format!(
                    "invalid URL '{}': must start with http:// or https://",
                    self.base_url
                ),
            });
        }
        if self.timeout_secs == 0 {
            errors.push(ValidationError {
                field: "data_mailbox.timeout_secs".to_string(),
                message: "timeout cannot be 0".to_string(),
            });
        }
        if let Some(account) = &self.account
            && account.is_empty()
        {
            errors.push(ValidationError {
                field: "data_mailbox.account".to_string(),
                message: "account cannot be empty string (use null/omit instead)".to_string(),
            });
        }

        errors
    }

    pub fn credentials(&self) -> Credentials {
        let credentials = Credentials::new(&self.token, &self.developer_id);
        match &self.account {
            Some(account) => credentials.with_account(account),
            None => credentials,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Gateway identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EwonConfig {
    pub id: Option<i64>,
    pub name: Option<String>,
    /// IANA name of the gateway's clock zone.
    pub clock_tz: String,
}

impl Default for EwonConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            clock_tz: "UTC".to_string(),
        }
    }
}

impl EwonConfig {
    /// The clock zone, falling back to UTC with a warning when unknown.
    pub fn clock_zone(&self) -> ClockZone {
        ClockZone::parse_or_utc(&self.clock_tz)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramesConfig {
    pub window_secs: u64,
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

impl FramesConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.window_secs == 0 {
            errors.push(ValidationError {
                field: "frames.window_secs".to_string(),
                message: "alignment window cannot be 0".to_string(),
            });
        } else if self.window_secs > MAX_WINDOW_SECS {
            errors.push(ValidationError {
                field: "frames.window_secs".to_string(),
                message: format!(
                    "alignment window {} is too long (maximum {} seconds / 1 day)",
                    self.window_secs, MAX_WINDOW_SECS
                ),
            });
        }
        errors
    }

    pub fn window(&self) -> Result<AlignmentWindow, ConfigError> {
        AlignmentWindow::from_secs(self.window_secs).map_err(|e| {
            ConfigError::Validation(vec![ValidationError {
                field: "frames.window_secs".to_string(),
                message: e.to_string(),
            }])
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Sync calls per run while the server reports more data.
    pub max_batches: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { max_batches: 1 }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        if self.max_batches == 0 {
            vec![ValidationError {
                field: "sync.max_batches".to_string(),
                message: "at least one batch per run is required".to_string(),
            }]
        } else {
            Vec::new()
        }
    }
}

/// Where the binary writes state records and the sync cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub state_path: PathBuf,
    pub cmds_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        let dir = default_data_dir();
        Self {
            state_path: dir.join("ui_state.jsonl"),
            cmds_path: dir.join("ui_cmds.json"),
        }
    }
}

impl OutputConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.state_path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "output.state_path".to_string(),
                message: "state path cannot be empty".to_string(),
            });
        }
        if self.cmds_path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "output.cmds_path".to_string(),
                message: "command path cannot be empty".to_string(),
            });
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The field path (e.g., `ewon.id` or `data_mailbox.token`).
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ewon-processor")
        .join("config.toml")
}

/// Default directory for state and command files.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ewon-processor")
}
