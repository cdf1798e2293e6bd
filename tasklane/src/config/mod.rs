//! Configuration system for the `tasklane` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/tasklane/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use tasklane_proto::Filter;
use tasklane_proto::document::DEFAULT_PLACEHOLDER_TITLE;
use tasklane_proto::task::MAX_TASK_TITLE_LENGTH;

use crate::sync::SyncConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The timestamp format contains a specifier chrono cannot render.
    #[error("invalid timestamp format {0:?}")]
    InvalidTimestampFormat(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    identity: IdentityFileConfig,
    store: StoreFileConfig,
    sync: SyncFileConfig,
    ui: UiFileConfig,
}

/// `[identity]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct IdentityFileConfig {
    principal: Option<String>,
    session_file: Option<PathBuf>,
}

/// `[store]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StoreFileConfig {
    data_file: Option<PathBuf>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    op_timeout_ms: Option<u64>,
    ready_timeout_ms: Option<u64>,
    max_title_len: Option<usize>,
    placeholder_title: Option<String>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Identity --
    /// Principal to sign in as. `None` resumes or starts an anonymous session.
    pub principal: Option<String>,
    /// File holding the anonymous session's principal id.
    pub session_file: PathBuf,

    // -- Store --
    /// Backing file of the local document store.
    pub data_file: PathBuf,

    // -- Sync --
    /// Upper bound on each remote mutation.
    pub op_timeout: Duration,
    /// How long a command waits for the first snapshot.
    pub ready_timeout: Duration,
    /// Maximum task title length in characters.
    pub max_title_len: usize,
    /// Title shown for documents without one.
    pub placeholder_title: String,

    // -- UI --
    /// Date display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            principal: None,
            session_file: data_dir.join("session"),
            data_file: data_dir.join("tasks.bin"),
            op_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(5),
            max_title_len: MAX_TASK_TITLE_LENGTH,
            placeholder_title: DEFAULT_PLACEHOLDER_TITLE.to_string(),
            timestamp_format: "%-m/%-d/%Y".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path (`~/.config/tasklane/config.toml`)
    /// is tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if the resolved timestamp format is not a valid chrono format.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would only fail later, at render time.
    fn validate(&self) -> Result<(), ConfigError> {
        let malformed = StrftimeItems::new(&self.timestamp_format).any(|item| item == Item::Error);
        if malformed {
            return Err(ConfigError::InvalidTimestampFormat(
                self.timestamp_format.clone(),
            ));
        }
        Ok(())
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            principal: cli
                .principal
                .clone()
                .or_else(|| file.identity.principal.clone())
                .filter(|p| !p.trim().is_empty()),
            session_file: file
                .identity
                .session_file
                .clone()
                .unwrap_or(defaults.session_file),
            data_file: cli
                .data_file
                .clone()
                .or_else(|| file.store.data_file.clone())
                .unwrap_or(defaults.data_file),
            op_timeout: file
                .sync
                .op_timeout_ms
                .map_or(defaults.op_timeout, Duration::from_millis),
            ready_timeout: file
                .sync
                .ready_timeout_ms
                .map_or(defaults.ready_timeout, Duration::from_millis),
            max_title_len: file.sync.max_title_len.unwrap_or(defaults.max_title_len),
            placeholder_title: file
                .sync
                .placeholder_title
                .clone()
                .unwrap_or(defaults.placeholder_title),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        }
    }

    /// Builds the sync model's tunables from this configuration.
    #[must_use]
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            op_timeout: self.op_timeout,
            max_title_len: self.max_title_len,
            placeholder_title: self.placeholder_title.clone(),
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Personal task tracker with live sync")]
pub struct CliArgs {
    /// Command to run (default: `list`).
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Principal to act as (default: resume the anonymous session).
    #[arg(long, env = "TASKLANE_PRINCIPAL")]
    pub principal: Option<String>,

    /// Path to the task store file.
    #[arg(long, env = "TASKLANE_DATA")]
    pub data_file: Option<PathBuf>,

    /// Path to config file (default: `~/.config/tasklane/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Date display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKLANE_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/tasklane.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Subcommands of the `tasklane` binary.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List tasks, newest first.
    List {
        /// Which tasks to show.
        #[arg(long, short, default_value = "all")]
        filter: Filter,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Add a task.
    Add {
        /// Task title.
        title: String,
        /// Optional description.
        #[arg(long, short, default_value = "")]
        description: String,
    },
    /// Flip a task between active and completed.
    Toggle {
        /// Task id.
        id: String,
    },
    /// Replace a task's title and description.
    Edit {
        /// Task id.
        id: String,
        /// New title.
        title: String,
        /// New description.
        #[arg(long, short, default_value = "")]
        description: String,
    },
    /// Delete a task.
    Remove {
        /// Task id.
        id: String,
    },
    /// Show task counts by status.
    Stats,
    /// Print the task list every time it changes, until Ctrl-C.
    Watch {
        /// Which tasks to show.
        #[arg(long, short, default_value = "all")]
        filter: Filter,
    },
}

impl Default for Command {
    fn default() -> Self {
        Self::List {
            filter: Filter::All,
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tasklane")
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("tasklane").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
