//! Settings type definitions.
//!
//! Every section is `#[serde(rename_all = "camelCase", default)]`, so a
//! settings file only needs the keys it changes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the ledger and its operator CLI.
///
/// ```json
/// {
///   "storage": { "databasePath": "/var/lib/expedition/ledger.db" },
///   "retention": { "capacity": 500 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExpeditionSettings {
    /// Database location and connection behaviour.
    pub storage: StorageSettings,
    /// How many runs are kept and how often the background purge runs.
    pub retention: RetentionSettings,
    /// Ledger worker tuning.
    pub worker: WorkerSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl ExpeditionSettings {
    /// Reject values that parse but cannot be used.
    pub fn validate(&self) -> Result<()> {
        if self.retention.capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "retention.capacity must be at least 1".into(),
            ));
        }
        if self.worker.queue_depth == 0 {
            return Err(SettingsError::InvalidValue(
                "worker.queueDepth must be at least 1".into(),
            ));
        }
        if self.storage.database_path.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "storage.databasePath must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Database settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Path of the SQLite database file.
    pub database_path: String,
    /// How long a connection waits on a locked database.
    pub busy_timeout_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: expedition_home()
                .join("database")
                .join("ledger.db")
                .to_string_lossy()
                .into_owned(),
            busy_timeout_ms: 5000,
        }
    }
}

/// Retention settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetentionSettings {
    /// Maximum number of stored runs.
    pub capacity: u32,
    /// Trim inside `begin_run` so new runs never push the table past capacity.
    pub purge_on_begin: bool,
    /// Seconds between background purges. `0` disables the background task.
    pub purge_interval_secs: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            capacity: 200,
            purge_on_begin: true,
            purge_interval_secs: 300,
        }
    }
}

/// Ledger worker settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerSettings {
    /// Capacity of the worker's command queue.
    pub queue_depth: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self { queue_depth: 64 }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Per-module level overrides, e.g. `{"expedition_ledger": "debug"}`.
    pub modules: Vec<ModuleLevel>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            modules: Vec::new(),
            json: false,
        }
    }
}

/// One per-module log level override.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleLevel {
    /// Target prefix, e.g. `expedition_ledger::retention`.
    pub module: String,
    /// Level for that target.
    pub level: String,
}

/// `~/.expedition`, or `/tmp/.expedition` when `HOME` is unset.
pub fn expedition_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".expedition")
}
