//! Error taxonomy for the inventory core.
//!
//! Store and configuration errors surface to callers. Corrupt records and
//! notification failures are logged and absorbed by the component that hit them.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A read or write failed; the next tick is the natural retry.
    #[error("store I/O failed: {0}")]
    Io(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store worker is no longer running")]
    Closed,

    /// Another process holds the writer lock. Fatal at startup.
    #[error("store {} is locked by another writer (pid {pid})", path.display())]
    Locked { path: PathBuf, pid: u32 },

    /// The database could not be opened, checked or migrated. Fatal at startup.
    #[error("store {} is unreadable: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Timeout(_))
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Io(format!("{err:#}"))
    }
}

/// Invalid or unreadable configuration. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// A restored record failed a sanity check and was dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("corrupt {table} record `{key}`: {reason}")]
pub struct CorruptRecord {
    pub table: &'static str,
    pub key: String,
    pub reason: String,
}

/// External notification delivery failed. Never fatal, never retried.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("notification transport failed: {0}")]
    Transport(String),

    #[error("notification endpoint answered with status {0}")]
    Status(u16),

    #[error("notification timed out after {0:?}")]
    Timeout(Duration),
}
