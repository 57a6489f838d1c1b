//! Retained decision storage.
//!
//! A single integer cell that survives sleep and reset. It holds the code of
//! the last decided [`Action`] so the next boot can tell what the device was
//! about to do. The value is a hint for diagnostics, never an input to the
//! decision itself.

use crate::decision::Action;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Value of the cell before anything has been written
pub const INITIAL_DECISION: i32 = 0;

/// Retained storage errors
#[derive(Error, Debug)]
pub enum RetainedError {
    #[error("Failed to access retained storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode retained record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Single-slot store for the decision code
pub trait RetainedStore {
    /// Read the last written code, or [`INITIAL_DECISION`] if there is none
    fn load(&mut self) -> i32;

    /// Overwrite the cell
    fn store(&mut self, code: i32) -> Result<(), RetainedError>;
}

/// Record persisted by [`FileRetainedStore`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetainedRecord {
    pub decision: i32,
    /// Human-readable name of the decision, if the code is known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    /// Unix timestamp (seconds) of the write
    #[serde(default)]
    pub written_at: i64,
}

/// File-backed cell on storage that outlives suspend and reboot
pub struct FileRetainedStore {
    path: PathBuf,
}

impl FileRetainedStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full record, if present and well-formed
    pub fn read_record(&self) -> Result<Option<RetainedRecord>, RetainedError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }
}

impl RetainedStore for FileRetainedStore {
    fn load(&mut self) -> i32 {
        match self.read_record() {
            Ok(Some(record)) => record.decision,
            Ok(None) => INITIAL_DECISION,
            Err(e) => {
                tracing::warn!(
                    "Retained record at {} unreadable ({}), assuming no prior decision",
                    self.path.display(),
                    e
                );
                INITIAL_DECISION
            }
        }
    }

    /// Write the record atomically (temp file, then rename)
    fn store(&mut self, code: i32) -> Result<(), RetainedError> {
        let record = RetainedRecord {
            decision: code,
            action: Action::from_code(code),
            written_at: chrono::Utc::now().timestamp(),
        };
        let content = serde_json::to_string(&record)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            RetainedError::Io(e)
        })?;

        Ok(())
    }
}

/// In-process cell; lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryRetainedStore {
    value: Option<i32>,
    writes: usize,
}

impl MemoryRetainedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a value already in the cell
    #[cfg(test)]
    pub fn with_value(code: i32) -> Self {
        Self {
            value: Some(code),
            writes: 0,
        }
    }

    /// Number of writes performed so far
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl RetainedStore for MemoryRetainedStore {
    fn load(&mut self) -> i32 {
        self.value.unwrap_or(INITIAL_DECISION)
    }

    fn store(&mut self, code: i32) -> Result<(), RetainedError> {
        self.value = Some(code);
        self.writes += 1;
        Ok(())
    }
}
