//! Export and import of captured records.
//!
//! An [`ExportDocument`] carries every store's contents in store order, each
//! record paired with its original capture time. Importing a document
//! replaces store contents; store identities are reissued on import.
//!
//! # Examples
//!
//! ```rust,ignore
//! use lookout::io::ExportDocument;
//! use std::fs::File;
//!
//! let document = inspector.export();
//! document.write_to(File::create("session.json")?)?;
//!
//! let restored = ExportDocument::read_from(File::open("session.json")?)?;
//! other_inspector.import(restored)?;
//! ```

use crate::models::{ConsoleEntry, ErrorGroup, ErrorInfo, NetworkEntry, PerformanceSnapshot};
use crate::store::StorageEntry;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Document format version written by this crate.
pub const EXPORT_VERSION: u32 = 1;

/// One exported record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedEntry<T> {
    /// Original capture time (Unix epoch milliseconds).
    pub timestamp: u64,
    /// The record.
    pub payload: T,
}

impl<T> From<StorageEntry<T>> for ExportedEntry<T> {
    fn from(entry: StorageEntry<T>) -> Self {
        Self {
            timestamp: entry.timestamp,
            payload: entry.payload,
        }
    }
}

impl<T> ExportedEntry<T> {
    fn into_pair(self) -> (u64, T) {
        (self.timestamp, self.payload)
    }
}

/// Snapshot of every store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    /// Format version.
    pub version: u32,
    /// When the export was taken.
    pub exported_at: DateTime<Utc>,
    /// Network entries, oldest first.
    #[serde(default)]
    pub network: Vec<ExportedEntry<NetworkEntry>>,
    /// Console entries, oldest first.
    #[serde(default)]
    pub console: Vec<ExportedEntry<ConsoleEntry>>,
    /// Recent errors, oldest first.
    #[serde(default)]
    pub errors: Vec<ExportedEntry<ErrorInfo>>,
    /// Error groups in first-seen order.
    #[serde(default)]
    pub error_groups: Vec<ExportedEntry<ErrorGroup>>,
    /// Performance snapshots, oldest first.
    #[serde(default)]
    pub performance: Vec<ExportedEntry<PerformanceSnapshot>>,
}

impl Default for ExportDocument {
    fn default() -> Self {
        Self {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            network: Vec::new(),
            console: Vec::new(),
            errors: Vec::new(),
            error_groups: Vec::new(),
            performance: Vec::new(),
        }
    }
}

impl ExportDocument {
    /// Total number of records across all sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.network.len()
            + self.console.len()
            + self.errors.len()
            + self.error_groups.len()
            + self.performance.len()
    }

    /// Whether the document holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks that this crate can import the document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unsupported version.
    pub fn validate(&self) -> Result<()> {
        if self.version != EXPORT_VERSION {
            return Err(Error::InvalidInput(format!(
                "unsupported export version {} (expected {EXPORT_VERSION})",
                self.version
            )));
        }
        Ok(())
    }

    /// Serializes the document as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if a record cannot be encoded.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for malformed JSON or an unsupported
    /// version.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidInput(format!("malformed export document: {e}")))?;
        document.validate()?;
        Ok(document)
    }

    /// Writes the document as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if writing fails.
    pub fn write_to(&self, writer: impl Write) -> Result<()> {
        serde_json::to_writer_pretty(writer, self).map_err(|e| Error::OperationFailed {
            operation: "write_export".to_string(),
            cause: e.to_string(),
        })
    }

    /// Reads and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for malformed JSON or an unsupported
    /// version.
    pub fn read_from(reader: impl Read) -> Result<Self> {
        let document: Self = serde_json::from_reader(reader)
            .map_err(|e| Error::InvalidInput(format!("malformed export document: {e}")))?;
        document.validate()?;
        Ok(document)
    }
}

/// Converts store entries into exported entries, keeping order.
#[must_use]
pub fn export_entries<T>(entries: Vec<StorageEntry<T>>) -> Vec<ExportedEntry<T>> {
    entries.into_iter().map(ExportedEntry::from).collect()
}

/// Converts exported entries into `(timestamp, payload)` pairs, keeping order.
pub fn import_entries<T>(entries: Vec<ExportedEntry<T>>) -> impl Iterator<Item = (u64, T)> {
    entries.into_iter().map(ExportedEntry::into_pair)
}
