//! Error records and fingerprint groups.

use super::CorrelationId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Where an error was intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    /// The process panic hook.
    Panic,
    /// An unhandled task failure reported by the host.
    Rejection,
    /// Reported directly through the error monitor.
    Manual,
}

impl ErrorSource {
    /// Returns the source name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Panic => "panic",
            Self::Rejection => "rejection",
            Self::Manual => "manual",
        }
    }
}

/// One frame of a captured stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    /// Symbol name.
    pub function: String,
    /// Source file, if resolved.
    pub file: Option<String>,
    /// Source line, if resolved.
    pub line: Option<u32>,
}

impl StackFrame {
    /// Creates a frame.
    #[must_use]
    pub fn new(function: impl Into<String>, file: Option<String>, line: Option<u32>) -> Self {
        Self {
            function: function.into(),
            file,
            line,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.function)?;
        if let Some(file) = &self.file {
            write!(f, " at {file}")?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
            }
        }
        Ok(())
    }
}

/// One captured error occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Record id.
    pub id: CorrelationId,
    /// Capture time (Unix epoch milliseconds).
    pub timestamp: u64,
    /// Interception point.
    pub source: ErrorSource,
    /// Error message as reported.
    pub message: String,
    /// Captured stack, innermost frame first.
    pub stack: Vec<StackFrame>,
    /// `file:line` of the failure site, when known.
    pub location: Option<String>,
    /// Name of the failing thread or task, when known.
    pub thread: Option<String>,
    /// Grouping key; empty until fingerprinted.
    pub fingerprint: String,
}

/// Occurrences of errors sharing a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorGroup {
    /// Grouping key.
    pub fingerprint: String,
    /// The first occurrence; never replaced.
    pub representative: ErrorInfo,
    /// Total occurrences, including ones no longer in `occurrences`.
    pub count: u64,
    /// Time of the first occurrence.
    pub first_seen: u64,
    /// Time of the latest occurrence.
    pub last_seen: u64,
    /// Most recent occurrences, oldest first, bounded.
    pub occurrences: VecDeque<ErrorInfo>,
}

impl ErrorGroup {
    /// Starts a group from its first occurrence.
    #[must_use]
    pub fn new(error: ErrorInfo) -> Self {
        let mut occurrences = VecDeque::new();
        occurrences.push_back(error.clone());
        Self {
            fingerprint: error.fingerprint.clone(),
            first_seen: error.timestamp,
            last_seen: error.timestamp,
            representative: error,
            count: 1,
            occurrences,
        }
    }

    /// Records a repeat occurrence, keeping at most `limit` in the list.
    pub fn record(&mut self, error: ErrorInfo, limit: usize) {
        self.count += 1;
        self.last_seen = self.last_seen.max(error.timestamp);
        self.occurrences.push_back(error);
        while self.occurrences.len() > limit.max(1) {
            self.occurrences.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(id: &str, timestamp: u64) -> ErrorInfo {
        ErrorInfo {
            id: CorrelationId::new(id),
            timestamp,
            source: ErrorSource::Manual,
            message: "boom".into(),
            stack: Vec::new(),
            location: None,
            thread: None,
            fingerprint: "fp".into(),
        }
    }

    #[test]
    fn test_group_record_bounds_occurrences() {
        let mut group = ErrorGroup::new(error("e1", 10));
        group.record(error("e2", 20), 2);
        group.record(error("e3", 30), 2);

        assert_eq!(group.count, 3);
        assert_eq!(group.first_seen, 10);
        assert_eq!(group.last_seen, 30);
        assert_eq!(group.representative.id.as_str(), "e1");
        let ids: Vec<&str> = group.occurrences.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e3"]);
    }

    #[test]
    fn test_frame_display() {
        let frame = StackFrame::new("app::load", Some("src/app.rs".into()), Some(42));
        assert_eq!(frame.to_string(), "app::load at src/app.rs:42");
        assert_eq!(StackFrame::new("main", None, None).to_string(), "main");
    }
}
