//! Console records.

use super::{CorrelationId, StackFrame};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a logging call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Finest-grained diagnostics.
    Trace,
    /// Debug output.
    Debug,
    /// Plain log call.
    Log,
    /// Informational.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
}

impl LogLevel {
    /// Returns the level name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Parses a level name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "log" => Some(Self::Log),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Levels that carry a captured stack when stack capture is enabled.
    #[must_use]
    pub const fn wants_stack(self) -> bool {
        matches!(self, Self::Warn | Self::Error)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured logging call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    /// Record id.
    pub id: CorrelationId,
    /// Capture time (Unix epoch milliseconds).
    pub timestamp: u64,
    /// Call severity.
    pub level: LogLevel,
    /// Space-joined rendering of the arguments.
    pub message: String,
    /// Individually rendered arguments.
    pub args: Vec<String>,
    /// Call-site stack, when captured.
    pub stack: Option<Vec<StackFrame>>,
}
