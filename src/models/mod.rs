//! Data models for lookout.
//!
//! Domain records produced by the monitors and the event enum carried on the
//! bus.

mod console;
mod error;
mod events;
mod id;
mod network;
mod performance;
mod plugin;

pub use console::{ConsoleEntry, LogLevel};
pub use error::{ErrorGroup, ErrorInfo, ErrorSource, StackFrame};
pub use events::{TelemetryEvent, event_names};
pub use id::CorrelationId;
pub use network::{
    MessageDirection, NetworkEntry, NetworkResponse, RequestKind, RequestState, SocketMessage,
};
pub use performance::{
    IssueKind, MemoryUsage, PaintTimings, PerformanceIssue, PerformanceSnapshot,
};
pub use plugin::{PluginMetadata, PluginState};
