//! Telemetry event types carried on the bus.

use super::{
    ConsoleEntry, CorrelationId, ErrorGroup, ErrorInfo, NetworkEntry, PerformanceIssue,
    PerformanceSnapshot, PluginMetadata, SocketMessage,
};
use serde::Serialize;

/// Stable event names for subscribing.
pub mod event_names {
    /// An HTTP request started.
    pub const NETWORK_REQUEST: &str = "network:request";
    /// An HTTP response arrived.
    pub const NETWORK_RESPONSE: &str = "network:response";
    /// An HTTP transport failed.
    pub const NETWORK_ERROR: &str = "network:error";
    /// A socket opened.
    pub const SOCKET_OPEN: &str = "network:socket_open";
    /// A socket frame was sent or received.
    pub const SOCKET_MESSAGE: &str = "network:socket_message";
    /// A socket closed.
    pub const SOCKET_CLOSE: &str = "network:socket_close";
    /// A logging call was captured.
    pub const CONSOLE_ENTRY: &str = "console:entry";
    /// An error occurrence was captured.
    pub const ERROR_CAPTURED: &str = "error:captured";
    /// An error group changed.
    pub const ERROR_GROUP_UPDATED: &str = "error:group_updated";
    /// A performance window closed.
    pub const PERFORMANCE_SNAPSHOT: &str = "performance:snapshot";
    /// A performance threshold was crossed.
    pub const PERFORMANCE_ISSUE: &str = "performance:issue";
    /// A plugin finished installing.
    pub const PLUGIN_REGISTERED: &str = "plugin:registered";
    /// A plugin was removed.
    pub const PLUGIN_UNREGISTERED: &str = "plugin:unregistered";
    /// A plugin was switched on.
    pub const PLUGIN_ENABLED: &str = "plugin:enabled";
    /// A plugin was switched off.
    pub const PLUGIN_DISABLED: &str = "plugin:disabled";
    /// The inspector became visible.
    pub const INSPECTOR_SHOWN: &str = "inspector:shown";
    /// The inspector was hidden.
    pub const INSPECTOR_HIDDEN: &str = "inspector:hidden";
}

/// Events emitted by monitors, plugins and the inspector.
///
/// Payloads are snapshots; consumers that need to keep one should clone it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// An HTTP request started.
    NetworkRequest(NetworkEntry),
    /// An HTTP response arrived.
    NetworkResponse(NetworkEntry),
    /// An HTTP transport failed.
    NetworkError(NetworkEntry),
    /// A socket opened.
    SocketOpen(NetworkEntry),
    /// A socket frame was sent or received.
    SocketMessage {
        /// The connection the frame belongs to.
        connection_id: CorrelationId,
        /// The frame.
        message: SocketMessage,
    },
    /// A socket closed.
    SocketClose(NetworkEntry),
    /// A logging call was captured.
    ConsoleEntry(ConsoleEntry),
    /// An error occurrence was captured.
    ErrorCaptured(ErrorInfo),
    /// An error group was created or updated.
    ErrorGroupUpdated(ErrorGroup),
    /// A performance window closed.
    PerformanceSnapshot(PerformanceSnapshot),
    /// A performance threshold was crossed.
    PerformanceIssue(PerformanceIssue),
    /// A plugin finished installing.
    PluginRegistered(PluginMetadata),
    /// A plugin was removed.
    PluginUnregistered(PluginMetadata),
    /// A plugin was switched on.
    PluginEnabled(PluginMetadata),
    /// A plugin was switched off.
    PluginDisabled(PluginMetadata),
    /// The inspector became visible.
    InspectorShown,
    /// The inspector was hidden.
    InspectorHidden,
    /// Host-defined event emitted through `track`.
    Custom {
        /// Event name chosen by the host.
        name: String,
        /// Arbitrary payload.
        data: serde_json::Value,
        /// Emission time (Unix epoch milliseconds).
        timestamp: u64,
    },
}

impl TelemetryEvent {
    /// Returns the name listeners subscribe to.
    #[must_use]
    pub fn event_name(&self) -> &str {
        use event_names as n;
        match self {
            Self::NetworkRequest(_) => n::NETWORK_REQUEST,
            Self::NetworkResponse(_) => n::NETWORK_RESPONSE,
            Self::NetworkError(_) => n::NETWORK_ERROR,
            Self::SocketOpen(_) => n::SOCKET_OPEN,
            Self::SocketMessage { .. } => n::SOCKET_MESSAGE,
            Self::SocketClose(_) => n::SOCKET_CLOSE,
            Self::ConsoleEntry(_) => n::CONSOLE_ENTRY,
            Self::ErrorCaptured(_) => n::ERROR_CAPTURED,
            Self::ErrorGroupUpdated(_) => n::ERROR_GROUP_UPDATED,
            Self::PerformanceSnapshot(_) => n::PERFORMANCE_SNAPSHOT,
            Self::PerformanceIssue(_) => n::PERFORMANCE_ISSUE,
            Self::PluginRegistered(_) => n::PLUGIN_REGISTERED,
            Self::PluginUnregistered(_) => n::PLUGIN_UNREGISTERED,
            Self::PluginEnabled(_) => n::PLUGIN_ENABLED,
            Self::PluginDisabled(_) => n::PLUGIN_DISABLED,
            Self::InspectorShown => n::INSPECTOR_SHOWN,
            Self::InspectorHidden => n::INSPECTOR_HIDDEN,
            Self::Custom { name, .. } => name.as_str(),
        }
    }

    /// Returns the record id for record-carrying events.
    #[must_use]
    pub const fn record_id(&self) -> Option<&CorrelationId> {
        match self {
            Self::NetworkRequest(entry)
            | Self::NetworkResponse(entry)
            | Self::NetworkError(entry)
            | Self::SocketOpen(entry)
            | Self::SocketClose(entry) => Some(&entry.id),
            Self::SocketMessage { connection_id, .. } => Some(connection_id),
            Self::ConsoleEntry(entry) => Some(&entry.id),
            Self::ErrorCaptured(error) => Some(&error.id),
            Self::ErrorGroupUpdated(group) => Some(&group.representative.id),
            Self::PerformanceSnapshot(snapshot) => Some(&snapshot.id),
            Self::PerformanceIssue(issue) => Some(&issue.snapshot_id),
            Self::PluginRegistered(_)
            | Self::PluginUnregistered(_)
            | Self::PluginEnabled(_)
            | Self::PluginDisabled(_)
            | Self::InspectorShown
            | Self::InspectorHidden
            | Self::Custom { .. } => None,
        }
    }
}
