//! What a plugin receives at install time.

use crate::bus::EventBus;
use crate::config::LookoutConfig;
use crate::models::{ConsoleEntry, ErrorGroup, ErrorInfo, NetworkEntry, PerformanceSnapshot};
use crate::monitors::{ConsoleMonitor, ErrorMonitor, NetworkMonitor, PerformanceMonitor};
use std::sync::Arc;

/// Control surface of the owning inspector.
pub trait InspectorHandle: Send + Sync {
    /// Shows the inspector.
    fn show(&self);

    /// Hides the inspector.
    fn hide(&self);

    /// Whether the inspector is shown.
    fn is_visible(&self) -> bool;

    /// Emits a custom event named `name`.
    fn track(&self, name: &str, data: serde_json::Value);
}

/// Read-only snapshots of every monitor's store.
///
/// Accessors for disabled monitors return empty lists.
#[derive(Debug, Clone, Default)]
pub struct StorageAccess {
    pub(crate) network: Option<NetworkMonitor>,
    pub(crate) console: Option<ConsoleMonitor>,
    pub(crate) errors: Option<ErrorMonitor>,
    pub(crate) performance: Option<PerformanceMonitor>,
}

impl StorageAccess {
    /// Network entries, oldest first.
    #[must_use]
    pub fn network_entries(&self) -> Vec<NetworkEntry> {
        self.network
            .as_ref()
            .map(NetworkMonitor::get_entries)
            .unwrap_or_default()
    }

    /// Console entries, oldest first.
    #[must_use]
    pub fn console_entries(&self) -> Vec<ConsoleEntry> {
        self.console
            .as_ref()
            .map(ConsoleMonitor::get_entries)
            .unwrap_or_default()
    }

    /// Recent errors, oldest first.
    #[must_use]
    pub fn errors(&self) -> Vec<ErrorInfo> {
        self.errors
            .as_ref()
            .map(ErrorMonitor::get_errors)
            .unwrap_or_default()
    }

    /// Error groups in first-seen order.
    #[must_use]
    pub fn error_groups(&self) -> Vec<ErrorGroup> {
        self.errors
            .as_ref()
            .map(ErrorMonitor::get_groups)
            .unwrap_or_default()
    }

    /// Performance snapshots, oldest first.
    #[must_use]
    pub fn performance_snapshots(&self) -> Vec<PerformanceSnapshot> {
        self.performance
            .as_ref()
            .map(PerformanceMonitor::get_snapshots)
            .unwrap_or_default()
    }
}

/// Handed to [`Plugin::install`](super::Plugin::install).
#[derive(Clone)]
pub struct PluginContext {
    /// Event bus shared with the monitors.
    pub bus: EventBus,
    /// Store snapshots.
    pub storage: StorageAccess,
    /// Inspector controls.
    pub inspector: Arc<dyn InspectorHandle>,
    /// Effective configuration.
    pub config: Arc<LookoutConfig>,
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("bus", &self.bus)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}
