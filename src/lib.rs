//! # Lookout
//!
//! In-process telemetry capture for a running client application.
//!
//! Lookout intercepts outbound network calls, logging calls, uncaught
//! failures and runtime performance signals, converts them into typed,
//! time-ordered records, and keeps those records available to consumers
//! (a UI, plugins, export routines) under strict memory bounds.
//!
//! ## Features
//!
//! - Synchronous named event bus with snapshot-before-dispatch semantics
//! - Bounded stores: FIFO ring buffer and LRU indexed store, both with TTL
//! - Instrumentation adapters that wrap and restore host entry points
//! - Monitors for network, console, errors (with fingerprint grouping) and
//!   performance
//! - Plugin lifecycle with a concurrent-install guard
//!
//! ## Example
//!
//! ```rust,ignore
//! use lookout::{Inspector, LookoutConfig, Platform};
//! use std::sync::Arc;
//!
//! let platform = Arc::new(Platform::default());
//! let inspector = Inspector::new(LookoutConfig::default(), Arc::clone(&platform))?;
//! inspector.start();
//!
//! // Host code routes outbound calls through the platform.
//! let response = platform.fetch.current().fetch(request).await?;
//!
//! let document = inspector.export();
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod adapters;
pub mod bus;
pub mod config;
pub mod inspector;
pub mod io;
pub mod models;
pub mod monitors;
pub mod observability;
pub mod platform;
pub mod plugins;
pub mod store;

// Re-exports for convenience
pub use bus::{EventBus, ListenerId, Subscription};
pub use config::{LookoutConfig, MonitorFlags, NetworkFilters, SideChannels};
pub use inspector::Inspector;
pub use io::ExportDocument;
pub use models::{
    ConsoleEntry, ErrorGroup, ErrorInfo, LogLevel, NetworkEntry, PerformanceSnapshot,
    TelemetryEvent,
};
pub use monitors::{ConsoleMonitor, ErrorMonitor, Monitor, NetworkMonitor, PerformanceMonitor};
pub use platform::Platform;
pub use plugins::{Plugin, PluginContext, PluginManager, PluginMetadata};
pub use store::{EntryId, IndexedStore, RingStore, StorageEntry};

/// Error type for lookout operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `AdapterInstall` | A host entry point is sealed against instrumentation |
/// | `CorrelationMiss` | A completion arrives with no matching in-flight record |
/// | `DuplicatePlugin` | A plugin name is already registered or installing |
/// | `PluginNotFound` | Unregister/enable/disable for an unknown plugin |
/// | `PluginInstall` | A plugin's `install` returned an error |
/// | `ListenerExecution` | A bus listener panicked during dispatch |
/// | `Serialization` | A captured payload could not be rendered |
/// | `InvalidCapacity` | A bounded store was constructed with capacity 0 |
/// | `InvalidInput` | Malformed import document or ignore pattern |
/// | `OperationFailed` | Config file I/O, parse failures, logging init |
///
/// Only `InvalidCapacity` is fatal; every other variant is either recovered
/// locally or reported through a side-channel.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// An adapter could not wrap its entry point.
    ///
    /// The owning monitor skips the adapter and continues degraded.
    #[error("adapter '{adapter}' could not be installed: {reason}")]
    AdapterInstall {
        /// The adapter name.
        adapter: &'static str,
        /// Why installation was refused.
        reason: String,
    },

    /// A correlated completion had no in-flight record.
    ///
    /// Recovered by storing an orphan record.
    #[error("no in-flight record for correlation id {correlation_id}")]
    CorrelationMiss {
        /// The unmatched correlation id.
        correlation_id: String,
    },

    /// A plugin with this name is already registered or installing.
    #[error("plugin '{0}' is already registered")]
    DuplicatePlugin(String),

    /// No plugin with this name is registered.
    #[error("plugin '{0}' not found")]
    PluginNotFound(String),

    /// A plugin's install hook failed.
    #[error("plugin '{name}' failed to install: {cause}")]
    PluginInstall {
        /// The plugin name.
        name: String,
        /// The underlying cause.
        cause: String,
    },

    /// A bus listener panicked.
    ///
    /// Reported through the bus error side-channel; dispatch continues.
    #[error("listener for '{event}' failed: {message}")]
    ListenerExecution {
        /// The event name being dispatched.
        event: String,
        /// The panic message.
        message: String,
    },

    /// A payload could not be captured or stringified.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A bounded store was created with capacity 0.
    #[error("store '{store}' requires a capacity greater than zero")]
    InvalidCapacity {
        /// The store kind.
        store: &'static str,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for lookout operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in milliseconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
