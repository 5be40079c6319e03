//! Top-level handle tying monitors, bus and plugins together.
//!
//! Every piece of state is owned by the instance, so several inspectors can
//! run side by side over separate platforms. The panic hook is the one
//! process-wide entry point; each installation chains to the previous one.

use crate::bus::EventBus;
use crate::config::{ErrorNotice, LookoutConfig, SideChannels};
use crate::io::{ExportDocument, EXPORT_VERSION, export_entries, import_entries};
use crate::models::TelemetryEvent;
use crate::monitors::{ConsoleMonitor, ErrorMonitor, Monitor, NetworkMonitor, PerformanceMonitor};
use crate::platform::Platform;
use crate::plugins::{InspectorHandle, Plugin, PluginContext, PluginManager, StorageAccess};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, instrument};

/// Visibility flag and custom event emission shared with plugins.
#[derive(Debug)]
struct InspectorControls {
    bus: EventBus,
    visible: AtomicBool,
}

impl InspectorHandle for InspectorControls {
    fn show(&self) {
        if !self.visible.swap(true, Ordering::SeqCst) {
            self.bus.emit(&TelemetryEvent::InspectorShown);
        }
    }

    fn hide(&self) {
        if self.visible.swap(false, Ordering::SeqCst) {
            self.bus.emit(&TelemetryEvent::InspectorHidden);
        }
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn track(&self, name: &str, data: serde_json::Value) {
        self.bus.emit(&TelemetryEvent::Custom {
            name: name.to_string(),
            data,
            timestamp: crate::current_timestamp_ms(),
        });
    }
}

/// In-process telemetry inspector.
///
/// Construction wires the enabled monitors to one bus; nothing is
/// instrumented until [`Inspector::start`].
#[derive(Debug)]
pub struct Inspector {
    config: Arc<LookoutConfig>,
    platform: Arc<Platform>,
    bus: EventBus,
    controls: Arc<InspectorControls>,
    network: Option<NetworkMonitor>,
    console: Option<ConsoleMonitor>,
    errors: Option<ErrorMonitor>,
    performance: Option<PerformanceMonitor>,
    plugins: PluginManager,
}

impl Inspector {
    /// Builds an inspector without side-channel callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCapacity`] for a zero store capacity
    /// and [`crate::Error::InvalidInput`] for an invalid ignore pattern.
    pub fn new(config: LookoutConfig, platform: Arc<Platform>) -> Result<Self> {
        Self::with_side_channels(config, platform, SideChannels::default())
    }

    /// Builds an inspector reporting through `side`.
    ///
    /// # Errors
    ///
    /// Same as [`Inspector::new`].
    pub fn with_side_channels(
        config: LookoutConfig,
        platform: Arc<Platform>,
        side: SideChannels,
    ) -> Result<Self> {
        let bus = EventBus::new();
        let internal = side.clone();
        bus.set_error_handler(move |error| internal.error(&ErrorNotice::Internal(error.clone())));

        let flags = config.monitors;
        let network = flags
            .network
            .then(|| NetworkMonitor::new(&config, &platform, bus.clone()))
            .transpose()?;
        let console = flags
            .console
            .then(|| ConsoleMonitor::new(&config, &platform, bus.clone()))
            .transpose()?;
        let errors = flags
            .errors
            .then(|| ErrorMonitor::new(&config, &platform, bus.clone(), side.clone()))
            .transpose()?;
        let performance = flags
            .performance
            .then(|| PerformanceMonitor::new(&config, &platform, bus.clone(), side.clone()))
            .transpose()?;

        let config = Arc::new(config);
        let controls = Arc::new(InspectorControls {
            bus: bus.clone(),
            visible: AtomicBool::new(false),
        });
        let plugins = PluginManager::new(PluginContext {
            bus: bus.clone(),
            storage: StorageAccess {
                network: network.clone(),
                console: console.clone(),
                errors: errors.clone(),
                performance: performance.clone(),
            },
            inspector: Arc::clone(&controls) as Arc<dyn InspectorHandle>,
            config: Arc::clone(&config),
        });

        info!(monitors = ?flags.enabled(), "Inspector created");
        Ok(Self {
            config,
            platform,
            bus,
            controls,
            network,
            console,
            errors,
            performance,
            plugins,
        })
    }

    fn monitors(&self) -> Vec<&dyn Monitor> {
        let mut monitors: Vec<&dyn Monitor> = Vec::new();
        if let Some(network) = &self.network {
            monitors.push(network);
        }
        if let Some(console) = &self.console {
            monitors.push(console);
        }
        if let Some(errors) = &self.errors {
            monitors.push(errors);
        }
        if let Some(performance) = &self.performance {
            monitors.push(performance);
        }
        monitors
    }

    /// Starts every enabled monitor.
    #[instrument(skip(self))]
    pub fn start(&self) {
        for monitor in self.monitors() {
            monitor.start();
        }
    }

    /// Stops every enabled monitor; stored records are kept.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        for monitor in self.monitors() {
            monitor.stop();
        }
    }

    /// Whether any monitor is recording.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.monitors().iter().any(|monitor| monitor.is_active())
    }

    /// Clears every store.
    pub fn clear(&self) {
        for monitor in self.monitors() {
            monitor.clear();
        }
    }

    /// Shows the inspector, emitting `inspector:shown` on a change.
    pub fn show(&self) {
        self.controls.show();
    }

    /// Hides the inspector, emitting `inspector:hidden` on a change.
    pub fn hide(&self) {
        self.controls.hide();
    }

    /// Flips visibility.
    pub fn toggle(&self) {
        if self.controls.is_visible() {
            self.controls.hide();
        } else {
            self.controls.show();
        }
    }

    /// Whether the inspector is shown.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.controls.is_visible()
    }

    /// Emits a custom event named `name`.
    pub fn track(&self, name: &str, data: serde_json::Value) {
        self.controls.track(name, data);
    }

    /// Installs and registers a plugin.
    ///
    /// # Errors
    ///
    /// See [`PluginManager::register`].
    pub async fn use_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        self.plugins.register(plugin).await
    }

    /// Snapshots every store.
    #[must_use]
    pub fn export(&self) -> ExportDocument {
        ExportDocument {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            network: self
                .network
                .as_ref()
                .map(|m| export_entries(m.snapshot()))
                .unwrap_or_default(),
            console: self
                .console
                .as_ref()
                .map(|m| export_entries(m.snapshot()))
                .unwrap_or_default(),
            errors: self
                .errors
                .as_ref()
                .map(|m| export_entries(m.snapshot_errors()))
                .unwrap_or_default(),
            error_groups: self
                .errors
                .as_ref()
                .map(|m| export_entries(m.snapshot_groups()))
                .unwrap_or_default(),
            performance: self
                .performance
                .as_ref()
                .map(|m| export_entries(m.snapshot()))
                .unwrap_or_default(),
        }
    }

    /// Snapshots every store as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialization`] if a record cannot be encoded.
    pub fn export_json(&self) -> Result<String> {
        self.export().to_json()
    }

    /// Replaces store contents with the document's records.
    ///
    /// Sections for disabled monitors are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] for an unsupported version;
    /// stores are untouched in that case.
    pub fn import(&self, document: ExportDocument) -> Result<()> {
        document.validate()?;
        let records = document.len();
        if let Some(network) = &self.network {
            network.restore(import_entries(document.network));
        }
        if let Some(console) = &self.console {
            console.restore(import_entries(document.console));
        }
        if let Some(errors) = &self.errors {
            errors.restore(
                import_entries(document.errors),
                import_entries(document.error_groups),
            );
        }
        if let Some(performance) = &self.performance {
            performance.restore(import_entries(document.performance));
        }
        info!(records, "Import complete");
        Ok(())
    }

    /// Parses a JSON document and imports it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] for malformed JSON or an
    /// unsupported version.
    pub fn import_json(&self, json: &str) -> Result<()> {
        self.import(ExportDocument::from_json(json)?)
    }

    /// The shared event bus.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The plugin manager.
    #[must_use]
    pub const fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    /// The effective configuration.
    #[must_use]
    pub fn config(&self) -> &LookoutConfig {
        &self.config
    }

    /// The instrumented platform.
    #[must_use]
    pub const fn platform(&self) -> &Arc<Platform> {
        &self.platform
    }

    /// The network monitor, if enabled.
    #[must_use]
    pub const fn network(&self) -> Option<&NetworkMonitor> {
        self.network.as_ref()
    }

    /// The console monitor, if enabled.
    #[must_use]
    pub const fn console(&self) -> Option<&ConsoleMonitor> {
        self.console.as_ref()
    }

    /// The error monitor, if enabled.
    #[must_use]
    pub const fn errors(&self) -> Option<&ErrorMonitor> {
        self.errors.as_ref()
    }

    /// The performance monitor, if enabled.
    #[must_use]
    pub const fn performance(&self) -> Option<&PerformanceMonitor> {
        self.performance.as_ref()
    }
}

impl Drop for Inspector {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorFlags;
    use crate::models::{LogLevel, event_names};
    use serde_json::json;
    use std::sync::Mutex;

    fn quiet() -> LookoutConfig {
        LookoutConfig::default().with_monitors(MonitorFlags {
            errors: false,
            ..MonitorFlags::all()
        })
    }

    #[test]
    fn test_disabled_monitors_are_not_built() {
        let config = LookoutConfig::default().with_monitors(MonitorFlags::none());
        let inspector = Inspector::new(config, Arc::new(Platform::default())).unwrap();
        assert!(inspector.network().is_none());
        inspector.start();
        assert!(!inspector.is_running());
        assert!(inspector.export().is_empty());
    }

    #[test]
    fn test_visibility_events_fire_on_change_only() {
        let inspector = Inspector::new(quiet(), Arc::new(Platform::default())).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        for name in [event_names::INSPECTOR_SHOWN, event_names::INSPECTOR_HIDDEN] {
            let sink = Arc::clone(&events);
            inspector
                .bus()
                .on(name, move |e| sink.lock().unwrap().push(e.event_name().to_string()));
        }

        inspector.show();
        inspector.show();
        inspector.toggle();
        inspector.toggle();

        assert!(inspector.is_visible());
        assert_eq!(
            events.lock().unwrap().as_slice(),
            &["inspector:shown", "inspector:hidden", "inspector:shown"]
        );
    }

    #[test]
    fn test_track_emits_custom_event() {
        let inspector = Inspector::new(quiet(), Arc::new(Platform::default())).unwrap();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        inspector.bus().on("checkout:completed", move |event| {
            if let TelemetryEvent::Custom { data, .. } = event {
                *sink.lock().unwrap() = Some(data.clone());
            }
        });

        inspector.track("checkout:completed", json!({"total": 42}));
        assert_eq!(*seen.lock().unwrap(), Some(json!({"total": 42})));
    }

    #[test]
    fn test_listener_failure_reaches_side_channel() {
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);
        let side = SideChannels::default().with_on_error(move |notice| {
            if let ErrorNotice::Internal(error) = notice {
                sink.lock().unwrap().push(error.to_string());
            }
        });
        let inspector =
            Inspector::with_side_channels(quiet(), Arc::new(Platform::default()), side).unwrap();
        inspector.bus().on("boom", |_| panic!("listener broke"));

        inspector.track("boom", json!(null));
        let notices = notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("listener broke"));
    }

    #[test]
    fn test_stop_keeps_records() {
        let platform = Arc::new(Platform::default());
        let inspector = Inspector::new(quiet(), Arc::clone(&platform)).unwrap();
        inspector.start();
        platform.log(LogLevel::Info, &[json!("kept")]);
        inspector.stop();

        assert!(!inspector.is_running());
        assert_eq!(inspector.console().unwrap().get_entries().len(), 1);
    }
}
