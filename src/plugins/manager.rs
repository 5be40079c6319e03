//! Plugin registry.

use super::{Plugin, PluginContext, PluginMetadata, PluginState};
use crate::bus::EventBus;
use crate::models::TelemetryEvent;
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, instrument, warn};

struct Registration {
    metadata: PluginMetadata,
    plugin: Arc<dyn Plugin>,
    active: bool,
}

#[derive(Default)]
struct Registry {
    /// Registration order.
    plugins: Vec<Registration>,
    installing: HashSet<String>,
}

impl Registry {
    fn position(&self, name: &str) -> Option<usize> {
        self.plugins.iter().position(|r| r.metadata.name == name)
    }
}

/// Releases a name from the installing set however registration ends.
struct InstallGuard {
    registry: Arc<Mutex<Registry>>,
    name: String,
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        lock(&self.registry).installing.remove(&self.name);
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registers, toggles and removes plugins.
///
/// Cloning is cheap; clones share one registry.
#[derive(Clone)]
pub struct PluginManager {
    registry: Arc<Mutex<Registry>>,
    context: PluginContext,
}

impl PluginManager {
    /// Creates an empty manager handing `context` to each plugin.
    #[must_use]
    pub fn new(context: PluginContext) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            context,
        }
    }

    fn bus(&self) -> &EventBus {
        &self.context.bus
    }

    /// Installs and registers `plugin` as active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicatePlugin`] if the name is registered or being
    /// installed, and [`Error::PluginInstall`] if the install hook fails.
    #[instrument(skip_all, fields(plugin = %plugin.metadata().name))]
    pub async fn register(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let metadata = plugin.metadata();
        let name = metadata.name.clone();
        let _guard = {
            let mut registry = lock(&self.registry);
            if registry.position(&name).is_some() || registry.installing.contains(&name) {
                return Err(Error::DuplicatePlugin(name));
            }
            registry.installing.insert(name.clone());
            InstallGuard {
                registry: Arc::clone(&self.registry),
                name: name.clone(),
            }
        };

        plugin
            .install(self.context.clone())
            .await
            .map_err(|e| Error::PluginInstall {
                name: name.clone(),
                cause: e.to_string(),
            })?;

        lock(&self.registry).plugins.push(Registration {
            metadata: metadata.clone(),
            plugin,
            active: true,
        });
        info!(plugin = %name, version = %metadata.version, "Plugin registered");
        self.bus().emit(&TelemetryEvent::PluginRegistered(metadata));
        Ok(())
    }

    /// Uninstalls and removes a plugin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PluginNotFound`] if no plugin has that name.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let plugin = self.find(name, |r| Arc::clone(&r.plugin))?;
        if let Err(e) = plugin.uninstall().await {
            warn!(plugin = %name, error = %e, "Plugin uninstall failed, removing anyway");
        }

        let removed = {
            let mut registry = lock(&self.registry);
            registry
                .position(name)
                .map(|index| registry.plugins.remove(index))
        };
        let Some(removed) = removed else {
            return Err(Error::PluginNotFound(name.to_string()));
        };
        info!(plugin = %name, "Plugin unregistered");
        self.bus()
            .emit(&TelemetryEvent::PluginUnregistered(removed.metadata));
        Ok(())
    }

    /// Re-activates a disabled plugin. Enabling an active plugin is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PluginNotFound`] if no plugin has that name.
    pub fn enable(&self, name: &str) -> Result<()> {
        self.set_active(name, true)
    }

    /// Deactivates a plugin without uninstalling it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PluginNotFound`] if no plugin has that name.
    pub fn disable(&self, name: &str) -> Result<()> {
        self.set_active(name, false)
    }

    fn set_active(&self, name: &str, active: bool) -> Result<()> {
        let changed = {
            let mut registry = lock(&self.registry);
            let index = registry
                .position(name)
                .ok_or_else(|| Error::PluginNotFound(name.to_string()))?;
            let registration = &mut registry.plugins[index];
            if registration.active == active {
                None
            } else {
                registration.active = active;
                Some((Arc::clone(&registration.plugin), registration.metadata.clone()))
            }
        };
        let Some((plugin, metadata)) = changed else {
            return Ok(());
        };

        if active {
            plugin.on_enable();
            self.bus().emit(&TelemetryEvent::PluginEnabled(metadata));
        } else {
            plugin.on_disable();
            self.bus().emit(&TelemetryEvent::PluginDisabled(metadata));
        }
        info!(plugin = %name, active, "Plugin toggled");
        Ok(())
    }

    fn find<R>(&self, name: &str, read: impl FnOnce(&Registration) -> R) -> Result<R> {
        let registry = lock(&self.registry);
        registry
            .position(name)
            .map(|index| read(&registry.plugins[index]))
            .ok_or_else(|| Error::PluginNotFound(name.to_string()))
    }

    /// The plugin registered as `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.find(name, |r| Arc::clone(&r.plugin)).ok()
    }

    /// Metadata of registered plugins, in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<PluginMetadata> {
        lock(&self.registry)
            .plugins
            .iter()
            .map(|r| r.metadata.clone())
            .collect()
    }

    /// Metadata of active plugins, in registration order.
    #[must_use]
    pub fn get_active(&self) -> Vec<PluginMetadata> {
        lock(&self.registry)
            .plugins
            .iter()
            .filter(|r| r.active)
            .map(|r| r.metadata.clone())
            .collect()
    }

    /// Lifecycle state of `name`, or `None` if unknown.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<PluginState> {
        let registry = lock(&self.registry);
        if let Some(index) = registry.position(name) {
            return Some(if registry.plugins[index].active {
                PluginState::Active
            } else {
                PluginState::Disabled
            });
        }
        registry
            .installing
            .contains(name)
            .then_some(PluginState::Installing)
    }

    /// Whether `name` is registered (installing plugins are not).
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        lock(&self.registry).position(name).is_some()
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("PluginManager")
            .field("plugins", &registry.plugins.len())
            .field("installing", &registry.installing.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LookoutConfig;
    use crate::models::event_names;
    use crate::plugins::{InspectorHandle, StorageAccess};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct Headless;

    impl InspectorHandle for Headless {
        fn show(&self) {}
        fn hide(&self) {}
        fn is_visible(&self) -> bool {
            false
        }
        fn track(&self, _name: &str, _data: serde_json::Value) {}
    }

    fn manager() -> PluginManager {
        PluginManager::new(PluginContext {
            bus: EventBus::new(),
            storage: StorageAccess::default(),
            inspector: Arc::new(Headless),
            config: Arc::new(LookoutConfig::default()),
        })
    }

    #[derive(Default)]
    struct Counter {
        name: &'static str,
        fail_install: bool,
        gate: Option<Arc<Notify>>,
        installs: AtomicUsize,
        uninstalls: AtomicUsize,
        toggles: AtomicUsize,
    }

    #[async_trait]
    impl Plugin for Counter {
        fn metadata(&self) -> PluginMetadata {
            PluginMetadata::new(self.name, "1.0.0")
        }

        async fn install(&self, _ctx: PluginContext) -> Result<()> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.installs.fetch_add(1, Ordering::SeqCst);
            if self.fail_install {
                return Err(Error::OperationFailed {
                    operation: "install".into(),
                    cause: "missing dependency".into(),
                });
            }
            Ok(())
        }

        async fn uninstall(&self) -> Result<()> {
            self.uninstalls.fetch_add(1, Ordering::SeqCst);
            Err(Error::OperationFailed {
                operation: "uninstall".into(),
                cause: "already gone".into(),
            })
        }

        fn on_enable(&self) {
            self.toggles.fetch_add(1, Ordering::SeqCst);
        }

        fn on_disable(&self) {
            self.toggles.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter(name: &'static str) -> Arc<Counter> {
        Arc::new(Counter {
            name,
            ..Counter::default()
        })
    }

    #[tokio::test]
    async fn test_register_enable_disable_unregister() {
        let manager = manager();
        let names = Arc::new(Mutex::new(Vec::new()));
        for event in [
            event_names::PLUGIN_REGISTERED,
            event_names::PLUGIN_DISABLED,
            event_names::PLUGIN_ENABLED,
            event_names::PLUGIN_UNREGISTERED,
        ] {
            let sink = Arc::clone(&names);
            manager.bus().on(event, move |e| sink.lock().unwrap().push(e.event_name().to_string()));
        }
        let plugin = counter("timeline");

        manager.register(plugin.clone()).await.unwrap();
        assert_eq!(manager.state("timeline"), Some(PluginState::Active));

        manager.disable("timeline").unwrap();
        manager.disable("timeline").unwrap();
        assert_eq!(manager.state("timeline"), Some(PluginState::Disabled));
        assert!(manager.get_active().is_empty());
        assert_eq!(manager.list().len(), 1);

        manager.enable("timeline").unwrap();
        assert_eq!(plugin.toggles.load(Ordering::SeqCst), 2);
        assert_eq!(plugin.installs.load(Ordering::SeqCst), 1);

        manager.unregister("timeline").await.unwrap();
        assert_eq!(plugin.uninstalls.load(Ordering::SeqCst), 1);
        assert!(manager.state("timeline").is_none());
        assert_eq!(
            names.lock().unwrap().as_slice(),
            &[
                "plugin:registered",
                "plugin:disabled",
                "plugin:enabled",
                "plugin:unregistered"
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let manager = manager();
        manager.register(counter("a")).await.unwrap();
        let err = manager.register(counter("a")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicatePlugin(name) if name == "a"));
    }

    #[tokio::test]
    async fn test_concurrent_registration_installs_once() {
        let manager = manager();
        let gate = Arc::new(Notify::new());
        let slow = Arc::new(Counter {
            name: "slow",
            gate: Some(Arc::clone(&gate)),
            ..Counter::default()
        });

        let first = {
            let manager = manager.clone();
            let slow = slow.clone();
            tokio::spawn(async move { manager.register(slow).await })
        };
        while manager.state("slow") != Some(PluginState::Installing) {
            tokio::task::yield_now().await;
        }

        assert!(manager.list().is_empty());
        assert!(!manager.is_registered("slow"));
        let err = manager.register(counter("slow")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicatePlugin(_)));

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(slow.installs.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state("slow"), Some(PluginState::Active));
    }

    #[tokio::test]
    async fn test_failed_install_registers_nothing() {
        let manager = manager();
        let broken = Arc::new(Counter {
            name: "broken",
            fail_install: true,
            ..Counter::default()
        });

        let err = manager.register(broken).await.unwrap_err();
        assert!(matches!(err, Error::PluginInstall { ref name, .. } if name == "broken"));
        assert!(manager.state("broken").is_none());

        manager.register(counter("broken")).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_plugin_errors() {
        let manager = manager();
        assert!(matches!(manager.enable("nope"), Err(Error::PluginNotFound(_))));
        assert!(matches!(manager.disable("nope"), Err(Error::PluginNotFound(_))));
        assert!(matches!(manager.unregister("nope").await, Err(Error::PluginNotFound(_))));
        assert!(manager.get("nope").is_none());
    }
}
