//! Plugins.
//!
//! A plugin receives a [`PluginContext`] once at install time and may keep
//! whatever it needs from it: bus subscriptions, store snapshots, the
//! inspector handle.
//!
//! # Lifecycle
//!
//! | State | Entered by | Listed | Active |
//! |-------|-----------|--------|--------|
//! | `Installing` | `register` | no | no |
//! | `Active` | successful install, `enable` | yes | yes |
//! | `Disabled` | `disable` | yes | no |
//!
//! `unregister` calls `uninstall` and removes the plugin from any listed
//! state.

mod context;
mod manager;

pub use context::{InspectorHandle, PluginContext, StorageAccess};
pub use manager::PluginManager;

pub use crate::models::{PluginMetadata, PluginState};

use crate::Result;
use async_trait::async_trait;

/// An extension installed into an inspector.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name, version and description. The name is the registry key.
    fn metadata(&self) -> PluginMetadata;

    /// Sets the plugin up.
    ///
    /// # Errors
    ///
    /// A failed install leaves nothing registered.
    async fn install(&self, ctx: PluginContext) -> Result<()>;

    /// Tears the plugin down before it is removed.
    ///
    /// # Errors
    ///
    /// Failures are logged; the plugin is removed regardless.
    async fn uninstall(&self) -> Result<()> {
        Ok(())
    }

    /// Called when the plugin is re-enabled.
    fn on_enable(&self) {}

    /// Called when the plugin is disabled.
    fn on_disable(&self) {}
}
