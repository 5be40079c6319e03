//! Plugin metadata and lifecycle state.

use serde::{Deserialize, Serialize};

/// Descriptive metadata a plugin declares about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique registration name.
    pub name: String,
    /// Plugin version string.
    pub version: String,
    /// Optional description.
    pub description: Option<String>,
}

impl PluginMetadata {
    /// Creates metadata without a description.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
        }
    }

    /// Adds a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Lifecycle state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// `install` is still running.
    Installing,
    /// Installed and receiving traffic.
    Active,
    /// Installed but switched off.
    Disabled,
}
