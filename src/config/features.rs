//! Monitor switches.

use serde::Deserialize;

/// Which monitors an inspector starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorFlags {
    /// Capture HTTP and socket traffic.
    pub network: bool,
    /// Capture logging calls.
    pub console: bool,
    /// Capture panics and rejections.
    pub errors: bool,
    /// Sample frame timing, memory and paint metrics.
    pub performance: bool,
}

impl Default for MonitorFlags {
    fn default() -> Self {
        Self::all()
    }
}

impl MonitorFlags {
    /// Every monitor enabled.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            network: true,
            console: true,
            errors: true,
            performance: true,
        }
    }

    /// Every monitor disabled.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            network: false,
            console: false,
            errors: false,
            performance: false,
        }
    }

    /// Returns the names of the enabled monitors.
    #[must_use]
    pub fn enabled(&self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(4);
        if self.network {
            names.push("network");
        }
        if self.console {
            names.push("console");
        }
        if self.errors {
            names.push("errors");
        }
        if self.performance {
            names.push("performance");
        }
        names
    }

    pub(crate) fn apply(&mut self, file: &ConfigFileMonitors) {
        if let Some(v) = file.network {
            self.network = v;
        }
        if let Some(v) = file.console {
            self.console = v;
        }
        if let Some(v) = file.errors {
            self.errors = v;
        }
        if let Some(v) = file.performance {
            self.performance = v;
        }
    }
}

/// `[monitors]` section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileMonitors {
    /// Network monitor.
    pub network: Option<bool>,
    /// Console monitor.
    pub console: Option<bool>,
    /// Error monitor.
    pub errors: Option<bool>,
    /// Performance monitor.
    pub performance: Option<bool>,
}
