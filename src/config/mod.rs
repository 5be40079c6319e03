//! Configuration management.
//!
//! [`LookoutConfig`] carries every tunable with a default. It can be loaded
//! from a TOML file (all fields optional) and is then adjusted by
//! environment overrides:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `LOOKOUT_MAX_NETWORK_ENTRIES` | `max_network_entries` |
//! | `LOOKOUT_MAX_CONSOLE_ENTRIES` | `max_console_entries` |
//! | `LOOKOUT_CAPTURE_STACK_TRACES` | `capture_stack_traces` |
//!
//! Callbacks cannot live in a file; they are set on [`SideChannels`].

mod features;

pub use features::{ConfigFileMonitors, MonitorFlags};

use crate::Error;
use crate::models::{ErrorInfo, PerformanceIssue};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default request/response body cap in bytes.
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024;

/// Main configuration for an inspector.
#[derive(Debug, Clone)]
pub struct LookoutConfig {
    /// Network store capacity.
    pub max_network_entries: usize,
    /// Console store capacity.
    pub max_console_entries: usize,
    /// Recent-error store capacity.
    pub max_error_entries: usize,
    /// Error group store capacity.
    pub max_error_groups: usize,
    /// Occurrences kept per error group.
    pub max_group_occurrences: usize,
    /// Performance snapshot store capacity.
    pub max_performance_snapshots: usize,
    /// Frames kept per socket record.
    pub max_socket_messages: usize,
    /// Body capture cap in bytes.
    pub max_body_size: usize,
    /// Capture call-site stacks for warn/error logs and panics.
    pub capture_stack_traces: bool,
    /// Bus emission filters for network records.
    pub network_filters: NetworkFilters,
    /// Regular expressions matched against error messages; matches are dropped.
    pub error_ignore_patterns: Vec<String>,
    /// Performance sampling settings.
    pub performance: PerformanceSettings,
    /// Which monitors to start.
    pub monitors: MonitorFlags,
    /// Logging settings for [`crate::observability::init`].
    pub logging: LoggingSettings,
}

impl Default for LookoutConfig {
    fn default() -> Self {
        Self {
            max_network_entries: 500,
            max_console_entries: 1000,
            max_error_entries: 100,
            max_error_groups: 100,
            max_group_occurrences: 10,
            max_performance_snapshots: 120,
            max_socket_messages: 100,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            capture_stack_traces: true,
            network_filters: NetworkFilters::default(),
            error_ignore_patterns: Vec::new(),
            performance: PerformanceSettings::default(),
            monitors: MonitorFlags::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Which network records are kept off the bus.
///
/// Filtered records are still stored; only emission is suppressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkFilters {
    /// Hide requests for static assets (scripts, styles, images, fonts).
    pub hide_assets: bool,
    /// Hide responses served from a cache.
    pub hide_cached: bool,
}

/// Performance sampling settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSettings {
    /// Frame rate below which an issue is raised.
    pub fps_threshold: f64,
    /// Memory usage ratio above which an issue is raised.
    pub memory_threshold: f64,
    /// Length of one sampling window in milliseconds.
    pub sample_window_ms: u64,
    /// Frames longer than this count as long frames.
    pub long_frame_ms: f64,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            fps_threshold: 30.0,
            memory_threshold: 0.9,
            sample_window_ms: 1000,
            long_frame_ms: 50.0,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingSettings {
    /// `"pretty"` or `"json"`.
    pub format: Option<String>,
    /// `EnvFilter` directive, used when neither `LOOKOUT_LOG` nor `RUST_LOG` is set.
    pub filter: Option<String>,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// What the `on_error` side-channel receives.
#[derive(Debug, Clone)]
pub enum ErrorNotice {
    /// A host error was captured by the error monitor.
    Captured(ErrorInfo),
    /// Lookout itself failed, e.g. a bus listener panicked.
    Internal(Error),
}

/// Callback receiving error notices.
pub type ErrorCallback = Arc<dyn Fn(&ErrorNotice) + Send + Sync>;

/// Callback receiving performance issues.
pub type IssueCallback = Arc<dyn Fn(&PerformanceIssue) + Send + Sync>;

/// Host callbacks invoked alongside bus emission.
#[derive(Clone, Default)]
pub struct SideChannels {
    /// Receives captured errors and internal failures.
    pub on_error: Option<ErrorCallback>,
    /// Receives performance threshold crossings.
    pub on_performance_issue: Option<IssueCallback>,
}

impl SideChannels {
    /// Sets the error callback.
    #[must_use]
    pub fn with_on_error(mut self, callback: impl Fn(&ErrorNotice) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Sets the performance issue callback.
    #[must_use]
    pub fn with_on_performance_issue(
        mut self,
        callback: impl Fn(&PerformanceIssue) + Send + Sync + 'static,
    ) -> Self {
        self.on_performance_issue = Some(Arc::new(callback));
        self
    }

    pub(crate) fn error(&self, notice: &ErrorNotice) {
        if let Some(callback) = &self.on_error {
            callback(notice);
        }
    }

    pub(crate) fn performance_issue(&self, issue: &PerformanceIssue) {
        if let Some(callback) = &self.on_performance_issue {
            callback(issue);
        }
    }
}

impl fmt::Debug for SideChannels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideChannels")
            .field("on_error", &self.on_error.is_some())
            .field("on_performance_issue", &self.on_performance_issue.is_some())
            .finish()
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Network store capacity.
    pub max_network_entries: Option<usize>,
    /// Console store capacity.
    pub max_console_entries: Option<usize>,
    /// Recent-error store capacity.
    pub max_error_entries: Option<usize>,
    /// Error group store capacity.
    pub max_error_groups: Option<usize>,
    /// Occurrences kept per group.
    pub max_group_occurrences: Option<usize>,
    /// Snapshot store capacity.
    pub max_performance_snapshots: Option<usize>,
    /// Frames kept per socket.
    pub max_socket_messages: Option<usize>,
    /// Body cap in bytes.
    pub max_body_size: Option<usize>,
    /// Stack capture switch.
    pub capture_stack_traces: Option<bool>,
    /// Ignore patterns.
    pub error_ignore_patterns: Option<Vec<String>>,
    /// Network filters.
    pub network_filters: Option<ConfigFileNetworkFilters>,
    /// Performance settings.
    pub performance: Option<ConfigFilePerformance>,
    /// Monitor switches.
    pub monitors: Option<ConfigFileMonitors>,
    /// Logging settings.
    pub logging: Option<ConfigFileLogging>,
}

/// `[network_filters]` section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileNetworkFilters {
    /// Hide static assets.
    pub hide_assets: Option<bool>,
    /// Hide cached responses.
    pub hide_cached: Option<bool>,
}

/// `[performance]` section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFilePerformance {
    /// FPS floor.
    pub fps_threshold: Option<f64>,
    /// Memory ratio ceiling.
    pub memory_threshold: Option<f64>,
    /// Window length.
    pub sample_window_ms: Option<u64>,
    /// Long-frame threshold.
    pub long_frame_ms: Option<f64>,
}

/// `[logging]` section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// Output format.
    pub format: Option<String>,
    /// Filter directive.
    pub filter: Option<String>,
    /// Log file path.
    pub file: Option<String>,
}

impl LookoutConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the default configuration with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Loads configuration from a file path, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid for [`ConfigFile`].
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self::from_config_file(file).with_env_overrides())
    }

    /// Converts a `ConfigFile` to `LookoutConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = file.$field {
                    config.$field = v;
                })*
            };
        }
        take!(
            max_network_entries,
            max_console_entries,
            max_error_entries,
            max_error_groups,
            max_group_occurrences,
            max_performance_snapshots,
            max_socket_messages,
            max_body_size,
            capture_stack_traces,
            error_ignore_patterns,
        );

        if let Some(filters) = file.network_filters {
            if let Some(v) = filters.hide_assets {
                config.network_filters.hide_assets = v;
            }
            if let Some(v) = filters.hide_cached {
                config.network_filters.hide_cached = v;
            }
        }
        if let Some(perf) = file.performance {
            if let Some(v) = perf.fps_threshold {
                config.performance.fps_threshold = v;
            }
            if let Some(v) = perf.memory_threshold {
                config.performance.memory_threshold = v;
            }
            if let Some(v) = perf.sample_window_ms {
                config.performance.sample_window_ms = v;
            }
            if let Some(v) = perf.long_frame_ms {
                config.performance.long_frame_ms = v;
            }
        }
        if let Some(monitors) = file.monitors {
            config.monitors.apply(&monitors);
        }
        if let Some(logging) = file.logging {
            config.logging = LoggingSettings {
                format: logging.format,
                filter: logging.filter,
                file: logging.file.map(PathBuf::from),
            };
        }

        config
    }

    /// Applies `LOOKOUT_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = parse_usize(lookup("LOOKOUT_MAX_NETWORK_ENTRIES")) {
            self.max_network_entries = v;
        }
        if let Some(v) = parse_usize(lookup("LOOKOUT_MAX_CONSOLE_ENTRIES")) {
            self.max_console_entries = v;
        }
        if let Some(v) = parse_bool(lookup("LOOKOUT_CAPTURE_STACK_TRACES")) {
            self.capture_stack_traces = v;
        }
        self
    }

    /// Sets the monitor switches.
    #[must_use]
    pub const fn with_monitors(mut self, monitors: MonitorFlags) -> Self {
        self.monitors = monitors;
        self
    }

    /// Sets the network filters.
    #[must_use]
    pub const fn with_network_filters(mut self, filters: NetworkFilters) -> Self {
        self.network_filters = filters;
        self
    }
}

fn parse_bool(value: Option<String>) -> Option<bool> {
    value.map(|value| {
        let value = value.to_lowercase();
        value == "true" || value == "1" || value == "yes"
    })
}

fn parse_usize(value: Option<String>) -> Option<usize> {
    value.and_then(|value| value.trim().parse::<usize>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LookoutConfig::default();
        assert_eq!(config.max_network_entries, 500);
        assert_eq!(config.max_console_entries, 1000);
        assert_eq!(config.max_error_groups, 100);
        assert_eq!(config.max_body_size, 10 * 1024);
        assert_eq!(config.performance.sample_window_ms, 1000);
        assert!(config.capture_stack_traces);
        assert!(!config.network_filters.hide_assets);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
max_network_entries = 42
error_ignore_patterns = ["^ResizeObserver"]

[network_filters]
hide_assets = true

[performance]
fps_threshold = 24.0

[monitors]
performance = false

[logging]
format = "json"
file = "/tmp/lookout.log"
"#
        )
        .expect("write config");

        let config = LookoutConfig::load_from_file(file.path()).expect("load config");
        assert_eq!(config.max_network_entries, 42);
        assert_eq!(config.max_console_entries, 1000);
        assert_eq!(config.error_ignore_patterns, vec!["^ResizeObserver"]);
        assert!(config.network_filters.hide_assets);
        assert!(!config.network_filters.hide_cached);
        assert!((config.performance.fps_threshold - 24.0).abs() < f64::EPSILON);
        assert!(!config.monitors.performance);
        assert!(config.monitors.network);
        assert_eq!(config.logging.format.as_deref(), Some("json"));
        assert_eq!(config.logging.file, Some(PathBuf::from("/tmp/lookout.log")));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = LookoutConfig::load_from_file(Path::new("/nonexistent/lookout.toml"))
            .expect_err("missing file");
        assert!(matches!(err, Error::OperationFailed { ref operation, .. } if operation == "read_config_file"));
    }

    #[test]
    fn test_invalid_toml_fails() {
        let err = LookoutConfig::from_toml("max_network_entries = \"many\"").expect_err("bad type");
        assert!(matches!(err, Error::OperationFailed { ref operation, .. } if operation == "parse_config_file"));
    }

    #[test]
    fn test_env_overrides() {
        let config = LookoutConfig::default().with_overrides_from(|key| match key {
            "LOOKOUT_MAX_NETWORK_ENTRIES" => Some(" 7 ".to_string()),
            "LOOKOUT_MAX_CONSOLE_ENTRIES" => Some("lots".to_string()),
            "LOOKOUT_CAPTURE_STACK_TRACES" => Some("no".to_string()),
            _ => None,
        });

        assert_eq!(config.max_network_entries, 7);
        assert_eq!(config.max_console_entries, 1000);
        assert!(!config.capture_stack_traces);
    }

    #[test]
    fn test_side_channels_invoke_callbacks() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let channels = SideChannels::default().with_on_error(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        channels.error(&ErrorNotice::Internal(Error::InvalidInput("x".into())));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(format!("{channels:?}").contains("on_error: true"));
    }
}
