//! Observability setup.
//!
//! Lookout logs through `tracing` and counts through the `metrics` facade.
//! Neither installs anything by default: the host either installs its own
//! subscriber/recorder or calls [`init`] once for a ready-made subscriber.
//!
//! Counters recorded by the crate:
//!
//! | Name | Labels |
//! |------|--------|
//! | `lookout_bus_emit_total` | none |
//! | `lookout_bus_subscriptions_total` | none |
//! | `lookout_bus_stream_closed_total` | none |
//! | `lookout_listener_failures_total` | `event` |
//! | `lookout_store_evictions_total` | `store`, `reason` |
//! | `lookout_records_captured_total` | `monitor` |
//! | `lookout_adapter_install_failures_total` | `adapter` |
//! | `lookout_correlation_misses_total` | `monitor` |

use crate::config::LoggingSettings;
use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when no environment variable or setting provides one.
pub const DEFAULT_FILTER: &str = "lookout=info";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name; unknown names fall back to pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Event filter.
    pub filter: EnvFilter,
    /// Append to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::from_settings(&LoggingSettings::default())
    }
}

impl LoggingConfig {
    /// Resolves settings, giving `LOOKOUT_LOG` then `RUST_LOG` precedence
    /// over the configured filter.
    #[must_use]
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        let directive = ["LOOKOUT_LOG", "RUST_LOG"]
            .iter()
            .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
            .or_else(|| settings.filter.clone());

        Self {
            format: settings
                .format
                .as_deref()
                .map_or(LogFormat::Pretty, LogFormat::parse),
            filter: build_filter(directive.as_deref()),
            file: settings.file.clone(),
        }
    }
}

fn build_filter(directive: Option<&str>) -> EnvFilter {
    directive
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Installs a global `tracing` subscriber.
///
/// # Errors
///
/// Returns an error if logging was already initialized, another global
/// subscriber is installed, or the log file cannot be opened.
pub fn init(config: LoggingConfig) -> Result<()> {
    if OBSERVABILITY_INIT.get().is_some() {
        return Err(Error::OperationFailed {
            operation: "observability_init".to_string(),
            cause: "observability already initialized".to_string(),
        });
    }

    tracing_subscriber::registry()
        .with(log_layer(config.format, config.file.as_deref())?)
        .with(config.filter)
        .try_init()
        .map_err(init_error)?;

    OBSERVABILITY_INIT
        .set(())
        .map_err(|()| Error::OperationFailed {
            operation: "observability_init".to_string(),
            cause: "failed to mark observability initialized".to_string(),
        })
}

/// Thread-safe file writer for logging.
#[derive(Clone)]
struct LogFileWriter {
    file: Arc<Mutex<File>>,
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .file
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .file
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?;
        guard.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

type LogLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Formatting layer writing to `file`, or to stderr with colors.
fn log_layer(format: LogFormat, file: Option<&Path>) -> Result<LogLayer> {
    let writer = match file {
        Some(path) => BoxMakeWriter::new(open_log_file(path)?),
        None => BoxMakeWriter::new(io::stderr),
    };
    let base = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(file.is_none())
        .with_target(true)
        .with_thread_names(true);
    Ok(match (format, file) {
        (LogFormat::Json, _) => base.json().with_current_span(true).boxed(),
        (LogFormat::Pretty, Some(_)) => base.boxed(),
        (LogFormat::Pretty, None) => base.pretty().boxed(),
    })
}

/// Opens a log file for appending, creating parent directories.
fn open_log_file(path: &Path) -> Result<LogFileWriter> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
            operation: "create_log_dir".to_string(),
            cause: e.to_string(),
        })?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::OperationFailed {
            operation: "open_log_file".to_string(),
            cause: format!("{}: {}", path.display(), e),
        })?;

    Ok(LogFileWriter {
        file: Arc::new(Mutex::new(file)),
    })
}

#[allow(clippy::needless_pass_by_value)]
fn init_error(e: tracing_subscriber::util::TryInitError) -> Error {
    Error::OperationFailed {
        operation: "observability_init".to_string(),
        cause: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("json", LogFormat::Json ; "json")]
    #[test_case(" JSON ", LogFormat::Json ; "padded uppercase")]
    #[test_case("pretty", LogFormat::Pretty ; "pretty")]
    #[test_case("xml", LogFormat::Pretty ; "unknown falls back")]
    fn test_parse_format(input: &str, expected: LogFormat) {
        assert_eq!(LogFormat::parse(input), expected);
    }

    #[test]
    fn test_invalid_directive_uses_default_filter() {
        let filter = build_filter(Some("lookout=notalevel"));
        assert_eq!(filter.to_string(), DEFAULT_FILTER);
    }

    #[test]
    fn test_log_file_writer_appends() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("lookout.log");

        let mut writer = open_log_file(&path).expect("open log file");
        writer.write_all(b"first\n").expect("write");
        writer.flush().expect("flush");
        let mut second = open_log_file(&path).expect("reopen");
        second.write_all(b"second\n").expect("write");

        let contents = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn test_json_layer_writes_one_object_per_event() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("lookout.json");
        let layer = log_layer(LogFormat::Json, Some(&path)).expect("layer");

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(store = "console", "Store trimmed");
        });

        let contents = std::fs::read_to_string(&path).expect("read back");
        let line = contents.lines().next().expect("one event");
        let event: serde_json::Value = serde_json::from_str(line).expect("json line");
        assert_eq!(event["fields"]["message"], "Store trimmed");
        assert_eq!(event["fields"]["store"], "console");
        assert_eq!(event["level"], "INFO");
    }

    #[test]
    fn test_second_init_fails() {
        // The first call may lose to a subscriber installed elsewhere; either
        // way a second global install is refused.
        let _ = init(LoggingConfig::default());
        assert!(init(LoggingConfig::default()).is_err());
    }
}
