//! Error monitor.

use super::fingerprint::fingerprint;
use super::{Monitor, MonitorCore, lock, ring};
use crate::adapters::{CaptureOptions, CapturedError, Handler, PanicAdapter, RejectionAdapter};
use crate::bus::EventBus;
use crate::config::{ErrorNotice, LookoutConfig, SideChannels};
use crate::models::{CorrelationId, ErrorGroup, ErrorInfo, ErrorSource, StackFrame, TelemetryEvent};
use crate::platform::Platform;
use crate::store::{IndexedStore, RingStore, StorageEntry};
use crate::{Error, Result};
use regex::Regex;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tracing::{debug, instrument};

const MONITOR: &str = "errors";

/// Decides whether an intercepted error is dropped before grouping.
#[derive(Clone)]
pub enum IgnoreRule {
    /// Drops errors whose message matches.
    Pattern(Regex),
    /// Drops errors the closure accepts.
    Matcher(Arc<dyn Fn(&CapturedError) -> bool + Send + Sync>),
}

impl IgnoreRule {
    /// Compiles a message pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `pattern` is not a valid regex.
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Pattern)
            .map_err(|e| Error::InvalidInput(format!("invalid ignore pattern '{pattern}': {e}")))
    }

    /// Wraps a caller-supplied matcher.
    pub fn matcher(matcher: impl Fn(&CapturedError) -> bool + Send + Sync + 'static) -> Self {
        Self::Matcher(Arc::new(matcher))
    }

    fn matches(&self, error: &CapturedError) -> bool {
        match self {
            Self::Pattern(regex) => regex.is_match(&error.message),
            Self::Matcher(matcher) => matcher(error),
        }
    }
}

impl std::fmt::Debug for IgnoreRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pattern(regex) => f.debug_tuple("Pattern").field(&regex.as_str()).finish(),
            Self::Matcher(_) => f.write_str("Matcher(..)"),
        }
    }
}

struct ErrorInner {
    core: MonitorCore,
    bus: EventBus,
    side: SideChannels,
    max_group_occurrences: usize,
    recent: Mutex<RingStore<ErrorInfo>>,
    groups: Mutex<IndexedStore<String, ErrorGroup>>,
    ignore: RwLock<Vec<IgnoreRule>>,
    panics: PanicAdapter,
    rejections: RejectionAdapter,
}

impl ErrorInner {
    fn intake(&self, error: &CapturedError) {
        if self.core.is_active() {
            self.record(error);
        }
    }

    fn record(&self, error: &CapturedError) -> Option<ErrorInfo> {
        let ignored = self
            .ignore
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|rule| rule.matches(error));
        if ignored {
            debug!(source = error.source.as_str(), "Ignoring error");
            return None;
        }

        let info = ErrorInfo {
            id: CorrelationId::generate(),
            timestamp: error.timestamp,
            source: error.source,
            message: error.message.clone(),
            stack: error.stack.clone(),
            location: error.location.clone(),
            thread: error.thread.clone(),
            fingerprint: fingerprint(&error.message, &error.stack, error.location.as_deref()),
        };

        lock(&self.recent).push(info.clone());
        let group = {
            let mut groups = lock(&self.groups);
            if let Some(group) = groups.get_mut(&info.fingerprint) {
                group.record(info.clone(), self.max_group_occurrences);
                group.clone()
            } else {
                let group = ErrorGroup::new(info.clone());
                groups.set(info.fingerprint.clone(), group.clone());
                group
            }
        };
        metrics::counter!("lookout_records_captured_total", "monitor" => MONITOR).increment(1);
        debug!(
            fingerprint = %info.fingerprint,
            count = group.count,
            source = info.source.as_str(),
            "Error captured"
        );

        self.bus.emit(&TelemetryEvent::ErrorCaptured(info.clone()));
        self.bus.emit(&TelemetryEvent::ErrorGroupUpdated(group));
        self.side.error(&ErrorNotice::Captured(info.clone()));
        Some(info)
    }
}

/// Records panics, unhandled task failures and manually reported errors,
/// grouped by fingerprint.
#[derive(Clone)]
pub struct ErrorMonitor {
    inner: Arc<ErrorInner>,
}

impl ErrorMonitor {
    /// Creates a stopped monitor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] for a zero `max_error_entries` or
    /// `max_error_groups`, and [`Error::InvalidInput`] for an ignore pattern
    /// that does not compile.
    pub fn new(
        config: &LookoutConfig,
        platform: &Arc<Platform>,
        bus: EventBus,
        side: SideChannels,
    ) -> Result<Self> {
        let recent = ring("errors", config.max_error_entries)?;
        let groups = IndexedStore::new(config.max_error_groups)
            .map_err(|_| Error::InvalidCapacity { store: "error_groups" })?;
        let ignore = config
            .error_ignore_patterns
            .iter()
            .map(|pattern| IgnoreRule::pattern(pattern))
            .collect::<Result<Vec<_>>>()?;
        let options = CaptureOptions::from(config);

        let inner = Arc::new_cyclic(|weak: &Weak<ErrorInner>| {
            let panics = PanicAdapter::new(options);
            let rejections = RejectionAdapter::new(Arc::clone(platform), options);
            let weak = weak.clone();
            let handler: Handler<CapturedError> = Arc::new(move |error: &CapturedError| {
                if let Some(inner) = weak.upgrade() {
                    inner.intake(error);
                }
            });
            panics.subscribe(Arc::clone(&handler));
            rejections.subscribe(handler);
            ErrorInner {
                core: MonitorCore::new(MONITOR),
                bus,
                side,
                max_group_occurrences: config.max_group_occurrences,
                recent: Mutex::new(recent),
                groups: Mutex::new(groups),
                ignore: RwLock::new(ignore),
                panics,
                rejections,
            }
        });
        Ok(Self { inner })
    }

    /// Reports an error directly. Returns `None` when an ignore rule drops it.
    pub fn capture_error(
        &self,
        message: impl Into<String>,
        stack: Vec<StackFrame>,
    ) -> Option<ErrorInfo> {
        self.inner.record(&CapturedError {
            source: ErrorSource::Manual,
            message: message.into(),
            stack,
            location: None,
            thread: std::thread::current().name().map(str::to_string),
            timestamp: crate::current_timestamp_ms(),
        })
    }

    /// Adds an ignore rule.
    pub fn add_ignore_rule(&self, rule: IgnoreRule) {
        self.inner
            .ignore
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rule);
    }

    /// Recent errors, oldest first.
    #[must_use]
    pub fn get_errors(&self) -> Vec<ErrorInfo> {
        lock(&self.inner.recent).get_all().into_iter().cloned().collect()
    }

    /// Groups in first-seen order.
    #[must_use]
    pub fn get_groups(&self) -> Vec<ErrorGroup> {
        lock(&self.inner.groups)
            .get_all_values()
            .into_iter()
            .cloned()
            .collect()
    }

    /// The group for `fingerprint`.
    #[must_use]
    pub fn get_group(&self, fingerprint: &str) -> Option<ErrorGroup> {
        lock(&self.inner.groups).peek(&fingerprint.to_string()).cloned()
    }

    /// Recent errors with their storage timestamps.
    #[must_use]
    pub fn snapshot_errors(&self) -> Vec<StorageEntry<ErrorInfo>> {
        lock(&self.inner.recent)
            .get_all_entries()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Groups with their storage timestamps, in first-seen order.
    #[must_use]
    pub fn snapshot_groups(&self) -> Vec<StorageEntry<ErrorGroup>> {
        lock(&self.inner.groups)
            .get_all_entries()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Replaces recent errors and groups, in order.
    pub fn restore(
        &self,
        errors: impl IntoIterator<Item = (u64, ErrorInfo)>,
        groups: impl IntoIterator<Item = (u64, ErrorGroup)>,
    ) {
        lock(&self.inner.recent).import_entries(errors);
        let mut store = lock(&self.inner.groups);
        store.clear();
        for (timestamp, group) in groups {
            store.set_with_timestamp(group.fingerprint.clone(), group, timestamp);
        }
    }
}

impl Monitor for ErrorMonitor {
    fn name(&self) -> &'static str {
        MONITOR
    }

    #[instrument(skip(self), fields(monitor = MONITOR))]
    fn start(&self) {
        let _lifecycle = self.inner.core.lifecycle();
        self.inner
            .core
            .activate(&[&self.inner.panics, &self.inner.rejections]);
    }

    #[instrument(skip(self), fields(monitor = MONITOR))]
    fn stop(&self) {
        let _lifecycle = self.inner.core.lifecycle();
        self.inner
            .core
            .deactivate(&[&self.inner.panics, &self.inner.rejections]);
    }

    fn is_active(&self) -> bool {
        self.inner.core.is_active()
    }

    fn clear(&self) {
        lock(&self.inner.recent).clear();
        lock(&self.inner.groups).clear();
    }

    fn skipped_adapters(&self) -> Vec<&'static str> {
        self.inner.core.skipped()
    }
}

impl std::fmt::Debug for ErrorMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorMonitor")
            .field("active", &self.inner.core.is_active())
            .field("errors", &lock(&self.inner.recent).size())
            .field("groups", &lock(&self.inner.groups).size())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event_names;
    use crate::platform::Rejection;
    use serial_test::serial;
    use std::time::{Duration, Instant};

    fn frame(function: &str, line: u32) -> StackFrame {
        StackFrame::new(function, Some("src/shop.rs".into()), Some(line))
    }

    fn monitor_with(config: &LookoutConfig, side: SideChannels) -> (Arc<Platform>, EventBus, ErrorMonitor) {
        let platform = Arc::new(Platform::default());
        let bus = EventBus::new();
        let monitor = ErrorMonitor::new(config, &platform, bus.clone(), side).unwrap();
        (platform, bus, monitor)
    }

    #[test]
    fn test_repeated_fault_joins_one_group() {
        let (_platform, _bus, monitor) = monitor_with(&LookoutConfig::default(), SideChannels::default());
        let stack = vec![frame("shop::checkout", 10)];

        let first = monitor.capture_error("order 17 failed", stack.clone()).unwrap();
        let second = monitor.capture_error("order 18 failed", stack).unwrap();
        monitor.capture_error("other", vec![frame("shop::cart", 3)]);

        assert_eq!(first.fingerprint, second.fingerprint);
        let groups = monitor.get_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[0].representative.id, first.id);
        assert_eq!(groups[0].occurrences.len(), 2);
        assert_eq!(monitor.get_errors().len(), 3);
        assert_eq!(monitor.get_group(&first.fingerprint).map(|g| g.count), Some(2));
    }

    #[test]
    fn test_deeper_frame_line_does_not_split_group() {
        let (_platform, _bus, monitor) = monitor_with(&LookoutConfig::default(), SideChannels::default());

        let first = monitor
            .capture_error(
                "payment declined",
                vec![frame("shop::checkout", 10), frame("shop::main", 20)],
            )
            .unwrap();
        let second = monitor
            .capture_error(
                "payment declined",
                vec![frame("shop::checkout", 10), frame("shop::main", 99)],
            )
            .unwrap();

        assert_eq!(first.fingerprint, second.fingerprint);
        let groups = monitor.get_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 2);
    }

    #[test]
    fn test_group_order_is_first_seen() {
        let (_platform, _bus, monitor) = monitor_with(&LookoutConfig::default(), SideChannels::default());
        monitor.capture_error("a", vec![frame("shop::a", 1)]);
        monitor.capture_error("b", vec![frame("shop::b", 1)]);
        monitor.capture_error("a", vec![frame("shop::a", 1)]);

        let messages: Vec<String> = monitor
            .get_groups()
            .into_iter()
            .map(|g| g.representative.message)
            .collect();
        assert_eq!(messages, vec!["a", "b"]);
    }

    #[test]
    fn test_ignore_rules_drop_before_storage() {
        let config = LookoutConfig {
            error_ignore_patterns: vec!["^ResizeObserver".into()],
            ..LookoutConfig::default()
        };
        let (_platform, bus, monitor) = monitor_with(&config, SideChannels::default());
        monitor.add_ignore_rule(IgnoreRule::matcher(|error| error.message.contains("extension")));
        let emitted = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&emitted);
        bus.on(event_names::ERROR_CAPTURED, move |_| *sink.lock().unwrap() += 1);

        assert!(monitor.capture_error("ResizeObserver loop", Vec::new()).is_none());
        assert!(monitor.capture_error("browser extension noise", Vec::new()).is_none());
        assert!(monitor.capture_error("real failure", Vec::new()).is_some());

        assert_eq!(monitor.get_errors().len(), 1);
        assert_eq!(monitor.get_groups().len(), 1);
        assert_eq!(*emitted.lock().unwrap(), 1);
    }

    #[test]
    fn test_invalid_ignore_pattern_is_rejected() {
        let config = LookoutConfig {
            error_ignore_patterns: vec!["(unclosed".into()],
            ..LookoutConfig::default()
        };
        let result = ErrorMonitor::new(
            &config,
            &Arc::new(Platform::default()),
            EventBus::new(),
            SideChannels::default(),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_side_channel_and_group_events() {
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);
        let side = SideChannels::default().with_on_error(move |notice| {
            if let ErrorNotice::Captured(info) = notice {
                sink.lock().unwrap().push(info.message.clone());
            }
        });
        let (_platform, bus, monitor) = monitor_with(&LookoutConfig::default(), side);
        let counts = Arc::new(Mutex::new(Vec::new()));
        let count_sink = Arc::clone(&counts);
        bus.on(event_names::ERROR_GROUP_UPDATED, move |event| {
            if let TelemetryEvent::ErrorGroupUpdated(group) = event {
                count_sink.lock().unwrap().push(group.count);
            }
        });

        monitor.capture_error("boom", Vec::new());
        monitor.capture_error("boom", Vec::new());

        assert_eq!(notices.lock().unwrap().as_slice(), &["boom", "boom"]);
        assert_eq!(counts.lock().unwrap().as_slice(), &[1, 2]);
    }

    #[test]
    fn test_group_store_evicts_least_recent() {
        let config = LookoutConfig {
            max_error_groups: 2,
            ..LookoutConfig::default()
        };
        let (_platform, _bus, monitor) = monitor_with(&config, SideChannels::default());
        let a = monitor.capture_error("a", vec![frame("shop::a", 1)]).unwrap();
        let b = monitor.capture_error("b", vec![frame("shop::b", 1)]).unwrap();
        monitor.capture_error("a", vec![frame("shop::a", 1)]);
        monitor.capture_error("c", vec![frame("shop::c", 1)]);

        assert!(monitor.get_group(&a.fingerprint).is_some());
        assert!(monitor.get_group(&b.fingerprint).is_none());
    }

    #[test]
    #[serial(panic_hook)]
    fn test_rejections_are_captured_while_active() {
        let (platform, _bus, monitor) = monitor_with(&LookoutConfig::default(), SideChannels::default());
        monitor.start();
        platform.report_rejection(&Rejection::new("task exploded").with_task("sync-job"));
        monitor.stop();
        platform.report_rejection(&Rejection::new("after stop"));

        let errors = monitor.get_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source, ErrorSource::Rejection);
        assert_eq!(errors[0].thread.as_deref(), Some("sync-job"));
    }

    #[test]
    #[serial(panic_hook)]
    fn test_panics_are_captured() {
        let (_platform, _bus, monitor) = monitor_with(&LookoutConfig::default(), SideChannels::default());
        monitor.start();

        let worker = std::thread::spawn(|| panic!("monitor sees panic 7"));
        assert!(worker.join().is_err());

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut found = None;
        while found.is_none() && Instant::now() < deadline {
            found = monitor
                .get_errors()
                .into_iter()
                .find(|e| e.message.contains("monitor sees panic"));
            std::thread::sleep(Duration::from_millis(10));
        }
        monitor.stop();

        let error = found.expect("panic recorded");
        assert_eq!(error.source, ErrorSource::Panic);
    }
}
