//! Implementations installed in a fresh [`super::Platform`].

use super::surfaces::{
    Console, FrameCallback, FrameScheduler, HttpFetch, HttpRequest, HttpResponse, HttpSend,
    MemoryProbe, PaintTimeline, Rejection, RejectionSink, SendCallback, SocketConnection,
    SocketConnector, SocketListener, TransportError,
};
use crate::models::{LogLevel, MemoryUsage, PaintTimings};
use async_trait::async_trait;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

const NO_TRANSPORT: &str = "no transport installed for this entry point";

/// Fails every request; stands in until the host installs a transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

#[async_trait]
impl HttpFetch for Unconfigured {
    async fn fetch(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Err(TransportError::new(NO_TRANSPORT))
    }
}

impl HttpSend for Unconfigured {
    fn send(&self, _request: HttpRequest, on_complete: SendCallback) {
        on_complete(Err(TransportError::new(NO_TRANSPORT)));
    }
}

impl SocketConnector for Unconfigured {
    fn connect(
        &self,
        _url: &str,
        _listener: Arc<dyn SocketListener>,
    ) -> Result<Arc<dyn SocketConnection>, TransportError> {
        Err(TransportError::new(NO_TRANSPORT))
    }
}

/// Writes logging calls to stderr as `[level] arg arg ...`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrConsole;

impl Console for StderrConsole {
    fn write(&self, level: LogLevel, args: &[serde_json::Value]) {
        let line = args
            .iter()
            .map(|arg| match arg {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(std::io::stderr().lock(), "[{level}] {line}");
    }
}

/// Logs unhandled task failures through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRejectionSink;

impl RejectionSink for TracingRejectionSink {
    fn report(&self, rejection: &Rejection) {
        tracing::error!(
            task = rejection.task.as_deref().unwrap_or("<unnamed>"),
            location = rejection.location.as_deref().unwrap_or("<unknown>"),
            "Unhandled task failure: {}",
            rejection.message
        );
    }
}

/// Frame scheduler driven by the host's render loop.
///
/// Callbacks requested during [`ManualFrameScheduler::tick`] run on the
/// following tick.
#[derive(Default)]
pub struct ManualFrameScheduler {
    queue: Mutex<Vec<FrameCallback>>,
}

impl ManualFrameScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every callback queued before this call with `timestamp_ms`.
    ///
    /// Returns the number of callbacks run.
    pub fn tick(&self, timestamp_ms: f64) -> usize {
        let due = std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner));
        let count = due.len();
        for callback in due {
            callback(timestamp_ms);
        }
        count
    }

    /// Number of callbacks waiting for the next tick.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl FrameScheduler for ManualFrameScheduler {
    fn request_frame(&self, callback: FrameCallback) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }
}

impl std::fmt::Debug for ManualFrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualFrameScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Reads process memory from procfs; reports nothing elsewhere.
///
/// `used` is the resident set, `total` the virtual size and `limit` the
/// machine's physical memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    fn memory_usage(&self) -> Option<MemoryUsage> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_proc_memory(&status, &meminfo)
    }
}

fn parse_kb_value(s: &str) -> Option<u64> {
    s.split_whitespace().next()?.parse::<u64>().ok()
}

fn field_bytes(text: &str, prefix: &str) -> Option<u64> {
    text.lines()
        .find_map(|line| line.strip_prefix(prefix))
        .and_then(parse_kb_value)
        .map(|kb| kb * 1024)
}

pub(crate) fn parse_proc_memory(status: &str, meminfo: &str) -> Option<MemoryUsage> {
    Some(MemoryUsage {
        used_bytes: field_bytes(status, "VmRSS:")?,
        total_bytes: field_bytes(status, "VmSize:")?,
        limit_bytes: field_bytes(meminfo, "MemTotal:")?,
    })
}

/// Paint milestones recorded by the host.
#[derive(Debug, Default)]
pub struct RecordedPaintTimeline {
    timings: Mutex<PaintTimings>,
}

impl RecordedPaintTimeline {
    /// Creates an empty timeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records first paint; later calls are ignored.
    pub fn mark_first_paint(&self, at_ms: f64) {
        let mut timings = self.timings.lock().unwrap_or_else(PoisonError::into_inner);
        timings.first_paint_ms.get_or_insert(at_ms);
    }

    /// Records first contentful paint; later calls are ignored.
    pub fn mark_first_contentful_paint(&self, at_ms: f64) {
        let mut timings = self.timings.lock().unwrap_or_else(PoisonError::into_inner);
        timings.first_contentful_paint_ms.get_or_insert(at_ms);
    }
}

impl PaintTimeline for RecordedPaintTimeline {
    fn paint_timings(&self) -> PaintTimings {
        *self.timings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_unconfigured_fetch_fails() {
        let err = Unconfigured
            .fetch(HttpRequest::get("https://x.test"))
            .await
            .expect_err("no transport");
        assert_eq!(err.message, NO_TRANSPORT);
    }

    #[test]
    fn test_unconfigured_send_completes_with_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        Unconfigured.send(
            HttpRequest::get("https://x.test"),
            Box::new(move |result| {
                assert!(result.is_err());
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manual_scheduler_defers_rerequests_to_next_tick() {
        let scheduler = Arc::new(ManualFrameScheduler::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let inner_scheduler = Arc::clone(&scheduler);
        let inner_runs = Arc::clone(&runs);
        scheduler.request_frame(Box::new(move |_| {
            inner_runs.fetch_add(1, Ordering::SeqCst);
            let again = Arc::clone(&inner_runs);
            inner_scheduler.request_frame(Box::new(move |_| {
                again.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        assert_eq!(scheduler.tick(16.0), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.tick(32.0), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_parse_proc_memory() {
        let status = "Name:\tapp\nVmSize:\t  2048 kB\nVmRSS:\t  1024 kB\n";
        let meminfo = "MemTotal:       8192 kB\nMemFree:        100 kB\n";
        let usage = parse_proc_memory(status, meminfo).expect("parsed");
        assert_eq!(usage.used_bytes, 1024 * 1024);
        assert_eq!(usage.total_bytes, 2048 * 1024);
        assert_eq!(usage.limit_bytes, 8192 * 1024);
        assert!(parse_proc_memory("Name:\tapp\n", meminfo).is_none());
    }

    #[test]
    fn test_paint_marks_keep_first_value() {
        let timeline = RecordedPaintTimeline::new();
        timeline.mark_first_paint(120.0);
        timeline.mark_first_paint(300.0);
        let timings = timeline.paint_timings();
        assert_eq!(timings.first_paint_ms, Some(120.0));
        assert_eq!(timings.first_contentful_paint_ms, None);
    }
}
