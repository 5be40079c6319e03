//! Performance monitor.
//!
//! Frame durations reported by the frame adapter accumulate in a sampling
//! window. When the window spans `sample_window_ms` a snapshot is taken:
//! frame rate, average and worst frame time, long frames, plus memory and
//! paint readings taken at that moment.

use super::{Monitor, MonitorCore, lock, ring};
use crate::Result;
use crate::adapters::{Adapter, FrameAdapter, FrameEvent};
use crate::bus::EventBus;
use crate::config::{LookoutConfig, PerformanceSettings, SideChannels};
use crate::models::{
    CorrelationId, IssueKind, PerformanceIssue, PerformanceSnapshot, TelemetryEvent,
};
use crate::platform::Platform;
use crate::store::{RingStore, StorageEntry};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, instrument, warn};

const MONITOR: &str = "performance";

#[derive(Debug, Default)]
struct Window {
    start: Option<f64>,
    last: f64,
    durations: Vec<f64>,
}

impl Window {
    /// Adds a frame; returns the closed window once it spans `span_ms`.
    fn push(&mut self, frame: FrameEvent, span_ms: f64) -> Option<Self> {
        let start = *self
            .start
            .get_or_insert(frame.timestamp_ms - frame.duration_ms);
        self.last = frame.timestamp_ms;
        self.durations.push(frame.duration_ms);
        (frame.timestamp_ms - start >= span_ms).then(|| self.close())
    }

    /// Takes the accumulated frames and restarts at the last frame.
    fn close(&mut self) -> Self {
        let next = Self {
            start: Some(self.last),
            last: self.last,
            durations: Vec::new(),
        };
        std::mem::replace(self, next)
    }

    fn elapsed_ms(&self) -> f64 {
        self.start.map_or(0.0, |start| self.last - start)
    }
}

struct PerformanceInner {
    core: MonitorCore,
    bus: EventBus,
    side: SideChannels,
    settings: PerformanceSettings,
    platform: Arc<Platform>,
    store: Mutex<RingStore<PerformanceSnapshot>>,
    window: Mutex<Window>,
    frames: FrameAdapter,
    generation: AtomicU64,
}

impl PerformanceInner {
    fn on_frame(&self, frame: &FrameEvent) {
        if !self.core.is_active() {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let span = self.settings.sample_window_ms as f64;
        let closed = lock(&self.window).push(*frame, span);
        if let Some(window) = closed {
            self.sample(&window);
        }
    }

    fn sample(&self, window: &Window) -> PerformanceSnapshot {
        let frame_count = u32::try_from(window.durations.len()).unwrap_or(u32::MAX);
        let elapsed = window.elapsed_ms();
        let fps = if frame_count > 0 && elapsed > 0.0 {
            f64::from(frame_count) * 1000.0 / elapsed
        } else {
            0.0
        };
        let avg_frame_ms = if frame_count > 0 {
            window.durations.iter().sum::<f64>() / f64::from(frame_count)
        } else {
            0.0
        };
        let long_frames = window
            .durations
            .iter()
            .filter(|duration| **duration > self.settings.long_frame_ms)
            .count();

        let snapshot = PerformanceSnapshot {
            id: CorrelationId::generate(),
            timestamp: crate::current_timestamp_ms(),
            fps,
            frame_count,
            avg_frame_ms,
            max_frame_ms: window.durations.iter().copied().fold(0.0, f64::max),
            long_frames: u32::try_from(long_frames).unwrap_or(u32::MAX),
            memory: self.platform.memory.current().memory_usage(),
            paint: self.platform.paint.current().paint_timings(),
        };

        lock(&self.store).push(snapshot.clone());
        metrics::counter!("lookout_records_captured_total", "monitor" => MONITOR).increment(1);
        debug!(fps = snapshot.fps, frames = frame_count, "Performance sampled");
        self.bus
            .emit(&TelemetryEvent::PerformanceSnapshot(snapshot.clone()));

        for issue in self.issues(&snapshot) {
            warn!(kind = ?issue.kind, value = issue.value, threshold = issue.threshold, "{}", issue.message);
            self.bus.emit(&TelemetryEvent::PerformanceIssue(issue.clone()));
            self.side.performance_issue(&issue);
        }
        snapshot
    }

    fn issues(&self, snapshot: &PerformanceSnapshot) -> Vec<PerformanceIssue> {
        let mut issues = Vec::new();
        let fps_threshold = self.settings.fps_threshold;
        if snapshot.frame_count > 0 && snapshot.fps < fps_threshold {
            issues.push(PerformanceIssue {
                kind: IssueKind::LowFps,
                message: format!("Frame rate {:.1} fps below {fps_threshold}", snapshot.fps),
                value: snapshot.fps,
                threshold: fps_threshold,
                snapshot_id: snapshot.id.clone(),
            });
        }
        if let Some(memory) = snapshot.memory {
            let ratio = memory.usage_ratio();
            let memory_threshold = self.settings.memory_threshold;
            if ratio > memory_threshold {
                issues.push(PerformanceIssue {
                    kind: IssueKind::HighMemory,
                    message: format!(
                        "Memory usage {:.0}% above {:.0}%",
                        ratio * 100.0,
                        memory_threshold * 100.0
                    ),
                    value: ratio,
                    threshold: memory_threshold,
                    snapshot_id: snapshot.id.clone(),
                });
            }
        }
        issues
    }
}

/// Keeps one frame request outstanding while the monitor runs.
///
/// A restart bumps the generation, which retires loops from earlier runs.
fn drive(weak: Weak<PerformanceInner>, generation: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    if !inner.core.is_active() || inner.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    let scheduler = inner.platform.frames.current();
    drop(inner);
    scheduler.request_frame(Box::new(move |_| drive(weak, generation)));
}

/// Samples frame rate, memory and paint milestones.
#[derive(Clone)]
pub struct PerformanceMonitor {
    inner: Arc<PerformanceInner>,
}

impl PerformanceMonitor {
    /// Creates a stopped monitor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCapacity`] if
    /// `max_performance_snapshots` is zero.
    pub fn new(
        config: &LookoutConfig,
        platform: &Arc<Platform>,
        bus: EventBus,
        side: SideChannels,
    ) -> Result<Self> {
        let store = ring(MONITOR, config.max_performance_snapshots)?;
        let inner = Arc::new_cyclic(|weak: &Weak<PerformanceInner>| {
            let frames = FrameAdapter::new(Arc::clone(platform));
            let weak = weak.clone();
            frames.subscribe(Arc::new(move |frame: &FrameEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_frame(frame);
                }
            }));
            PerformanceInner {
                core: MonitorCore::new(MONITOR),
                bus,
                side,
                settings: config.performance,
                platform: Arc::clone(platform),
                store: Mutex::new(store),
                window: Mutex::new(Window::default()),
                frames,
                generation: AtomicU64::new(0),
            }
        });
        Ok(Self { inner })
    }

    /// Closes the current window early and records a snapshot of it.
    ///
    /// A window without frames yields a zero frame rate and never raises a
    /// low frame rate issue.
    pub fn sample_now(&self) -> PerformanceSnapshot {
        let window = lock(&self.inner.window).close();
        self.inner.sample(&window)
    }

    /// All stored snapshots, oldest first.
    #[must_use]
    pub fn get_snapshots(&self) -> Vec<PerformanceSnapshot> {
        lock(&self.inner.store).get_all().into_iter().cloned().collect()
    }

    /// The most recent snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<PerformanceSnapshot> {
        lock(&self.inner.store).get_all().last().map(|s| (*s).clone())
    }

    /// Stored snapshots with their storage timestamps.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StorageEntry<PerformanceSnapshot>> {
        lock(&self.inner.store)
            .get_all_entries()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Replaces the store contents with `snapshots`, in order.
    pub fn restore(&self, snapshots: impl IntoIterator<Item = (u64, PerformanceSnapshot)>) {
        lock(&self.inner.store).import_entries(snapshots);
    }
}

impl Monitor for PerformanceMonitor {
    fn name(&self) -> &'static str {
        MONITOR
    }

    #[instrument(skip(self), fields(monitor = MONITOR))]
    fn start(&self) {
        let _lifecycle = self.inner.core.lifecycle();
        if !self.inner.core.activate(&[&self.inner.frames]) {
            return;
        }
        *lock(&self.inner.window) = Window::default();
        if self.inner.frames.is_installed() {
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            drive(Arc::downgrade(&self.inner), generation);
        }
    }

    #[instrument(skip(self), fields(monitor = MONITOR))]
    fn stop(&self) {
        let _lifecycle = self.inner.core.lifecycle();
        self.inner.core.deactivate(&[&self.inner.frames]);
    }

    fn is_active(&self) -> bool {
        self.inner.core.is_active()
    }

    fn clear(&self) {
        lock(&self.inner.store).clear();
    }

    fn skipped_adapters(&self) -> Vec<&'static str> {
        self.inner.core.skipped()
    }
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("active", &self.inner.core.is_active())
            .field("snapshots", &lock(&self.inner.store).size())
            .finish_non_exhaustive()
    }
}
