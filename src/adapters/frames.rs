//! Frame timing adapter.

use super::{Adapter, Handler, HandlerId, Handlers, Installation, Liveness, guarded};
use crate::Result;
use crate::platform::{FrameCallback, FrameScheduler, Platform};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

const ADAPTER: &str = "frames";

/// One observed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameEvent {
    /// Frame timestamp reported by the scheduler (ms).
    pub timestamp_ms: f64,
    /// Time since the previous observed frame (ms).
    pub duration_ms: f64,
}

#[derive(Debug, Default)]
struct FrameShared {
    active: AtomicBool,
    last_frame: Mutex<Option<f64>>,
    handlers: Handlers<FrameEvent>,
}

impl FrameShared {
    /// Several callbacks share one frame timestamp; only the first counts.
    fn observe(&self, timestamp_ms: f64) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let event = {
            let mut last = self.last_frame.lock().unwrap_or_else(PoisonError::into_inner);
            match *last {
                Some(previous) if timestamp_ms <= previous => return,
                Some(previous) => {
                    *last = Some(timestamp_ms);
                    FrameEvent {
                        timestamp_ms,
                        duration_ms: timestamp_ms - previous,
                    }
                },
                None => {
                    *last = Some(timestamp_ms);
                    return;
                },
            }
        };
        self.handlers.emit(ADAPTER, &event);
    }
}

struct FrameWrapper {
    original: Arc<dyn FrameScheduler>,
    shared: Arc<FrameShared>,
    live: Liveness,
}

impl FrameScheduler for FrameWrapper {
    fn request_frame(&self, callback: FrameCallback) {
        if !self.live.is_live() {
            self.original.request_frame(callback);
            return;
        }
        let shared = Arc::clone(&self.shared);
        self.original.request_frame(Box::new(move |timestamp_ms| {
            guarded(ADAPTER, || shared.observe(timestamp_ms));
            callback(timestamp_ms);
        }));
    }
}

/// Wraps the platform's frame scheduler and reports frame durations.
///
/// Durations are measured between consecutive distinct frame timestamps
/// seen by any callback routed through the scheduler.
#[derive(Debug)]
pub struct FrameAdapter {
    platform: Arc<Platform>,
    shared: Arc<FrameShared>,
    installation: Installation<dyn FrameScheduler>,
}

impl FrameAdapter {
    /// Creates an uninstalled adapter.
    #[must_use]
    pub fn new(platform: Arc<Platform>) -> Self {
        Self {
            platform,
            shared: Arc::new(FrameShared::default()),
            installation: Installation::new(ADAPTER),
        }
    }

    /// Registers a handler for observed frames.
    pub fn subscribe(&self, handler: Handler<FrameEvent>) -> HandlerId {
        self.shared.handlers.add(handler)
    }

    /// Removes a handler.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.shared.handlers.remove(id)
    }
}

impl Adapter for FrameAdapter {
    fn name(&self) -> &'static str {
        ADAPTER
    }

    fn install(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        self.installation.install(
            &self.platform.frames,
            |original: Arc<dyn FrameScheduler>, live| -> Arc<dyn FrameScheduler> {
                Arc::new(FrameWrapper {
                    original,
                    shared,
                    live,
                })
            },
        )?;
        *self
            .shared
            .last_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.shared.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn uninstall(&self) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.installation.uninstall(&self.platform.frames);
    }

    fn is_installed(&self) -> bool {
        self.installation.is_installed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ManualFrameScheduler;

    #[test]
    fn test_frame_durations_between_distinct_timestamps() {
        let platform = Arc::new(Platform::default());
        let scheduler = Arc::new(ManualFrameScheduler::new());
        platform
            .frames
            .replace(Arc::clone(&scheduler) as Arc<dyn FrameScheduler>);
        let adapter = FrameAdapter::new(Arc::clone(&platform));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        adapter.subscribe(Arc::new(move |event: &FrameEvent| {
            sink.lock().unwrap().push(*event);
        }));
        adapter.install().unwrap();

        for timestamp in [0.0, 16.0, 16.0, 50.0] {
            // Two callbacks per frame share the timestamp.
            platform.frames.current().request_frame(Box::new(|_| {}));
            platform.frames.current().request_frame(Box::new(|_| {}));
            scheduler.tick(timestamp);
        }

        let durations: Vec<f64> = events.lock().unwrap().iter().map(|e| e.duration_ms).collect();
        assert_eq!(durations, vec![16.0, 34.0]);
    }

    #[test]
    fn test_host_callbacks_still_run_after_uninstall() {
        let platform = Arc::new(Platform::default());
        let scheduler = Arc::new(ManualFrameScheduler::new());
        platform
            .frames
            .replace(Arc::clone(&scheduler) as Arc<dyn FrameScheduler>);
        let adapter = FrameAdapter::new(Arc::clone(&platform));
        adapter.install().unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        platform
            .frames
            .current()
            .request_frame(Box::new(move |_| flag.store(true, Ordering::SeqCst)));
        adapter.uninstall();
        scheduler.tick(1.0);
        assert!(ran.load(Ordering::SeqCst));
    }
}
