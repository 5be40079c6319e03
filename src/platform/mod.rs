//! Host entry points.
//!
//! A [`Platform`] is the set of global entry points the host routes work
//! through. Each slot is an [`EntryPoint`] holding the current
//! implementation; host code always calls through `slot.current()`, so an
//! adapter that swaps the slot sees every call made after installation.
//!
//! ```rust,ignore
//! let platform = Arc::new(Platform::default());
//! platform.fetch.replace(Arc::new(MyHttpClient::new()));
//!
//! let response = platform.fetch.current().fetch(HttpRequest::get(url)).await?;
//! ```

mod defaults;
mod surfaces;

pub use defaults::{
    ManualFrameScheduler, ProcessMemoryProbe, RecordedPaintTimeline, StderrConsole,
    TracingRejectionSink, Unconfigured,
};
pub use surfaces::{
    Body, Console, FrameCallback, FrameScheduler, HttpFetch, HttpRequest, HttpResponse, HttpSend,
    MemoryProbe, PaintTimeline, Rejection, RejectionSink, SendCallback, SocketConnection,
    SocketConnector, SocketFrame, SocketListener, TransportError,
};

use crate::models::LogLevel;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// A swappable global entry point.
pub struct EntryPoint<T: ?Sized> {
    name: &'static str,
    current: RwLock<Arc<T>>,
    sealed: AtomicBool,
}

/// Result of swapping a slot through [`EntryPoint::wrap`].
pub struct Swap<T: ?Sized> {
    /// The implementation that was current before the swap.
    pub original: Arc<T>,
    /// The implementation now installed.
    pub replacement: Arc<T>,
}

impl<T: ?Sized> EntryPoint<T> {
    /// Creates a slot holding `initial`.
    pub fn new(name: &'static str, initial: Arc<T>) -> Self {
        Self {
            name,
            current: RwLock::new(initial),
            sealed: AtomicBool::new(false),
        }
    }

    /// The slot name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The implementation calls should go through right now.
    #[must_use]
    pub fn current(&self) -> Arc<T> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Installs a host implementation, returning the previous one.
    ///
    /// Host replacements bypass the seal; only instrumentation honors it.
    pub fn replace(&self, implementation: Arc<T>) -> Arc<T> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, implementation)
    }

    /// Refuses instrumentation until [`EntryPoint::unseal`].
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    /// Allows instrumentation again.
    pub fn unseal(&self) {
        self.sealed.store(false, Ordering::SeqCst);
    }

    /// Whether instrumentation is refused.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Whether `candidate` is the implementation currently installed.
    #[must_use]
    pub fn is_current(&self, candidate: &Arc<T>) -> bool {
        Arc::ptr_eq(
            &self.current.read().unwrap_or_else(PoisonError::into_inner),
            candidate,
        )
    }

    /// Atomically replaces the current implementation with `wrap(current)`.
    ///
    /// Returns `None` without touching the slot when it is sealed.
    pub fn wrap(&self, wrap: impl FnOnce(Arc<T>) -> Arc<T>) -> Option<Swap<T>> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if self.is_sealed() {
            return None;
        }
        let original = Arc::clone(&guard);
        let replacement = wrap(Arc::clone(&original));
        *guard = Arc::clone(&replacement);
        Some(Swap {
            original,
            replacement,
        })
    }

    /// Puts `swap.original` back if `swap.replacement` is still current.
    ///
    /// Returns false and leaves the slot untouched when something was
    /// installed on top of our replacement; a wrapper stacked later holds
    /// ours as its original, so taking ours out would drop it too.
    pub fn restore(&self, swap: &Swap<T>) -> bool {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if !Arc::ptr_eq(&guard, &swap.replacement) {
            return false;
        }
        *guard = Arc::clone(&swap.original);
        true
    }
}

impl<T: ?Sized> fmt::Debug for EntryPoint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoint")
            .field("name", &self.name)
            .field("sealed", &self.is_sealed())
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> fmt::Debug for Swap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Swap").finish_non_exhaustive()
    }
}

/// The host's global entry points.
#[derive(Debug)]
pub struct Platform {
    /// Future-returning HTTP.
    pub fetch: EntryPoint<dyn HttpFetch>,
    /// Callback-completing HTTP.
    pub send: EntryPoint<dyn HttpSend>,
    /// Streaming sockets.
    pub sockets: EntryPoint<dyn SocketConnector>,
    /// Logging.
    pub console: EntryPoint<dyn Console>,
    /// Unhandled task failures.
    pub rejections: EntryPoint<dyn RejectionSink>,
    /// Frame scheduling.
    pub frames: EntryPoint<dyn FrameScheduler>,
    /// Memory readings.
    pub memory: EntryPoint<dyn MemoryProbe>,
    /// Paint milestones.
    pub paint: EntryPoint<dyn PaintTimeline>,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            fetch: EntryPoint::new("fetch", Arc::new(Unconfigured)),
            send: EntryPoint::new("send", Arc::new(Unconfigured)),
            sockets: EntryPoint::new("sockets", Arc::new(Unconfigured)),
            console: EntryPoint::new("console", Arc::new(StderrConsole)),
            rejections: EntryPoint::new("rejections", Arc::new(TracingRejectionSink)),
            frames: EntryPoint::new("frames", Arc::new(ManualFrameScheduler::new())),
            memory: EntryPoint::new("memory", Arc::new(ProcessMemoryProbe)),
            paint: EntryPoint::new("paint", Arc::new(RecordedPaintTimeline::new())),
        }
    }
}

impl Platform {
    /// Creates a platform with default implementations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs through the current console.
    pub fn log(&self, level: LogLevel, args: &[serde_json::Value]) {
        self.console.current().write(level, args);
    }

    /// Reports an unhandled task failure through the current sink.
    pub fn report_rejection(&self, rejection: &Rejection) {
        self.rejections.current().report(rejection);
    }
}
