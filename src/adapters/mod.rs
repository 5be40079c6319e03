//! Instrumentation adapters.
//!
//! An adapter wraps one host entry point. Installing swaps the slot on the
//! [`Platform`](crate::platform::Platform) for a wrapper that captures a
//! normalized event, forwards it to the adapter's handlers, and delegates to
//! the captured original; uninstalling puts the original back. When a later
//! wrapper was stacked on top, ours stays in the chain as a pass-through.
//!
//! | Adapter | Entry point | Events |
//! |---------|-------------|--------|
//! | [`FetchAdapter`] | `fetch` | [`NetworkEvent`] |
//! | [`SendAdapter`] | `send` | [`NetworkEvent`] |
//! | [`SocketAdapter`] | `sockets` | [`NetworkEvent`] |
//! | [`ConsoleAdapter`] | `console` | [`ConsoleCall`] |
//! | [`PanicAdapter`] | process panic hook | [`CapturedError`] |
//! | [`RejectionAdapter`] | `rejections` | [`CapturedError`] |
//! | [`FrameAdapter`] | `frames` | [`FrameEvent`] |
//!
//! Wrappers never let a capture failure reach host code: handler panics are
//! caught and logged, and the host's own result is returned unchanged.

mod capture;
mod console;
mod correlation;
mod errors;
mod frames;
mod http;
mod socket;

pub use capture::{
    CaptureOptions, MAX_STACK_FRAMES, REDACTED, capture_stack, is_sensitive, parse_backtrace,
    redact_headers, redact_url, render_arg, render_body, truncate,
};
pub use console::{ConsoleAdapter, ConsoleCall};
pub use correlation::Correlator;
pub use errors::{CapturedError, PanicAdapter, RejectionAdapter};
pub use frames::{FrameAdapter, FrameEvent};
pub use http::{ABORTED, FetchAdapter, NetworkEvent, SendAdapter};
pub use socket::SocketAdapter;

use crate::bus::panic_message;
use crate::platform::{EntryPoint, Swap};
use crate::{Error, Result};
use std::cell::Cell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, warn};

/// Common adapter lifecycle.
pub trait Adapter: Send + Sync {
    /// Adapter name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Wraps the entry point. Installing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterInstall`] when the entry point refuses
    /// instrumentation.
    fn install(&self) -> Result<()>;

    /// Restores the original entry point and cancels in-flight correlations.
    fn uninstall(&self);

    /// Whether the wrapper is currently installed.
    fn is_installed(&self) -> bool;
}

/// Identifies a handler registered on an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Adapter event handler.
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handlers an adapter forwards events to.
pub struct Handlers<E> {
    next_id: AtomicU64,
    list: RwLock<Vec<(HandlerId, Handler<E>)>>,
}

impl<E> Default for Handlers<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            list: RwLock::new(Vec::new()),
        }
    }
}

impl<E> Handlers<E> {
    /// Registers a handler.
    pub fn add(&self, handler: Handler<E>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.list
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        id
    }

    /// Removes a handler; returns false when it was not registered.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut list = self.list.write().unwrap_or_else(PoisonError::into_inner);
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        list.len() != before
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.list.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every handler registered before the call.
    pub fn emit(&self, adapter: &'static str, event: &E) {
        let snapshot: Vec<Handler<E>> = self
            .list
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                warn!(
                    adapter,
                    "Adapter handler panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

impl<E> fmt::Debug for Handlers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers").field("len", &self.len()).finish()
    }
}

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
}

/// Runs a capture path, isolating the host from its failures.
///
/// Returns `None` when the capture panicked or when this thread is already
/// inside a capture path, so work done by lookout's own listeners is not
/// captured recursively.
pub(crate) fn guarded<R>(adapter: &'static str, capture: impl FnOnce() -> R) -> Option<R> {
    if CAPTURING.with(Cell::get) {
        return None;
    }
    CAPTURING.with(|flag| flag.set(true));
    let result = catch_unwind(AssertUnwindSafe(capture));
    CAPTURING.with(|flag| flag.set(false));
    match result {
        Ok(value) => Some(value),
        Err(panic) => {
            warn!(
                adapter,
                "Capture failed, host call continues: {}",
                panic_message(panic.as_ref())
            );
            None
        },
    }
}

pub(crate) fn elapsed_ms(elapsed: std::time::Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Whether one installation's wrapper still captures.
///
/// A wrapper that stays in a stacked chain after its adapter uninstalled
/// forwards every call untouched.
#[derive(Debug, Clone)]
pub(crate) struct Liveness(Arc<AtomicBool>);

impl Liveness {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub(crate) fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn end(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// [`guarded`], skipped entirely once the installation has ended.
    pub(crate) fn capture<R>(
        &self,
        adapter: &'static str,
        capture: impl FnOnce() -> R,
    ) -> Option<R> {
        if !self.is_live() {
            return None;
        }
        guarded(adapter, capture)
    }
}

struct Installed<T: ?Sized> {
    swap: Swap<T>,
    live: Liveness,
}

/// The swap an installed adapter must undo.
pub(crate) struct Installation<T: ?Sized> {
    adapter: &'static str,
    installed: Mutex<Option<Installed<T>>>,
}

impl<T: ?Sized> Installation<T> {
    pub(crate) const fn new(adapter: &'static str) -> Self {
        Self {
            adapter,
            installed: Mutex::new(None),
        }
    }

    /// Wraps `entry`; the wrapper gets a [`Liveness`] ended by uninstall.
    pub(crate) fn install(
        &self,
        entry: &EntryPoint<T>,
        wrap: impl FnOnce(Arc<T>, Liveness) -> Arc<T>,
    ) -> Result<()> {
        let mut state = self.installed.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_some() {
            return Ok(());
        }
        let live = Liveness::new();
        let token = live.clone();
        let Some(swap) = entry.wrap(|original| wrap(original, token)) else {
            metrics::counter!("lookout_adapter_install_failures_total", "adapter" => self.adapter)
                .increment(1);
            return Err(Error::AdapterInstall {
                adapter: self.adapter,
                reason: format!("entry point '{}' is sealed", entry.name()),
            });
        };
        *state = Some(Installed { swap, live });
        debug!(adapter = self.adapter, entry = entry.name(), "Adapter installed");
        Ok(())
    }

    pub(crate) fn uninstall(&self, entry: &EntryPoint<T>) {
        let Some(installed) = self
            .installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        installed.live.end();
        if entry.restore(&installed.swap) {
            debug!(adapter = self.adapter, entry = entry.name(), "Adapter uninstalled");
        } else {
            debug!(
                adapter = self.adapter,
                entry = entry.name(),
                "Entry point was wrapped again after us; leaving a pass-through in place"
            );
        }
    }

    pub(crate) fn is_installed(&self) -> bool {
        self.installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<T: ?Sized> fmt::Debug for Installation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Installation")
            .field("adapter", &self.adapter)
            .field("installed", &self.is_installed())
            .finish()
    }
}
