//! Monitors.
//!
//! A monitor owns one or more adapters and a bounded store. `start`
//! subscribes to its adapters and installs them; `stop` uninstalls and
//! unsubscribes. While active, each adapter event is turned into a domain
//! record, stored, and published on the bus.
//!
//! | Monitor | Adapters | Store |
//! |---------|----------|-------|
//! | [`NetworkMonitor`] | fetch, send, sockets | ring of [`NetworkEntry`](crate::models::NetworkEntry) |
//! | [`ConsoleMonitor`] | console | ring of [`ConsoleEntry`](crate::models::ConsoleEntry) |
//! | [`ErrorMonitor`] | panic, rejection | ring of errors + LRU of groups |
//! | [`PerformanceMonitor`] | frames | ring of snapshots |

mod console;
mod errors;
pub mod fingerprint;
mod network;
mod performance;

pub use console::ConsoleMonitor;
pub use errors::{ErrorMonitor, IgnoreRule};
pub use network::{ASSET_EXTENSIONS, NetworkMonitor};
pub use performance::PerformanceMonitor;

use crate::adapters::Adapter;
use crate::bus::panic_message;
use crate::store::RingStore;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{info, warn};

/// Common monitor lifecycle.
pub trait Monitor: Send + Sync {
    /// Monitor name used in logs.
    fn name(&self) -> &'static str;

    /// Installs adapters and starts recording. Starting twice is a no-op.
    ///
    /// Adapters that refuse installation are skipped; the monitor runs
    /// degraded without them.
    fn start(&self);

    /// Uninstalls adapters. Records already stored are kept.
    fn stop(&self);

    /// Whether the monitor is recording.
    fn is_active(&self) -> bool;

    /// Drops every stored record.
    fn clear(&self);

    /// Adapters skipped by the last `start`.
    fn skipped_adapters(&self) -> Vec<&'static str>;
}

/// Callback receiving records evicted from a monitor's store.
pub type EvictionListener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Lifecycle bookkeeping shared by every monitor.
#[derive(Debug)]
pub(crate) struct MonitorCore {
    name: &'static str,
    active: AtomicBool,
    lifecycle: Mutex<()>,
    skipped: Mutex<Vec<&'static str>>,
}

impl MonitorCore {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            active: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            skipped: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Serializes start/stop of one monitor.
    pub(crate) fn lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the monitor active and installs its adapters.
    ///
    /// Returns false when it was already active.
    pub(crate) fn activate(&self, adapters: &[&dyn Adapter]) -> bool {
        if self.active.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut skipped = Vec::new();
        for adapter in adapters {
            if let Err(e) = adapter.install() {
                warn!(
                    monitor = self.name,
                    adapter = adapter.name(),
                    error = %e,
                    "Adapter unavailable, monitor continues without it"
                );
                skipped.push(adapter.name());
            }
        }
        info!(monitor = self.name, skipped = skipped.len(), "Monitor started");
        *self.skipped.lock().unwrap_or_else(PoisonError::into_inner) = skipped;
        true
    }

    /// Marks the monitor inactive and uninstalls its adapters.
    ///
    /// Returns false when it was not active.
    pub(crate) fn deactivate(&self, adapters: &[&dyn Adapter]) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        for adapter in adapters {
            adapter.uninstall();
        }
        info!(monitor = self.name, "Monitor stopped");
        true
    }

    pub(crate) fn skipped(&self) -> Vec<&'static str> {
        self.skipped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Eviction listeners registered on a monitor.
pub(crate) struct EvictionListeners<T> {
    monitor: &'static str,
    list: RwLock<Vec<EvictionListener<T>>>,
}

impl<T> EvictionListeners<T> {
    pub(crate) const fn new(monitor: &'static str) -> Self {
        Self {
            monitor,
            list: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, listener: EvictionListener<T>) {
        self.list
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Notifies listeners; call with no store lock held.
    pub(crate) fn notify(&self, evicted: &T) {
        let listeners = self
            .list
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(evicted))) {
                warn!(
                    monitor = self.monitor,
                    "Eviction listener panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

impl<T> std::fmt::Debug for EvictionListeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionListeners")
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

/// Builds a ring store named after the monitor that owns it.
pub(crate) fn ring<T>(store: &'static str, capacity: usize) -> crate::Result<RingStore<T>> {
    RingStore::new(capacity).map_err(|_| crate::Error::InvalidCapacity { store })
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
