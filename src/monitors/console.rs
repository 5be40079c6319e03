//! Console monitor.

use super::{Monitor, MonitorCore, lock, ring};
use crate::Result;
use crate::adapters::{CaptureOptions, ConsoleAdapter, ConsoleCall};
use crate::bus::EventBus;
use crate::config::LookoutConfig;
use crate::models::{ConsoleEntry, CorrelationId, LogLevel, TelemetryEvent};
use crate::platform::Platform;
use crate::store::{RingStore, StorageEntry};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::instrument;

const MONITOR: &str = "console";

struct ConsoleInner {
    core: MonitorCore,
    bus: EventBus,
    store: Mutex<RingStore<ConsoleEntry>>,
    adapter: ConsoleAdapter,
}

impl ConsoleInner {
    fn record(&self, call: &ConsoleCall) {
        if !self.core.is_active() {
            return;
        }
        let entry = ConsoleEntry {
            id: CorrelationId::generate(),
            timestamp: call.timestamp,
            level: call.level,
            message: call.args.join(" "),
            args: call.args.clone(),
            stack: call.stack.clone(),
        };
        lock(&self.store).push(entry.clone());
        metrics::counter!("lookout_records_captured_total", "monitor" => MONITOR).increment(1);
        self.bus.emit(&TelemetryEvent::ConsoleEntry(entry));
    }
}

/// Records logging calls routed through the platform console.
#[derive(Clone)]
pub struct ConsoleMonitor {
    inner: Arc<ConsoleInner>,
}

impl ConsoleMonitor {
    /// Creates a stopped monitor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCapacity`] if `max_console_entries` is zero.
    pub fn new(config: &LookoutConfig, platform: &Arc<Platform>, bus: EventBus) -> Result<Self> {
        let store = ring(MONITOR, config.max_console_entries)?;
        let adapter = ConsoleAdapter::new(Arc::clone(platform), CaptureOptions::from(config));
        let inner = Arc::new_cyclic(|weak: &Weak<ConsoleInner>| {
            let weak = weak.clone();
            adapter.subscribe(Arc::new(move |call: &ConsoleCall| {
                if let Some(inner) = weak.upgrade() {
                    inner.record(call);
                }
            }));
            ConsoleInner {
                core: MonitorCore::new(MONITOR),
                bus,
                store: Mutex::new(store),
                adapter,
            }
        });
        Ok(Self { inner })
    }

    /// All stored entries, oldest first.
    #[must_use]
    pub fn get_entries(&self) -> Vec<ConsoleEntry> {
        lock(&self.inner.store).get_all().into_iter().cloned().collect()
    }

    /// Entries logged at exactly `level`.
    #[must_use]
    pub fn get_by_level(&self, level: LogLevel) -> Vec<ConsoleEntry> {
        lock(&self.inner.store)
            .filter(|entry| entry.level == level)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Entries logged at `min` or above.
    #[must_use]
    pub fn get_at_least(&self, min: LogLevel) -> Vec<ConsoleEntry> {
        lock(&self.inner.store)
            .filter(|entry| entry.level >= min)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Number of stored entries per level.
    #[must_use]
    pub fn counts_by_level(&self) -> BTreeMap<LogLevel, usize> {
        let mut counts = BTreeMap::new();
        for entry in lock(&self.inner.store).iter() {
            *counts.entry(entry.payload.level).or_insert(0) += 1;
        }
        counts
    }

    /// Stored entries with their storage timestamps.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StorageEntry<ConsoleEntry>> {
        lock(&self.inner.store)
            .get_all_entries()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Replaces the store contents with `entries`, in order.
    pub fn restore(&self, entries: impl IntoIterator<Item = (u64, ConsoleEntry)>) {
        lock(&self.inner.store).import_entries(entries);
    }
}

impl Monitor for ConsoleMonitor {
    fn name(&self) -> &'static str {
        MONITOR
    }

    #[instrument(skip(self), fields(monitor = MONITOR))]
    fn start(&self) {
        let _lifecycle = self.inner.core.lifecycle();
        self.inner.core.activate(&[&self.inner.adapter]);
    }

    #[instrument(skip(self), fields(monitor = MONITOR))]
    fn stop(&self) {
        let _lifecycle = self.inner.core.lifecycle();
        self.inner.core.deactivate(&[&self.inner.adapter]);
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

impl std::fmt::Debug for ConsoleMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleMonitor")
            .field("active", &self.inner.core.is_active())
            .field("entries", &lock(&self.inner.store).size())
            .finish_non_exhaustive()
    }
}
