//! Network monitor.

use super::{EvictionListener, EvictionListeners, Monitor, MonitorCore, lock, ring};
use crate::adapters::{Adapter, CaptureOptions, FetchAdapter, NetworkEvent, SendAdapter, SocketAdapter};
use crate::bus::EventBus;
use crate::config::{LookoutConfig, NetworkFilters};
use crate::models::{CorrelationId, NetworkEntry, RequestKind, RequestState, TelemetryEvent};
use crate::platform::Platform;
use crate::store::{RingStore, StorageEntry};
use crate::{Error, Result};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::{debug, instrument, warn};

const MONITOR: &str = "network";

/// URL extensions treated as static assets by the `hide_assets` filter.
pub const ASSET_EXTENSIONS: &[&str] = &[
    "js", "mjs", "css", "png", "jpg", "jpeg", "gif", "svg", "webp", "avif", "bmp", "ico", "woff",
    "woff2", "ttf", "otf", "eot", "map",
];

struct NetworkInner {
    core: MonitorCore,
    bus: EventBus,
    store: std::sync::Mutex<RingStore<NetworkEntry>>,
    filters: RwLock<NetworkFilters>,
    max_socket_messages: usize,
    fetch: FetchAdapter,
    send: SendAdapter,
    sockets: SocketAdapter,
    evictions: EvictionListeners<NetworkEntry>,
}

/// Records HTTP exchanges and socket connections.
///
/// Each request is stored once when it starts and updated in place as its
/// completion, messages, or close arrive. Filters only affect what is
/// published on the bus; every record is stored.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<NetworkInner>,
}

impl NetworkMonitor {
    /// Creates a stopped monitor over the platform's network entry points.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] if `max_network_entries` is zero.
    pub fn new(config: &LookoutConfig, platform: &Arc<Platform>, bus: EventBus) -> Result<Self> {
        let store = ring(MONITOR, config.max_network_entries)?;
        let options = CaptureOptions::from(config);
        let inner = Arc::new_cyclic(|weak: &Weak<NetworkInner>| {
            let fetch = FetchAdapter::new(Arc::clone(platform), options);
            let send = SendAdapter::new(Arc::clone(platform), options);
            let sockets = SocketAdapter::new(Arc::clone(platform), options);
            fetch.subscribe(forward(weak));
            send.subscribe(forward(weak));
            sockets.subscribe(forward(weak));
            NetworkInner {
                core: MonitorCore::new(MONITOR),
                bus,
                store: std::sync::Mutex::new(store),
                filters: RwLock::new(config.network_filters),
                max_socket_messages: config.max_socket_messages,
                fetch,
                send,
                sockets,
                evictions: EvictionListeners::new(MONITOR),
            }
        });
        Ok(Self { inner })
    }

    /// All stored entries, oldest first.
    #[must_use]
    pub fn get_entries(&self) -> Vec<NetworkEntry> {
        lock(&self.inner.store).get_all().into_iter().cloned().collect()
    }

    /// Stored entries that pass the current filters.
    #[must_use]
    pub fn get_visible_entries(&self) -> Vec<NetworkEntry> {
        let filters = self.filters();
        lock(&self.inner.store)
            .filter(|entry| !is_hidden(entry, filters))
            .into_iter()
            .cloned()
            .collect()
    }

    /// The entry with correlation id `id`.
    #[must_use]
    pub fn get_entry(&self, id: &CorrelationId) -> Option<NetworkEntry> {
        lock(&self.inner.store).find(|entry| &entry.id == id).cloned()
    }

    /// Registers a callback for entries pushed out of the store.
    pub fn on_evict(&self, listener: impl Fn(&NetworkEntry) + Send + Sync + 'static) {
        let listener: EvictionListener<NetworkEntry> = Arc::new(listener);
        self.inner.evictions.add(listener);
    }

    /// Current publication filters.
    #[must_use]
    pub fn filters(&self) -> NetworkFilters {
        *self
            .inner
            .filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the publication filters.
    pub fn set_filters(&self, filters: NetworkFilters) {
        *self
            .inner
            .filters
            .write()
            .unwrap_or_else(PoisonError::into_inner) = filters;
    }

    /// Stored entries with their storage timestamps.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StorageEntry<NetworkEntry>> {
        lock(&self.inner.store)
            .get_all_entries()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Replaces the store contents with `entries`, in order.
    pub fn restore(&self, entries: impl IntoIterator<Item = (u64, NetworkEntry)>) {
        lock(&self.inner.store).import_entries(entries);
    }

    fn adapters(&self) -> [&dyn Adapter; 3] {
        [&self.inner.fetch, &self.inner.send, &self.inner.sockets]
    }
}

fn forward(weak: &Weak<NetworkInner>) -> Arc<dyn Fn(&NetworkEvent) + Send + Sync> {
    let weak = weak.clone();
    Arc::new(move |event: &NetworkEvent| {
        if let Some(inner) = weak.upgrade() {
            inner.record(event);
        }
    })
}

fn is_hidden(entry: &NetworkEntry, filters: NetworkFilters) -> bool {
    if filters.hide_assets
        && entry
            .extension()
            .is_some_and(|ext| ASSET_EXTENSIONS.contains(&ext.as_str()))
    {
        return true;
    }
    filters.hide_cached
        && entry
            .response
            .as_ref()
            .is_some_and(crate::models::NetworkResponse::is_cached)
}

impl NetworkInner {
    fn record(&self, event: &NetworkEvent) {
        if !self.core.is_active() {
            return;
        }
        metrics::counter!("lookout_records_captured_total", "monitor" => MONITOR).increment(1);
        match event {
            NetworkEvent::RequestStarted {
                id,
                kind,
                method,
                url,
                headers,
                body,
                timestamp,
            } => {
                let mut entry = NetworkEntry::pending(id.clone(), *kind, method, url, *timestamp);
                entry.request_headers.clone_from(headers);
                entry.request_body.clone_from(body);
                self.insert(entry.clone());
                debug!(id = %id, url = %url, "Network request recorded");
                self.publish(&entry, TelemetryEvent::NetworkRequest(entry.clone()));
            },
            NetworkEvent::ResponseReceived {
                id,
                kind,
                method,
                url,
                response,
                duration_ms,
                timestamp,
            } => {
                let entry = self.upsert(id, *kind, method, url, *timestamp, |entry| {
                    entry.state = RequestState::Complete;
                    entry.response = Some(response.clone());
                    entry.duration_ms = Some(*duration_ms);
                });
                self.publish(&entry, TelemetryEvent::NetworkResponse(entry.clone()));
            },
            NetworkEvent::RequestFailed {
                id,
                kind,
                method,
                url,
                error,
                duration_ms,
                timestamp,
            } => {
                let entry = self.upsert(id, *kind, method, url, *timestamp, |entry| {
                    // A socket error without a duration leaves the connection open.
                    if duration_ms.is_some() || entry.kind != RequestKind::Socket {
                        entry.state = RequestState::Failed;
                        entry.duration_ms = *duration_ms;
                    }
                    entry.error = Some(error.clone());
                });
                self.publish(&entry, TelemetryEvent::NetworkError(entry.clone()));
            },
            NetworkEvent::SocketOpened { id, url, timestamp } => {
                let entry = self.upsert(id, RequestKind::Socket, "CONNECT", url, *timestamp, |entry| {
                    entry.state = RequestState::Open;
                });
                self.publish(&entry, TelemetryEvent::SocketOpen(entry.clone()));
            },
            NetworkEvent::SocketMessage { id, url, message } => {
                let limit = self.max_socket_messages;
                let entry = self.upsert(
                    id,
                    RequestKind::Socket,
                    "CONNECT",
                    url,
                    message.timestamp,
                    |entry| entry.push_message(message.clone(), limit),
                );
                self.publish(
                    &entry,
                    TelemetryEvent::SocketMessage {
                        connection_id: id.clone(),
                        message: message.clone(),
                    },
                );
            },
            NetworkEvent::SocketClosed {
                id,
                url,
                code,
                reason,
                duration_ms,
                timestamp,
            } => {
                let entry = self.upsert(id, RequestKind::Socket, "CONNECT", url, *timestamp, |entry| {
                    entry.state = RequestState::Closed;
                    entry.close_code = Some(*code);
                    entry.duration_ms = Some(*duration_ms);
                    if !reason.is_empty() && entry.error.is_none() && *code != 1000 {
                        entry.error = Some(reason.clone());
                    }
                });
                self.publish(&entry, TelemetryEvent::SocketClose(entry.clone()));
            },
        }
    }

    fn insert(&self, entry: NetworkEntry) {
        let (_, evicted) = lock(&self.store).push_evicting(entry);
        if let Some(evicted) = evicted {
            self.evictions.notify(&evicted.payload);
        }
    }

    /// Applies `update` to the entry for `id`, or stores an orphan entry
    /// when none is held. Returns the updated record.
    fn upsert(
        &self,
        id: &CorrelationId,
        kind: RequestKind,
        method: &str,
        url: &str,
        timestamp: u64,
        update: impl FnOnce(&mut NetworkEntry),
    ) -> NetworkEntry {
        {
            let mut store = lock(&self.store);
            if let Some(stored) = store.find_entry_mut(|stored| &stored.payload.id == id) {
                update(&mut stored.payload);
                return stored.payload.clone();
            }
        }

        let miss = Error::CorrelationMiss {
            correlation_id: id.to_string(),
        };
        warn!(monitor = MONITOR, url = %url, error = %miss, "Storing orphan network entry");
        metrics::counter!("lookout_correlation_misses_total", "monitor" => MONITOR).increment(1);

        let mut entry = NetworkEntry::pending(id.clone(), kind, method, url, timestamp);
        entry.orphan = true;
        update(&mut entry);
        self.insert(entry.clone());
        entry
    }

    fn publish(&self, entry: &NetworkEntry, event: TelemetryEvent) {
        let filters = *self.filters.read().unwrap_or_else(PoisonError::into_inner);
        if is_hidden(entry, filters) {
            return;
        }
        self.bus.emit(&event);
    }
}

impl Monitor for NetworkMonitor {
    fn name(&self) -> &'static str {
        MONITOR
    }

    #[instrument(skip(self), fields(monitor = MONITOR))]
    fn start(&self) {
        let _lifecycle = self.inner.core.lifecycle();
        self.inner.core.activate(&self.adapters());
    }

    #[instrument(skip(self), fields(monitor = MONITOR))]
    fn stop(&self) {
        let _lifecycle = self.inner.core.lifecycle();
        self.inner.core.deactivate(&self.adapters());
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

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("active", &self.inner.core.is_active())
            .field("entries", &lock(&self.inner.store).size())
            .finish_non_exhaustive()
    }
}
