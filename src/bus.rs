//! Synchronous named event bus.
//!
//! Listeners register under an event name and run in registration order on
//! the emitting thread. Each emission dispatches over a snapshot of the
//! listener list taken before the first listener runs, so registrations made
//! or removed during dispatch only affect later emissions. `once` listeners
//! are claimed (removed) immediately before they run; a `once` listener that
//! has already been claimed by a nested emission is skipped.
//!
//! A panicking listener is caught, reported through the error side-channel
//! and counted; the remaining listeners for that emission still run.
//!
//! # Example
//!
//! ```rust,ignore
//! let bus = EventBus::new();
//! let sub = bus.on(event_names::NETWORK_REQUEST, |event| {
//!     tracing::info!(id = ?event.record_id(), "request started");
//! });
//! bus.emit(&event);
//! sub.unsubscribe();
//! ```

use crate::Error;
use crate::models::TelemetryEvent;
use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio::sync::mpsc;

const DEFAULT_MAX_LISTENERS: usize = 10;

/// Listener callback.
pub type Listener = Arc<dyn Fn(&TelemetryEvent) + Send + Sync>;

/// Side-channel for listener failures.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct Registration {
    id: ListenerId,
    callback: Listener,
    once: bool,
}

struct Registry {
    listeners: HashMap<String, Vec<Registration>>,
    max_listeners: usize,
    warned: HashSet<String>,
}

struct BusInner {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    on_error: RwLock<Option<ErrorHandler>>,
}

/// Central event bus for telemetry events.
///
/// Cloning is cheap; clones share the listener registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Handle returned by [`EventBus::on`] and [`EventBus::once`].
///
/// Dropping the handle does not unsubscribe.
#[derive(Debug, Clone)]
pub struct Subscription {
    bus: Weak<BusInner>,
    event: String,
    id: ListenerId,
}

impl Subscription {
    /// Returns the registration id.
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    /// Returns the event name this registration listens to.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Removes exactly this registration. Returns false if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|inner| EventBus { inner }.remove(&self.event, self.id))
    }
}

impl std::fmt::Debug for BusInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusInner").finish_non_exhaustive()
    }
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: Mutex::new(Registry {
                    listeners: HashMap::new(),
                    max_listeners: DEFAULT_MAX_LISTENERS,
                    warned: HashSet::new(),
                }),
                next_id: AtomicU64::new(1),
                on_error: RwLock::new(None),
            }),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the side-channel that receives listener failures.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.inner.on_error.write() {
            *slot = Some(Arc::new(handler));
        }
    }

    /// Registers a listener for every emission of `event`.
    pub fn on<F>(&self, event: &str, listener: F) -> Subscription
    where
        F: Fn(&TelemetryEvent) + Send + Sync + 'static,
    {
        self.add(event, Arc::new(listener), false)
    }

    /// Registers a listener for the next emission of `event` only.
    pub fn once<F>(&self, event: &str, listener: F) -> Subscription
    where
        F: Fn(&TelemetryEvent) + Send + Sync + 'static,
    {
        self.add(event, Arc::new(listener), true)
    }

    fn add(&self, event: &str, callback: Listener, once: bool) -> Subscription {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.registry();
        let max = registry.max_listeners;
        let list = registry.listeners.entry(event.to_string()).or_default();
        list.push(Registration { id, callback, once });
        let count = list.len();

        if count > max && registry.warned.insert(event.to_string()) {
            tracing::warn!(
                event = %event,
                count,
                max,
                "Possible listener leak: more listeners than the configured maximum"
            );
        }
        drop(registry);

        metrics::counter!("lookout_bus_subscriptions_total").increment(1);
        Subscription {
            bus: Arc::downgrade(&self.inner),
            event: event.to_string(),
            id,
        }
    }

    fn remove(&self, event: &str, id: ListenerId) -> bool {
        let mut registry = self.registry();
        let Some(list) = registry.listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|registration| registration.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            registry.listeners.remove(event);
        }
        removed
    }

    /// Removes one registration, or every registration when `id` is `None`.
    pub fn off(&self, event: &str, id: Option<ListenerId>) {
        match id {
            Some(id) => {
                self.remove(event, id);
            },
            None => {
                self.registry().listeners.remove(event);
            },
        }
    }

    /// Removes all listeners for `event`, or for every event when `None`.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut registry = self.registry();
        match event {
            Some(event) => {
                registry.listeners.remove(event);
            },
            None => registry.listeners.clear(),
        }
    }

    /// Returns how many listeners are registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.registry().listeners.get(event).map_or(0, Vec::len)
    }

    /// Returns the names that currently have listeners.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry().listeners.keys().cloned().collect();
        names.sort();
        names
    }

    /// Sets the per-event listener count that triggers a leak warning.
    pub fn set_max_listeners(&self, max: usize) {
        let mut registry = self.registry();
        registry.max_listeners = max;
        registry.warned.clear();
    }

    /// Returns the leak-warning threshold.
    #[must_use]
    pub fn max_listeners(&self) -> usize {
        self.registry().max_listeners
    }

    /// Emits `event` under its own name.
    ///
    /// Returns true if at least one listener was registered.
    pub fn emit(&self, event: &TelemetryEvent) -> bool {
        self.emit_named(event.event_name(), event)
    }

    /// Emits `event` under an explicit name.
    pub fn emit_named(&self, name: &str, event: &TelemetryEvent) -> bool {
        let snapshot: Vec<Registration> = self
            .registry()
            .listeners
            .get(name)
            .cloned()
            .unwrap_or_default();

        metrics::counter!("lookout_bus_emit_total").increment(1);
        if snapshot.is_empty() {
            return false;
        }

        for registration in &snapshot {
            if registration.once && !self.remove(name, registration.id) {
                continue;
            }
            self.invoke(name, registration, event);
        }
        true
    }

    fn invoke(&self, name: &str, registration: &Registration, event: &TelemetryEvent) {
        let callback = &registration.callback;
        let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(event))) else {
            return;
        };

        let message = panic_message(panic.as_ref());
        metrics::counter!("lookout_listener_failures_total", "event" => name.to_string())
            .increment(1);
        tracing::error!(event = %name, error = %message, "Bus listener failed");

        let error = Error::ListenerExecution {
            event: name.to_string(),
            message,
        };
        let handler = self
            .inner
            .on_error
            .read()
            .ok()
            .and_then(|slot| slot.clone());
        if let Some(handler) = handler {
            if catch_unwind(AssertUnwindSafe(|| handler(&error))).is_err() {
                tracing::error!(event = %name, "Bus error handler failed");
            }
        }
    }

    /// Subscribes an async consumer to `event`.
    ///
    /// Events are cloned into an unbounded channel, so the emitter never
    /// waits on the consumer. The registration is removed when the stream is
    /// dropped.
    #[must_use]
    pub fn stream(&self, event: &str) -> EventStream {
        self.stream_filtered(event, |_| true)
    }

    /// Subscribes an async consumer to events of `event` matching `predicate`.
    #[must_use]
    pub fn stream_filtered<F>(&self, event: &str, predicate: F) -> EventStream
    where
        F: Fn(&TelemetryEvent) -> bool + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = self.on(event, move |event| {
            if predicate(event) && sender.send(event.clone()).is_err() {
                metrics::counter!("lookout_bus_stream_closed_total").increment(1);
            }
        });
        EventStream {
            receiver,
            subscription,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry();
        f.debug_struct("EventBus")
            .field("events", &registry.listeners.len())
            .field("max_listeners", &registry.max_listeners)
            .finish()
    }
}

/// Async receiver fed by a bus listener.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<TelemetryEvent>,
    subscription: Subscription,
}

impl EventStream {
    /// Receives the next event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<TelemetryEvent> {
        self.receiver.recv().await
    }

    /// Receives an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<TelemetryEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event_names;
    use std::sync::atomic::AtomicUsize;

    fn custom(name: &str) -> TelemetryEvent {
        TelemetryEvent::Custom {
            name: name.to_string(),
            data: serde_json::Value::Null,
            timestamp: 0,
        }
    }

    #[test]
    fn test_emit_without_listeners_reports_undelivered() {
        let bus = EventBus::new();
        assert!(!bus.emit(&custom("nobody")));
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            bus.on("tick", move |_| order.lock().unwrap().push(n));
        }
        assert!(bus.emit(&custom("tick")));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_once_fires_once_under_nested_emission() {
        let bus = EventBus::new();
        let once_calls = Arc::new(AtomicUsize::new(0));
        let depth = Arc::new(AtomicUsize::new(0));

        let nested_bus = bus.clone();
        let nested_depth = Arc::clone(&depth);
        bus.on("ping", move |event| {
            if nested_depth.fetch_add(1, Ordering::SeqCst) == 0 {
                nested_bus.emit(event);
                nested_bus.emit(event);
            }
        });
        let counter = Arc::clone(&once_calls);
        bus.once("ping", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&custom("ping"));
        bus.emit(&custom("ping"));
        assert_eq!(once_calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count("ping"), 1);
    }

    #[test]
    fn test_once_listener_reemitting_is_not_reentered() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let inner_bus = bus.clone();
        let counter = Arc::clone(&calls);
        bus.once("echo", move |event| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner_bus.emit(event);
        });
        bus.emit(&custom("echo"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_during_dispatch_affects_next_emission_only() {
        let bus = EventBus::new();
        let second_calls = Arc::new(AtomicUsize::new(0));
        let target: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let remover_bus = bus.clone();
        let remover_target = Arc::clone(&target);
        bus.on("evt", move |_| {
            if let Some(id) = *remover_target.lock().unwrap() {
                remover_bus.off("evt", Some(id));
            }
        });
        let counter = Arc::clone(&second_calls);
        let second = bus.on("evt", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        *target.lock().unwrap() = Some(second.id());

        bus.emit(&custom("evt"));
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        bus.emit(&custom("evt"));
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_added_during_dispatch_waits_for_next_emission() {
        let bus = EventBus::new();
        let late_calls = Arc::new(AtomicUsize::new(0));
        let adder_bus = bus.clone();
        let counter = Arc::clone(&late_calls);
        bus.once("grow", move |_| {
            let counter = Arc::clone(&counter);
            adder_bus.on("grow", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });
        bus.emit(&custom("grow"));
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        bus.emit(&custom("grow"));
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_dispatch() {
        let bus = EventBus::new();
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        bus.set_error_handler(move |error| sink.lock().unwrap().push(error.to_string()));

        bus.on("boom", |_| panic!("listener exploded"));
        let after = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&after);
        bus.on("boom", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(bus.emit(&custom("boom")));
        assert_eq!(after.load(Ordering::SeqCst), 1);
        let reported = reported.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].contains("listener exploded"));
    }

    #[test]
    fn test_unsubscribe_and_remove_all() {
        let bus = EventBus::new();
        let a = bus.on("a", |_| {});
        bus.on("a", |_| {});
        bus.on("b", |_| {});
        assert_eq!(bus.event_names(), vec!["a".to_string(), "b".to_string()]);

        assert!(a.unsubscribe());
        assert!(!a.unsubscribe());
        assert_eq!(bus.listener_count("a"), 1);

        bus.off("a", None);
        assert_eq!(bus.listener_count("a"), 0);
        bus.remove_all_listeners(None);
        assert!(bus.event_names().is_empty());
    }

    #[test]
    fn test_max_listeners_is_not_a_hard_limit() {
        let bus = EventBus::new();
        bus.set_max_listeners(1);
        assert_eq!(bus.max_listeners(), 1);
        bus.on("crowded", |_| {});
        bus.on("crowded", |_| {});
        bus.on("crowded", |_| {});
        assert_eq!(bus.listener_count("crowded"), 3);
    }

    #[tokio::test]
    async fn test_stream_receives_matching_events() {
        let bus = EventBus::new();
        let mut stream = bus.stream_filtered(event_names::INSPECTOR_SHOWN, |_| true);
        bus.emit(&TelemetryEvent::InspectorShown);
        let event = stream.recv().await.unwrap();
        assert_eq!(event.event_name(), event_names::INSPECTOR_SHOWN);

        drop(stream);
        assert_eq!(bus.listener_count(event_names::INSPECTOR_SHOWN), 0);
    }

    #[test]
    fn test_stream_recv_waits_for_emission() {
        let bus = EventBus::new();
        let mut stream = bus.stream_filtered("tick", |event| event.record_id().is_none());
        {
            let mut recv = tokio_test::task::spawn(stream.recv());
            tokio_test::assert_pending!(recv.poll());

            bus.emit(&custom("tick"));
            assert!(recv.is_woken());
            let event = tokio_test::assert_ready!(recv.poll());
            assert_eq!(event.map(|e| e.event_name().to_string()).as_deref(), Some("tick"));
        }
        assert!(stream.try_recv().is_none());
    }
}
