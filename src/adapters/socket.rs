//! Streaming socket adapter.

use super::{
    Adapter, CaptureOptions, Correlator, Handler, HandlerId, Handlers, Installation, Liveness,
    NetworkEvent, elapsed_ms, guarded, redact_url,
};
use crate::Result;
use crate::models::{CorrelationId, MessageDirection, RequestKind, SocketMessage};
use crate::platform::{
    Platform, SocketConnection, SocketConnector, SocketFrame, SocketListener, TransportError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const ADAPTER: &str = "sockets";

/// Error recorded for a connection released without a close.
pub const DROPPED: &str = "connection dropped";

#[derive(Debug)]
struct SocketShared {
    options: CaptureOptions,
    correlator: Correlator,
    handlers: Handlers<NetworkEvent>,
}

/// Identity of one observed connection, shared by its listener and handle.
///
/// When the last reference goes away without a close, the record ends as a
/// terminal failure.
struct Connection {
    id: CorrelationId,
    url: String,
    shared: Arc<SocketShared>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        let Some(elapsed) = self.shared.correlator.resolve(&self.id) else {
            return;
        };
        debug!(id = %self.id, "Socket dropped without close");
        guarded(ADAPTER, || {
            self.shared.report_failure(self, DROPPED, Some(elapsed_ms(elapsed)));
        });
    }
}

impl SocketShared {
    fn connecting(shared: &Arc<Self>, url: &str) -> Arc<Connection> {
        let connection = Arc::new(Connection {
            id: shared.correlator.begin(),
            url: redact_url(url),
            shared: Arc::clone(shared),
        });
        debug!(id = %connection.id, url = %connection.url, "Socket connecting");
        shared.handlers.emit(
            ADAPTER,
            &NetworkEvent::RequestStarted {
                id: connection.id.clone(),
                kind: RequestKind::Socket,
                method: "CONNECT".to_string(),
                url: connection.url.clone(),
                headers: BTreeMap::new(),
                body: None,
                timestamp: crate::current_timestamp_ms(),
            },
        );
        connection
    }

    fn opened(&self, connection: &Connection) {
        if !self.correlator.is_live(&connection.id) {
            return;
        }
        self.handlers.emit(
            ADAPTER,
            &NetworkEvent::SocketOpened {
                id: connection.id.clone(),
                url: connection.url.clone(),
                timestamp: crate::current_timestamp_ms(),
            },
        );
    }

    fn message(&self, connection: &Connection, direction: MessageDirection, frame: &SocketFrame) {
        if !self.correlator.is_live(&connection.id) {
            return;
        }
        self.handlers.emit(
            ADAPTER,
            &NetworkEvent::SocketMessage {
                id: connection.id.clone(),
                url: connection.url.clone(),
                message: SocketMessage {
                    direction,
                    data: self.options.frame(frame),
                    size: frame.len(),
                    timestamp: crate::current_timestamp_ms(),
                },
            },
        );
    }

    fn closed(&self, connection: &Connection, code: u16, reason: &str) {
        let Some(elapsed) = self.correlator.resolve(&connection.id) else {
            return;
        };
        self.handlers.emit(
            ADAPTER,
            &NetworkEvent::SocketClosed {
                id: connection.id.clone(),
                url: connection.url.clone(),
                code,
                reason: reason.to_string(),
                duration_ms: elapsed_ms(elapsed),
                timestamp: crate::current_timestamp_ms(),
            },
        );
    }

    /// Reports a failure; `terminal` failures end the connection record.
    fn failed(&self, connection: &Connection, error: &str, terminal: bool) {
        let duration_ms = if terminal {
            match self.correlator.resolve(&connection.id) {
                Some(elapsed) => Some(elapsed_ms(elapsed)),
                None => return,
            }
        } else if self.correlator.is_live(&connection.id) {
            None
        } else {
            return;
        };
        self.report_failure(connection, error, duration_ms);
    }

    fn report_failure(&self, connection: &Connection, error: &str, duration_ms: Option<u64>) {
        self.handlers.emit(
            ADAPTER,
            &NetworkEvent::RequestFailed {
                id: connection.id.clone(),
                kind: RequestKind::Socket,
                method: "CONNECT".to_string(),
                url: connection.url.clone(),
                error: error.to_string(),
                duration_ms,
                timestamp: crate::current_timestamp_ms(),
            },
        );
    }
}

struct ObservedListener {
    connection: Arc<Connection>,
    inner: Arc<dyn SocketListener>,
    shared: Arc<SocketShared>,
}

impl SocketListener for ObservedListener {
    fn on_open(&self) {
        guarded(ADAPTER, || self.shared.opened(&self.connection));
        self.inner.on_open();
    }

    fn on_message(&self, frame: &SocketFrame) {
        guarded(ADAPTER, || {
            self.shared
                .message(&self.connection, MessageDirection::Incoming, frame);
        });
        self.inner.on_message(frame);
    }

    fn on_close(&self, code: u16, reason: &str) {
        guarded(ADAPTER, || self.shared.closed(&self.connection, code, reason));
        self.inner.on_close(code, reason);
    }

    fn on_error(&self, message: &str) {
        guarded(ADAPTER, || self.shared.failed(&self.connection, message, false));
        self.inner.on_error(message);
    }
}

struct ObservedConnection {
    connection: Arc<Connection>,
    inner: Arc<dyn SocketConnection>,
    shared: Arc<SocketShared>,
}

impl SocketConnection for ObservedConnection {
    fn send(&self, frame: SocketFrame) -> std::result::Result<(), TransportError> {
        let copy = frame.clone();
        let result = self.inner.send(frame);
        if result.is_ok() {
            guarded(ADAPTER, || {
                self.shared
                    .message(&self.connection, MessageDirection::Outgoing, &copy);
            });
        }
        result
    }

    fn close(&self, code: u16, reason: &str) {
        self.inner.close(code, reason);
    }
}

struct ConnectorWrapper {
    original: Arc<dyn SocketConnector>,
    shared: Arc<SocketShared>,
    live: Liveness,
}

impl SocketConnector for ConnectorWrapper {
    fn connect(
        &self,
        url: &str,
        listener: Arc<dyn SocketListener>,
    ) -> std::result::Result<Arc<dyn SocketConnection>, TransportError> {
        let Some(connection) = self
            .live
            .capture(ADAPTER, || SocketShared::connecting(&self.shared, url))
        else {
            return self.original.connect(url, listener);
        };
        let observed = Arc::new(ObservedListener {
            connection: Arc::clone(&connection),
            inner: listener,
            shared: Arc::clone(&self.shared),
        });
        match self.original.connect(url, observed) {
            Ok(inner) => Ok(Arc::new(ObservedConnection {
                connection,
                inner,
                shared: Arc::clone(&self.shared),
            })),
            Err(err) => {
                guarded(ADAPTER, || self.shared.failed(&connection, &err.message, true));
                Err(err)
            },
        }
    }
}

/// Wraps the platform's socket connector.
///
/// Each connection is tracked under one correlation id from connect to close;
/// frames in both directions are forwarded as they pass.
#[derive(Debug)]
pub struct SocketAdapter {
    platform: Arc<Platform>,
    shared: Arc<SocketShared>,
    installation: Installation<dyn SocketConnector>,
}

impl SocketAdapter {
    /// Creates an uninstalled adapter.
    #[must_use]
    pub fn new(platform: Arc<Platform>, options: CaptureOptions) -> Self {
        Self {
            platform,
            shared: Arc::new(SocketShared {
                options,
                correlator: Correlator::new(),
                handlers: Handlers::default(),
            }),
            installation: Installation::new(ADAPTER),
        }
    }

    /// Registers a handler for captured events.
    pub fn subscribe(&self, handler: Handler<NetworkEvent>) -> HandlerId {
        self.shared.handlers.add(handler)
    }

    /// Removes a handler.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.shared.handlers.remove(id)
    }

    /// Connections opened and not yet closed.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.shared.correlator.len()
    }
}

impl Adapter for SocketAdapter {
    fn name(&self) -> &'static str {
        ADAPTER
    }

    fn install(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        self.installation.install(
            &self.platform.sockets,
            |original: Arc<dyn SocketConnector>, live| -> Arc<dyn SocketConnector> {
                Arc::new(ConnectorWrapper {
                    original,
                    shared,
                    live,
                })
            },
        )
    }

    fn uninstall(&self) {
        self.installation.uninstall(&self.platform.sockets);
        self.shared.correlator.cancel_all();
    }

    fn is_installed(&self) -> bool {
        self.installation.is_installed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Loopback transport: echoes every frame back to the listener.
    #[derive(Default)]
    struct Loopback {
        listener: Mutex<Option<Arc<dyn SocketListener>>>,
    }

    struct LoopbackConnection {
        listener: Arc<dyn SocketListener>,
    }

    impl SocketConnection for LoopbackConnection {
        fn send(&self, frame: SocketFrame) -> std::result::Result<(), TransportError> {
            self.listener.on_message(&frame);
            Ok(())
        }

        fn close(&self, code: u16, reason: &str) {
            self.listener.on_close(code, reason);
        }
    }

    impl SocketConnector for Loopback {
        fn connect(
            &self,
            url: &str,
            listener: Arc<dyn SocketListener>,
        ) -> std::result::Result<Arc<dyn SocketConnection>, TransportError> {
            if url.contains("refused") {
                return Err(TransportError::new("refused"));
            }
            *self.listener.lock().unwrap() = Some(Arc::clone(&listener));
            listener.on_open();
            Ok(Arc::new(LoopbackConnection { listener }))
        }
    }

    #[derive(Default)]
    struct CountingListener {
        frames: Mutex<Vec<SocketFrame>>,
    }

    impl SocketListener for CountingListener {
        fn on_message(&self, frame: &SocketFrame) {
            self.frames.lock().unwrap().push(frame.clone());
        }
    }

    fn setup() -> (Arc<Platform>, SocketAdapter, Arc<Mutex<Vec<NetworkEvent>>>) {
        let platform = Arc::new(Platform::default());
        platform.sockets.replace(Arc::new(Loopback::default()));
        let adapter = SocketAdapter::new(Arc::clone(&platform), CaptureOptions::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        adapter.subscribe(Arc::new(move |event: &NetworkEvent| {
            sink.lock().unwrap().push(event.clone());
        }));
        adapter.install().unwrap();
        (platform, adapter, events)
    }

    #[test]
    fn test_connection_lifecycle() {
        let (platform, adapter, events) = setup();
        let host_listener = Arc::new(CountingListener::default());

        let connection = platform
            .sockets
            .current()
            .connect("wss://live.test/feed", Arc::clone(&host_listener) as Arc<dyn SocketListener>)
            .unwrap();
        connection.send(SocketFrame::Text("hello".into())).unwrap();
        connection.close(1000, "done");

        assert_eq!(host_listener.frames.lock().unwrap().len(), 1);
        assert_eq!(adapter.open_connections(), 0);

        let events = events.lock().unwrap();
        let kinds: Vec<&str> = events
            .iter()
            .map(|event| match event {
                NetworkEvent::RequestStarted { .. } => "start",
                NetworkEvent::SocketOpened { .. } => "open",
                NetworkEvent::SocketMessage { message, .. } => match message.direction {
                    MessageDirection::Outgoing => "out",
                    MessageDirection::Incoming => "in",
                },
                NetworkEvent::SocketClosed { .. } => "close",
                _ => "other",
            })
            .collect();
        // Loopback delivers the echo before `send` returns.
        assert_eq!(kinds, vec!["start", "open", "in", "out", "close"]);
        assert!(events.iter().all(|e| e.id() == events[0].id()));
    }

    #[test]
    fn test_refused_connection_reports_terminal_failure() {
        let (platform, adapter, events) = setup();
        let result = platform
            .sockets
            .current()
            .connect("wss://refused.test", Arc::new(CountingListener::default()));
        assert!(result.is_err());
        assert_eq!(adapter.open_connections(), 0);

        let events = events.lock().unwrap();
        assert!(matches!(
            &events[1],
            NetworkEvent::RequestFailed { duration_ms: Some(_), error, .. } if error == "refused"
        ));
    }

    #[test]
    fn test_frames_after_uninstall_are_dropped() {
        let (platform, adapter, events) = setup();
        let connection = platform
            .sockets
            .current()
            .connect("wss://live.test/feed", Arc::new(CountingListener::default()))
            .unwrap();
        adapter.uninstall();

        connection.send(SocketFrame::Binary(vec![1, 2, 3])).unwrap();
        connection.close(1000, "bye");
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    /// Transport that keeps neither the listener nor any close path.
    struct Forgetful;

    struct Silent;

    impl SocketConnection for Silent {
        fn send(&self, _frame: SocketFrame) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        fn close(&self, _code: u16, _reason: &str) {}
    }

    impl SocketConnector for Forgetful {
        fn connect(
            &self,
            _url: &str,
            _listener: Arc<dyn SocketListener>,
        ) -> std::result::Result<Arc<dyn SocketConnection>, TransportError> {
            Ok(Arc::new(Silent))
        }
    }

    #[test]
    fn test_uninstall_releases_open_connections() {
        let (platform, adapter, events) = setup();
        let _connection = platform
            .sockets
            .current()
            .connect("wss://live.test/feed", Arc::new(CountingListener::default()))
            .unwrap();
        assert_eq!(adapter.open_connections(), 1);

        adapter.uninstall();

        assert_eq!(adapter.open_connections(), 0);
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_dropped_connection_ends_as_failure() {
        let (platform, adapter, events) = setup();
        adapter.uninstall();
        platform.sockets.replace(Arc::new(Forgetful));
        adapter.install().unwrap();

        for _ in 0..50 {
            let connection = platform
                .sockets
                .current()
                .connect("wss://live.test/feed", Arc::new(CountingListener::default()))
                .unwrap();
            drop(connection);
        }

        assert_eq!(adapter.open_connections(), 0);
        let events = events.lock().unwrap();
        let dropped = events
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    NetworkEvent::RequestFailed { error, duration_ms: Some(_), .. }
                        if error == DROPPED
                )
            })
            .count();
        assert_eq!(dropped, 50);
    }

    #[test]
    fn test_closed_connection_is_not_reported_again_on_drop() {
        let (platform, _adapter, events) = setup();
        let connection = platform
            .sockets
            .current()
            .connect("wss://live.test/feed", Arc::new(CountingListener::default()))
            .unwrap();
        connection.close(1000, "done");
        drop(connection);

        assert!(!events
            .lock()
            .unwrap()
            .iter()
            .any(|event| matches!(event, NetworkEvent::RequestFailed { .. })));
    }
}
