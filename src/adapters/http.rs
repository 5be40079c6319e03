//! HTTP adapters for the future-returning and callback-completing APIs.

use super::{
    Adapter, CaptureOptions, Correlator, Handler, HandlerId, Handlers, Installation, Liveness,
    elapsed_ms, guarded, redact_headers, redact_url,
};
use crate::Result;
use crate::models::{CorrelationId, NetworkResponse, RequestKind, SocketMessage};
use crate::platform::{
    HttpFetch, HttpRequest, HttpResponse, HttpSend, Platform, SendCallback, TransportError,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Normalized network activity forwarded by the HTTP and socket adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A request or socket connection started.
    RequestStarted {
        /// Correlation id.
        id: CorrelationId,
        /// Producing surface.
        kind: RequestKind,
        /// HTTP method, `"CONNECT"` for sockets.
        method: String,
        /// Target URL with sensitive parameters masked.
        url: String,
        /// Request headers with sensitive values masked.
        headers: BTreeMap<String, String>,
        /// Size-capped body rendering.
        body: Option<String>,
        /// Start time (Unix epoch milliseconds).
        timestamp: u64,
    },
    /// An HTTP response arrived.
    ResponseReceived {
        /// Correlation id.
        id: CorrelationId,
        /// Producing surface.
        kind: RequestKind,
        /// HTTP method.
        method: String,
        /// Target URL.
        url: String,
        /// Captured response.
        response: NetworkResponse,
        /// Time since start.
        duration_ms: u64,
        /// Completion time (Unix epoch milliseconds).
        timestamp: u64,
    },
    /// A request or connection failed at the transport.
    RequestFailed {
        /// Correlation id.
        id: CorrelationId,
        /// Producing surface.
        kind: RequestKind,
        /// HTTP method.
        method: String,
        /// Target URL.
        url: String,
        /// Failure description.
        error: String,
        /// Time since start, when the failure ended the operation.
        duration_ms: Option<u64>,
        /// Failure time (Unix epoch milliseconds).
        timestamp: u64,
    },
    /// A socket opened.
    SocketOpened {
        /// Correlation id.
        id: CorrelationId,
        /// Target URL.
        url: String,
        /// Open time (Unix epoch milliseconds).
        timestamp: u64,
    },
    /// A socket frame was sent or received.
    SocketMessage {
        /// Correlation id.
        id: CorrelationId,
        /// Target URL.
        url: String,
        /// Captured frame.
        message: SocketMessage,
    },
    /// A socket closed.
    SocketClosed {
        /// Correlation id.
        id: CorrelationId,
        /// Target URL.
        url: String,
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
        /// Connection lifetime.
        duration_ms: u64,
        /// Close time (Unix epoch milliseconds).
        timestamp: u64,
    },
}

impl NetworkEvent {
    /// The correlation id the event belongs to.
    #[must_use]
    pub const fn id(&self) -> &CorrelationId {
        match self {
            Self::RequestStarted { id, .. }
            | Self::ResponseReceived { id, .. }
            | Self::RequestFailed { id, .. }
            | Self::SocketOpened { id, .. }
            | Self::SocketMessage { id, .. }
            | Self::SocketClosed { id, .. } => id,
        }
    }
}

/// Error recorded for an exchange dropped before its completion arrived.
pub const ABORTED: &str = "aborted";

/// A started exchange awaiting completion.
///
/// Dropping an unsettled exchange resolves its correlation as aborted, so a
/// cancelled future or a discarded completion callback never stays in flight.
struct Exchange {
    shared: Arc<HttpShared>,
    id: CorrelationId,
    method: String,
    url: String,
    settled: bool,
}

impl Exchange {
    fn settle(&mut self, result: Option<&std::result::Result<HttpResponse, TransportError>>) {
        if std::mem::replace(&mut self.settled, true) {
            return;
        }
        let Some(elapsed) = self.shared.correlator.resolve(&self.id) else {
            debug!(adapter = self.shared.name, id = %self.id, "Dropping late completion");
            return;
        };
        let shared = Arc::clone(&self.shared);
        guarded(shared.name, || shared.finish(self, elapsed_ms(elapsed), result));
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        if !self.settled {
            debug!(adapter = self.shared.name, id = %self.id, "Exchange dropped before completion");
            self.settle(None);
        }
    }
}

/// State shared between an HTTP adapter and its installed wrapper.
#[derive(Debug)]
struct HttpShared {
    name: &'static str,
    kind: RequestKind,
    options: CaptureOptions,
    correlator: Correlator,
    handlers: Handlers<NetworkEvent>,
}

impl HttpShared {
    fn new(name: &'static str, kind: RequestKind, options: CaptureOptions) -> Self {
        Self {
            name,
            kind,
            options,
            correlator: Correlator::new(),
            handlers: Handlers::default(),
        }
    }

    fn start(shared: &Arc<Self>, request: &HttpRequest) -> Exchange {
        let exchange = Exchange {
            shared: Arc::clone(shared),
            id: shared.correlator.begin(),
            method: request.method.to_uppercase(),
            url: redact_url(&request.url),
            settled: false,
        };
        debug!(adapter = shared.name, id = %exchange.id, url = %exchange.url, "Request started");
        shared.handlers.emit(
            shared.name,
            &NetworkEvent::RequestStarted {
                id: exchange.id.clone(),
                kind: shared.kind,
                method: exchange.method.clone(),
                url: exchange.url.clone(),
                headers: redact_headers(&request.headers),
                body: request.body.as_ref().map(|body| shared.options.body(body)),
                timestamp: crate::current_timestamp_ms(),
            },
        );
        exchange
    }

    /// Forwards the completion; `None` means the exchange was abandoned.
    fn finish(
        &self,
        exchange: &Exchange,
        duration_ms: u64,
        result: Option<&std::result::Result<HttpResponse, TransportError>>,
    ) {
        let timestamp = crate::current_timestamp_ms();
        let event = match result {
            Some(Ok(response)) => NetworkEvent::ResponseReceived {
                id: exchange.id.clone(),
                kind: self.kind,
                method: exchange.method.clone(),
                url: exchange.url.clone(),
                response: self.capture_response(response),
                duration_ms,
                timestamp,
            },
            Some(Err(err)) => NetworkEvent::RequestFailed {
                id: exchange.id.clone(),
                kind: self.kind,
                method: exchange.method.clone(),
                url: exchange.url.clone(),
                error: err.message.clone(),
                duration_ms: Some(duration_ms),
                timestamp,
            },
            None => NetworkEvent::RequestFailed {
                id: exchange.id.clone(),
                kind: self.kind,
                method: exchange.method.clone(),
                url: exchange.url.clone(),
                error: ABORTED.to_string(),
                duration_ms: Some(duration_ms),
                timestamp,
            },
        };
        self.handlers.emit(self.name, &event);
    }

    fn capture_response(&self, response: &HttpResponse) -> NetworkResponse {
        NetworkResponse {
            status: response.status,
            status_text: response.status_text.clone(),
            headers: redact_headers(&response.headers),
            body: response.body.as_ref().map(|body| self.options.body(body)),
            from_cache: response.from_cache,
        }
    }
}

struct FetchWrapper {
    original: Arc<dyn HttpFetch>,
    shared: Arc<HttpShared>,
    live: Liveness,
}

#[async_trait]
impl HttpFetch for FetchWrapper {
    async fn fetch(
        &self,
        request: HttpRequest,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let exchange = self
            .live
            .capture(self.shared.name, || HttpShared::start(&self.shared, &request));
        let result = self.original.fetch(request).await;
        if let Some(mut exchange) = exchange {
            exchange.settle(Some(&result));
        }
        result
    }
}

/// Wraps the platform's `fetch` entry point.
#[derive(Debug)]
pub struct FetchAdapter {
    platform: Arc<Platform>,
    shared: Arc<HttpShared>,
    installation: Installation<dyn HttpFetch>,
}

impl FetchAdapter {
    /// Creates an uninstalled adapter.
    #[must_use]
    pub fn new(platform: Arc<Platform>, options: CaptureOptions) -> Self {
        Self {
            platform,
            shared: Arc::new(HttpShared::new("fetch", RequestKind::Fetch, options)),
            installation: Installation::new("fetch"),
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

    /// Requests started but not yet completed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.correlator.len()
    }
}

impl Adapter for FetchAdapter {
    fn name(&self) -> &'static str {
        self.shared.name
    }

    fn install(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        self.installation.install(
            &self.platform.fetch,
            |original: Arc<dyn HttpFetch>, live| -> Arc<dyn HttpFetch> {
                Arc::new(FetchWrapper {
                    original,
                    shared,
                    live,
                })
            },
        )
    }

    fn uninstall(&self) {
        self.installation.uninstall(&self.platform.fetch);
        self.shared.correlator.cancel_all();
    }

    fn is_installed(&self) -> bool {
        self.installation.is_installed()
    }
}

struct SendWrapper {
    original: Arc<dyn HttpSend>,
    shared: Arc<HttpShared>,
    live: Liveness,
}

impl HttpSend for SendWrapper {
    fn send(&self, request: HttpRequest, on_complete: SendCallback) {
        let Some(mut exchange) = self
            .live
            .capture(self.shared.name, || HttpShared::start(&self.shared, &request))
        else {
            self.original.send(request, on_complete);
            return;
        };
        // A transport that discards the callback drops the exchange with it.
        self.original.send(
            request,
            Box::new(move |result| {
                exchange.settle(Some(&result));
                on_complete(result);
            }),
        );
    }
}

/// Wraps the platform's `send` entry point.
#[derive(Debug)]
pub struct SendAdapter {
    platform: Arc<Platform>,
    shared: Arc<HttpShared>,
    installation: Installation<dyn HttpSend>,
}

impl SendAdapter {
    /// Creates an uninstalled adapter.
    #[must_use]
    pub fn new(platform: Arc<Platform>, options: CaptureOptions) -> Self {
        Self {
            platform,
            shared: Arc::new(HttpShared::new("send", RequestKind::Send, options)),
            installation: Installation::new("send"),
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

    /// Requests started but not yet completed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.correlator.len()
    }
}

impl Adapter for SendAdapter {
    fn name(&self) -> &'static str {
        self.shared.name
    }

    fn install(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        self.installation.install(
            &self.platform.send,
            |original: Arc<dyn HttpSend>, live| -> Arc<dyn HttpSend> {
                Arc::new(SendWrapper {
                    original,
                    shared,
                    live,
                })
            },
        )
    }

    fn uninstall(&self) {
        self.installation.uninstall(&self.platform.send);
        self.shared.correlator.cancel_all();
    }

    fn is_installed(&self) -> bool {
        self.installation.is_installed()
    }
}
