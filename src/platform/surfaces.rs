//! Host surfaces that adapters wrap.
//!
//! Each trait is one entry point the host routes work through. The host
//! installs its real implementation into the matching [`super::Platform`]
//! slot; adapters replace the slot with a wrapper that observes and then
//! delegates.

use crate::models::{LogLevel, MemoryUsage, PaintTimings};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error as ThisError;

/// Request or response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Structured JSON.
    Json(serde_json::Value),
}

impl Body {
    /// Size of the payload in bytes as it would go over the wire.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Bytes(bytes) => bytes.len(),
            Self::Json(value) => value.to_string().len(),
        }
    }

    /// Returns true for an empty payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An outbound HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: String,
    /// Target URL.
    pub url: String,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Optional body.
    pub body: Option<Body>,
}

impl HttpRequest {
    /// Creates a request without headers or body.
    #[must_use]
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Shorthand for a GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }
}

/// An HTTP response delivered to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub status_text: String,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// Optional body.
    pub body: Option<Body>,
    /// Whether a cache satisfied the request.
    pub from_cache: bool,
}

impl HttpResponse {
    /// Creates a response with a status and no body.
    #[must_use]
    pub fn new(status: u16, status_text: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers: BTreeMap::new(),
            body: None,
            from_cache: false,
        }
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Marks the response as served from cache.
    #[must_use]
    pub const fn cached(mut self) -> Self {
        self.from_cache = true;
        self
    }
}

/// A transport-level failure reported by a host surface.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("{message}")]
pub struct TransportError {
    /// Failure description.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Future-returning HTTP entry point.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Performs a request.
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Completion callback for [`HttpSend`].
pub type SendCallback = Box<dyn FnOnce(Result<HttpResponse, TransportError>) + Send>;

/// Callback-completing HTTP entry point.
pub trait HttpSend: Send + Sync {
    /// Starts a request; `on_complete` runs exactly once when it finishes.
    fn send(&self, request: HttpRequest, on_complete: SendCallback);
}

/// One socket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFrame {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl SocketFrame {
    /// Frame size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns true for an empty frame.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receives socket lifecycle callbacks from the transport.
pub trait SocketListener: Send + Sync {
    /// The connection opened.
    fn on_open(&self) {}
    /// A frame arrived.
    fn on_message(&self, _frame: &SocketFrame) {}
    /// The connection closed.
    fn on_close(&self, _code: u16, _reason: &str) {}
    /// The connection failed.
    fn on_error(&self, _message: &str) {}
}

/// A live socket connection.
pub trait SocketConnection: Send + Sync {
    /// Sends a frame.
    fn send(&self, frame: SocketFrame) -> Result<(), TransportError>;
    /// Closes the connection.
    fn close(&self, code: u16, reason: &str);
}

/// Streaming socket entry point.
pub trait SocketConnector: Send + Sync {
    /// Opens a connection; `listener` receives its lifecycle callbacks.
    fn connect(
        &self,
        url: &str,
        listener: Arc<dyn SocketListener>,
    ) -> Result<Arc<dyn SocketConnection>, TransportError>;
}

/// Logging entry point.
pub trait Console: Send + Sync {
    /// Writes one logging call.
    fn write(&self, level: LogLevel, args: &[serde_json::Value]);
}

/// An unhandled task failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Failure description.
    pub message: String,
    /// Name of the failed task, when known.
    pub task: Option<String>,
    /// `file:line` of the failure site, when known.
    pub location: Option<String>,
}

impl Rejection {
    /// Creates a rejection with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            task: None,
            location: None,
        }
    }

    /// Names the failed task.
    #[must_use]
    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }
}

/// Entry point the host reports unhandled task failures to.
pub trait RejectionSink: Send + Sync {
    /// Reports a failure.
    fn report(&self, rejection: &Rejection);
}

/// Frame callback; receives the frame timestamp in milliseconds.
pub type FrameCallback = Box<dyn FnOnce(f64) + Send>;

/// Frame scheduling entry point.
pub trait FrameScheduler: Send + Sync {
    /// Runs `callback` at the next frame.
    fn request_frame(&self, callback: FrameCallback);
}

/// Heap usage reading.
pub trait MemoryProbe: Send + Sync {
    /// Current usage, if the host can report it.
    fn memory_usage(&self) -> Option<MemoryUsage>;
}

/// Paint milestone reading.
pub trait PaintTimeline: Send + Sync {
    /// Milestones recorded so far.
    fn paint_timings(&self) -> PaintTimings;
}
