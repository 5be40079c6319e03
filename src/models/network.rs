//! Network records: HTTP exchanges and socket connections.

use super::CorrelationId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which host surface produced the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Future-returning HTTP API.
    Fetch,
    /// Callback-completing HTTP API.
    Send,
    /// Streaming socket connection.
    Socket,
}

/// Lifecycle state of a network record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Request sent, no completion yet.
    Pending,
    /// Response received.
    Complete,
    /// Transport failed.
    Failed,
    /// Socket open.
    Open,
    /// Socket closed.
    Closed,
}

/// Captured response half of an HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkResponse {
    /// HTTP status code.
    pub status: u16,
    /// Status reason phrase.
    pub status_text: String,
    /// Response headers with sensitive values redacted.
    pub headers: BTreeMap<String, String>,
    /// Size-capped body rendering.
    pub body: Option<String>,
    /// Whether the host served the response from a cache.
    pub from_cache: bool,
}

impl NetworkResponse {
    /// Returns true for responses a cache satisfied.
    #[must_use]
    pub const fn is_cached(&self) -> bool {
        self.from_cache || self.status == 304
    }
}

/// Direction of a socket frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    /// Received from the peer.
    Incoming,
    /// Sent by the host.
    Outgoing,
}

/// One captured socket frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketMessage {
    /// Frame direction.
    pub direction: MessageDirection,
    /// Size-capped rendering of the frame.
    pub data: String,
    /// Original frame size in bytes.
    pub size: usize,
    /// Capture time (Unix epoch milliseconds).
    pub timestamp: u64,
}

/// A network record, updated in place as correlated events arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEntry {
    /// Correlation id assigned at request start.
    pub id: CorrelationId,
    /// Start time (Unix epoch milliseconds).
    pub timestamp: u64,
    /// Producing surface.
    pub kind: RequestKind,
    /// HTTP method, or `"CONNECT"` for sockets.
    pub method: String,
    /// Target URL.
    pub url: String,
    /// Request headers with sensitive values redacted.
    pub request_headers: BTreeMap<String, String>,
    /// Size-capped request body rendering.
    pub request_body: Option<String>,
    /// Current lifecycle state.
    pub state: RequestState,
    /// Filled in when the response arrives.
    pub response: Option<NetworkResponse>,
    /// Filled in when the transport fails.
    pub error: Option<String>,
    /// Elapsed time to completion in milliseconds.
    pub duration_ms: Option<u64>,
    /// Socket frames, oldest first, bounded.
    pub messages: Vec<SocketMessage>,
    /// Socket frames dropped from `messages` to respect the bound.
    pub dropped_messages: u64,
    /// Socket close code.
    pub close_code: Option<u16>,
    /// True when the completion arrived without a matching start.
    pub orphan: bool,
}

impl NetworkEntry {
    /// Creates a pending record for a newly started request.
    #[must_use]
    pub fn pending(
        id: CorrelationId,
        kind: RequestKind,
        method: impl Into<String>,
        url: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            id,
            timestamp,
            kind,
            method: method.into(),
            url: url.into(),
            request_headers: BTreeMap::new(),
            request_body: None,
            state: RequestState::Pending,
            response: None,
            error: None,
            duration_ms: None,
            messages: Vec::new(),
            dropped_messages: 0,
            close_code: None,
            orphan: false,
        }
    }

    /// Appends a socket frame, dropping the oldest beyond `limit`.
    pub fn push_message(&mut self, message: SocketMessage, limit: usize) {
        self.messages.push(message);
        if self.messages.len() > limit {
            let excess = self.messages.len() - limit;
            self.messages.drain(..excess);
            self.dropped_messages += excess as u64;
        }
    }

    /// Returns the lowercased path extension of the URL, if any.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        let path = match self.url.split_once("://") {
            Some((_, rest)) => rest.split_once('/').map_or("", |(_, path)| path),
            None => self.url.as_str(),
        };
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let last = path.rsplit('/').next().unwrap_or_default();
        let (_, ext) = last.rsplit_once('.')?;
        (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }
}
