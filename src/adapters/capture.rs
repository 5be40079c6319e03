//! Rendering captured payloads.
//!
//! Everything an adapter records passes through here: bodies are rendered
//! and capped, sensitive headers and query parameters are masked, and stacks
//! are captured and parsed into frames.
// Allow expect() on static regex patterns - these are guaranteed to compile
#![allow(clippy::expect_used)]

use crate::config::{DEFAULT_MAX_BODY_SIZE, LookoutConfig};
use crate::models::StackFrame;
use crate::platform::{Body, SocketFrame};
use regex::Regex;
use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Replacement for masked values.
pub const REDACTED: &str = "[REDACTED]";

/// Frames kept from a captured stack.
pub const MAX_STACK_FRAMES: usize = 32;

const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "x-csrf-token",
];

const SENSITIVE_FRAGMENTS: &[&str] = &["token", "secret", "password", "api-key", "apikey"];

static FRAME_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\d+:\s+(?P<function>.+?)\s*$").expect("static regex: backtrace frame")
});

static LOCATION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*at\s+(?P<file>.+?):(?P<line>\d+)(?::\d+)?\s*$")
        .expect("static regex: backtrace location")
});

static SYMBOL_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"::h[0-9a-f]{16}$").expect("static regex: symbol hash"));

/// What adapters capture and how much.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Body cap in bytes.
    pub max_body_size: usize,
    /// Capture call-site stacks.
    pub capture_stack_traces: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            capture_stack_traces: true,
        }
    }
}

impl From<&LookoutConfig> for CaptureOptions {
    fn from(config: &LookoutConfig) -> Self {
        Self {
            max_body_size: config.max_body_size,
            capture_stack_traces: config.capture_stack_traces,
        }
    }
}

impl CaptureOptions {
    /// Renders a body under the size cap.
    #[must_use]
    pub fn body(&self, body: &Body) -> String {
        render_body(body, self.max_body_size)
    }

    /// Renders a socket frame under the size cap.
    #[must_use]
    pub fn frame(&self, frame: &SocketFrame) -> String {
        match frame {
            SocketFrame::Text(text) => truncate(text, self.max_body_size),
            SocketFrame::Binary(bytes) => render_bytes(bytes, self.max_body_size),
        }
    }

    /// Captures the current stack if stack capture is on.
    #[must_use]
    pub fn stack(&self) -> Option<Vec<StackFrame>> {
        self.capture_stack_traces.then(capture_stack)
    }
}

/// Renders a body, truncating text past `max` bytes.
///
/// Bytes that are not UTF-8 become `[binary N bytes]`.
#[must_use]
pub fn render_body(body: &Body, max: usize) -> String {
    match body {
        Body::Text(text) => truncate(text, max),
        Body::Bytes(bytes) => render_bytes(bytes, max),
        Body::Json(value) => truncate(&value.to_string(), max),
    }
}

fn render_bytes(bytes: &[u8], max: usize) -> String {
    std::str::from_utf8(bytes).map_or_else(
        |_| format!("[binary {} bytes]", bytes.len()),
        |text| truncate(text, max),
    )
}

/// Cuts `text` to at most `max` bytes on a char boundary, noting the loss.
#[must_use]
pub fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...[truncated {} bytes]", &text[..cut], text.len() - cut)
}

/// Renders one logging argument; strings are taken verbatim.
#[must_use]
pub fn render_arg(value: &serde_json::Value, max: usize) -> String {
    match value {
        serde_json::Value::String(s) => truncate(s, max),
        other => truncate(&other.to_string(), max),
    }
}

/// Whether a header or parameter name carries credentials.
#[must_use]
pub fn is_sensitive(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    SENSITIVE_HEADERS.contains(&name.as_str())
        || SENSITIVE_FRAGMENTS
            .iter()
            .any(|fragment| name.replace('_', "-").contains(fragment))
}

/// Copies headers, masking sensitive values.
#[must_use]
pub fn redact_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if is_sensitive(name) {
                REDACTED.to_string()
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}

/// Masks sensitive query parameter values in a URL.
#[must_use]
pub fn redact_url(url: &str) -> String {
    let Some((base, rest)) = url.split_once('?') else {
        return url.to_string();
    };
    let (query, fragment) = rest
        .split_once('#')
        .map_or((rest, None), |(q, f)| (q, Some(f)));

    let query = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((name, _)) if is_sensitive(name) => format!("{name}={REDACTED}"),
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&");

    match fragment {
        Some(fragment) => format!("{base}?{query}#{fragment}"),
        None => format!("{base}?{query}"),
    }
}

/// Captures the calling thread's stack, innermost frame first.
///
/// Frames belonging to the capture machinery are dropped.
#[must_use]
pub fn capture_stack() -> Vec<StackFrame> {
    let rendered = Backtrace::force_capture().to_string();
    parse_backtrace(&rendered)
        .into_iter()
        .skip_while(|frame| is_capture_frame(&frame.function))
        .take(MAX_STACK_FRAMES)
        .collect()
}

fn is_capture_frame(function: &str) -> bool {
    function.starts_with("std::backtrace")
        || function.starts_with("<std::backtrace")
        || function.starts_with("lookout::adapters")
        || function.starts_with("<lookout::adapters")
        || function.starts_with("std::panicking")
        || function.starts_with("core::panicking")
        || function.starts_with("rust_begin_unwind")
        || function.starts_with("__rustc")
}

/// Parses the `Display` form of a [`Backtrace`].
#[must_use]
pub fn parse_backtrace(text: &str) -> Vec<StackFrame> {
    let mut frames: Vec<StackFrame> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = FRAME_LINE.captures(line) {
            let function = SYMBOL_HASH.replace(&caps["function"], "").into_owned();
            frames.push(StackFrame::new(function, None, None));
        } else if let Some(caps) = LOCATION_LINE.captures(line) {
            if let Some(frame) = frames.last_mut().filter(|f| f.file.is_none()) {
                frame.file = Some(caps["file"].to_string());
                frame.line = caps["line"].parse().ok();
            }
        }
    }
    frames
}
