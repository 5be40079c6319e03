//! Error fingerprinting.
//!
//! Two errors share a fingerprint when their messages agree after
//! normalization and their top application frame is the same. Normalization
//! replaces the parts of a message that vary between occurrences of one
//! fault: quoted strings, hex addresses and numbers.

// Static regexes are compile-time constants.
#![allow(clippy::expect_used)]

use crate::models::StackFrame;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Frame prefixes that belong to the runtime or to this crate.
pub const LIBRARY_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "backtrace::",
    "tokio::",
    "lookout::",
    "<std::",
    "<core::",
    "<alloc::",
];

/// File path fragments that belong to the toolchain or dependencies.
const LIBRARY_PATHS: &[&str] = &["/rustc/", ".cargo/registry", ".cargo/git"];

static QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""[^"]*"|'[^']*'|`[^`]*`"#).expect("static regex: quoted strings")
});

static ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b0x[0-9a-fA-F]+\b").expect("static regex: hex address"));

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?\b").expect("static regex: number"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static regex: whitespace"));

/// Normalizes a message for grouping.
#[must_use]
pub fn normalize_message(message: &str) -> String {
    let text = QUOTED.replace_all(message, "<str>");
    let text = ADDRESS.replace_all(&text, "<addr>");
    let text = NUMBER.replace_all(&text, "<num>");
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Whether a frame belongs to the runtime, a dependency, or this crate.
#[must_use]
pub fn is_library_frame(frame: &StackFrame) -> bool {
    LIBRARY_PREFIXES
        .iter()
        .any(|prefix| frame.function.starts_with(prefix))
        || frame
            .file
            .as_deref()
            .is_some_and(|file| LIBRARY_PATHS.iter().any(|path| file.contains(path)))
}

/// The first application frame, falling back to the first frame.
#[must_use]
pub fn top_frame(stack: &[StackFrame]) -> Option<&StackFrame> {
    stack
        .iter()
        .find(|frame| !is_library_frame(frame))
        .or_else(|| stack.first())
}

/// Computes the grouping key for an error.
///
/// `location` stands in for the stack when none was captured.
#[must_use]
pub fn fingerprint(message: &str, stack: &[StackFrame], location: Option<&str>) -> String {
    let site = top_frame(stack).map_or_else(
        || location.unwrap_or_default().to_string(),
        |frame| {
            format!(
                "{}|{}|{}",
                frame.function,
                frame.file.as_deref().unwrap_or_default(),
                frame.line.map(|line| line.to_string()).unwrap_or_default()
            )
        },
    );

    let mut hasher = Sha256::new();
    hasher.update(normalize_message(message).as_bytes());
    hasher.update(b"\n");
    hasher.update(site.as_bytes());
    hex::encode(hasher.finalize())
}
