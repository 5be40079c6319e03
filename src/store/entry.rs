//! Storage entry and identity types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, monotonically increasing entry token.
///
/// Unique for the lifetime of the store that issued it. The 64-bit counter
/// does not wrap within any realistic session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(u64);

impl EntryId {
    /// Wraps a raw counter value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw counter value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A payload wrapped with its store identity and capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry<T> {
    /// Store-issued identity.
    pub id: EntryId,
    /// Capture time (Unix epoch milliseconds).
    pub timestamp: u64,
    /// The stored record.
    pub payload: T,
}

/// Why an entry left a store without being explicitly deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The store was full and needed room.
    Capacity,
    /// The entry outlived the store's TTL.
    Expired,
}

impl EvictionReason {
    /// Returns the reason as a metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::Expired => "expired",
        }
    }
}
