//! Bounded in-memory stores.
//!
//! Two containers with fixed capacity and deterministic eviction:
//!
//! | Store | Addressing | Eviction | Expiry |
//! |-------|------------|----------|--------|
//! | [`RingStore`] | generated [`EntryId`] | FIFO by insertion | optional TTL |
//! | [`IndexedStore`] | caller-supplied key | least recently used | optional TTL |
//!
//! Capacity eviction is push-triggered and synchronous. Expiry is lazy on read
//! and active only through `remove_expired`, which a periodic external caller
//! invokes; the stores never own a background timer.

mod clock;
mod entry;
mod indexed;
mod ring;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{EntryId, EvictionReason, StorageEntry};
pub use indexed::IndexedStore;
pub use ring::RingStore;

use std::time::Duration;

/// Returns true when an entry written at `timestamp` has outlived `ttl` at `now`.
///
/// An entry is still live exactly at `timestamp + ttl`.
pub(crate) fn is_expired(timestamp: u64, ttl: Option<Duration>, now: u64) -> bool {
    ttl.is_some_and(|ttl| {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        now.saturating_sub(timestamp) > ttl_ms
    })
}
