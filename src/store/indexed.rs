//! Key-addressable bounded store with LRU eviction and optional TTL.
//!
//! Recency is tracked by an [`LruCache`]; both `get` and `set` refresh it.
//! When an insert would exceed capacity, expired entries are swept first
//! (they already read as absent), then the least recently used entry goes.

use super::{Clock, EntryId, EvictionReason, StorageEntry, SystemClock, is_expired};
use crate::{Error, Result};
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked synchronously with each evicted key and entry.
pub type IndexedEvictionCallback<K, T> =
    Box<dyn FnMut(&K, &StorageEntry<T>, EvictionReason) + Send>;

/// Bounded map with least-recently-used eviction.
pub struct IndexedStore<K: Hash + Eq, T> {
    entries: LruCache<K, StorageEntry<T>>,
    next_id: u64,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
    on_evict: Option<IndexedEvictionCallback<K, T>>,
}

impl<K: Hash + Eq + Clone, T> IndexedStore<K, T> {
    /// Creates an indexed store holding at most `capacity` keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] if `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or(Error::InvalidCapacity { store: "indexed" })?;
        Ok(Self {
            entries: LruCache::new(capacity),
            next_id: 1,
            ttl: None,
            clock: Arc::new(SystemClock),
            on_evict: None,
        })
    }

    /// Sets a time-to-live after which entries read as absent.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers the eviction callback, replacing any previous one.
    pub fn on_evict<F>(&mut self, callback: F)
    where
        F: FnMut(&K, &StorageEntry<T>, EvictionReason) + Send + 'static,
    {
        self.on_evict = Some(Box::new(callback));
    }

    /// Inserts or overwrites `key`, returning the entry id.
    ///
    /// Overwriting keeps the existing id, restamps the entry with the current
    /// time and marks it most recently used. Only new keys count toward
    /// capacity.
    pub fn set(&mut self, key: K, payload: T) -> EntryId {
        let now = self.clock.now_ms();
        self.set_at(key, payload, now)
    }

    /// Inserts or overwrites `key` with an explicit capture time.
    pub fn set_with_timestamp(&mut self, key: K, payload: T, timestamp: u64) -> EntryId {
        self.set_at(key, payload, timestamp)
    }

    fn set_at(&mut self, key: K, payload: T, timestamp: u64) -> EntryId {
        if let Some(existing) = self.entries.get_mut(&key) {
            existing.payload = payload;
            existing.timestamp = timestamp;
            return existing.id;
        }

        if self.entries.len() == self.entries.cap().get() {
            self.make_room();
        }

        let id = EntryId::new(self.next_id);
        self.next_id += 1;
        self.entries.put(
            key,
            StorageEntry {
                id,
                timestamp,
                payload,
            },
        );
        id
    }

    fn make_room(&mut self) {
        if self.remove_expired() > 0 {
            return;
        }
        if let Some((key, entry)) = self.entries.pop_lru() {
            self.notify(&key, &entry, EvictionReason::Capacity);
        }
    }

    fn notify(&mut self, key: &K, entry: &StorageEntry<T>, reason: EvictionReason) {
        if let Some(callback) = self.on_evict.as_mut() {
            callback(key, entry, reason);
        }
        metrics::counter!(
            "lookout_store_evictions_total",
            "store" => "indexed",
            "reason" => reason.as_str()
        )
        .increment(1);
    }

    /// Evicts `key` if it has expired. Returns true if it did.
    fn expire_if_stale(&mut self, key: &K) -> bool {
        let now = self.clock.now_ms();
        let stale = self
            .entries
            .peek(key)
            .is_some_and(|entry| is_expired(entry.timestamp, self.ttl, now));
        if stale {
            if let Some((key, entry)) = self.entries.pop_entry(key) {
                self.notify(&key, &entry, EvictionReason::Expired);
            }
        }
        stale
    }

    /// Returns the payload for `key`, marking it most recently used.
    ///
    /// Expired entries are evicted and read as absent.
    pub fn get(&mut self, key: &K) -> Option<&T> {
        self.get_entry(key).map(|entry| &entry.payload)
    }

    /// Returns the full entry for `key`, marking it most recently used.
    pub fn get_entry(&mut self, key: &K) -> Option<&StorageEntry<T>> {
        if self.expire_if_stale(key) {
            return None;
        }
        self.entries.get(key)
    }

    /// Returns a mutable payload for `key`, marking it most recently used.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut T> {
        if self.expire_if_stale(key) {
            return None;
        }
        self.entries.get_mut(key).map(|entry| &mut entry.payload)
    }

    /// Returns the payload for `key` without touching recency.
    pub fn peek(&self, key: &K) -> Option<&T> {
        let now = self.clock.now_ms();
        self.entries
            .peek(key)
            .filter(|entry| !is_expired(entry.timestamp, self.ttl, now))
            .map(|entry| &entry.payload)
    }

    /// Returns true if `key` holds a live entry. Does not touch recency.
    pub fn has(&self, key: &K) -> bool {
        self.peek(key).is_some()
    }

    /// Removes `key` without invoking the eviction callback.
    pub fn delete(&mut self, key: &K) -> Option<T> {
        self.entries.pop(key).map(|entry| entry.payload)
    }

    /// Removes every entry without invoking the eviction callback.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns the number of stored keys, including expired entries not yet swept.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Returns the fixed capacity.
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Returns true if no key is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_entries(&self) -> Vec<(&K, &StorageEntry<T>)> {
        let now = self.clock.now_ms();
        let mut live: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| !is_expired(entry.timestamp, self.ttl, now))
            .collect();
        live.sort_by_key(|(_, entry)| entry.id);
        live
    }

    /// Returns live keys in first-insertion order.
    pub fn get_all_keys(&self) -> Vec<&K> {
        self.live_entries().into_iter().map(|(key, _)| key).collect()
    }

    /// Returns live payloads in first-insertion order.
    pub fn get_all_values(&self) -> Vec<&T> {
        self.live_entries()
            .into_iter()
            .map(|(_, entry)| &entry.payload)
            .collect()
    }

    /// Returns live entries in first-insertion order.
    pub fn get_all_entries(&self) -> Vec<&StorageEntry<T>> {
        self.live_entries()
            .into_iter()
            .map(|(_, entry)| entry)
            .collect()
    }

    /// Returns live keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<&K> {
        let now = self.clock.now_ms();
        self.entries
            .iter()
            .filter(|(_, entry)| !is_expired(entry.timestamp, self.ttl, now))
            .map(|(key, _)| key)
            .collect()
    }

    /// Sweeps expired entries, returning how many were removed.
    pub fn remove_expired(&mut self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let now = self.clock.now_ms();
        let stale: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| is_expired(entry.timestamp, self.ttl, now))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = 0;
        for key in stale {
            if let Some((key, entry)) = self.entries.pop_entry(&key) {
                self.notify(&key, &entry, EvictionReason::Expired);
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "Swept expired indexed entries");
        }
        removed
    }
}

impl<K: Hash + Eq, T> std::fmt::Debug for IndexedStore<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedStore")
            .field("capacity", &self.entries.cap())
            .field("size", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ManualClock;
    use std::sync::Mutex;

    #[test]
    fn test_zero_capacity_rejected() {
        let result = IndexedStore::<String, u8>::new(0);
        assert!(matches!(result, Err(Error::InvalidCapacity { store: "indexed" })));
    }

    #[test]
    fn test_set_overwrite_keeps_id_and_size() {
        let mut store = IndexedStore::new(2).unwrap();
        let first = store.set("a", 1);
        let second = store.set("a", 2);
        assert_eq!(first, second);
        assert_eq!(store.size(), 1);
        assert_eq!(store.get(&"a"), Some(&2));
    }

    #[test]
    fn test_touched_key_survives_overflow() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&evicted);
        let mut store = IndexedStore::new(2).unwrap();
        store.on_evict(move |key: &&str, _, reason| sink.lock().unwrap().push((*key, reason)));

        store.set("a", 1);
        store.set("b", 2);
        assert_eq!(store.get(&"a"), Some(&1));
        store.set("c", 3);

        assert!(store.has(&"a"));
        assert!(!store.has(&"b"));
        assert!(store.has(&"c"));
        assert_eq!(
            *evicted.lock().unwrap(),
            vec![("b", EvictionReason::Capacity)]
        );
    }

    #[test]
    fn test_overwrite_refreshes_recency() {
        let mut store = IndexedStore::new(2).unwrap();
        store.set("a", 1);
        store.set("b", 2);
        store.set("a", 10);
        store.set("c", 3);
        assert!(store.has(&"a"));
        assert!(!store.has(&"b"));
    }

    #[test]
    fn test_ttl_boundary() {
        let clock = Arc::new(ManualClock::new(0));
        let mut store = IndexedStore::new(4)
            .unwrap()
            .with_ttl(Duration::from_millis(50))
            .with_clock(clock.clone());
        store.set("k", "v");

        clock.set(49);
        assert_eq!(store.get(&"k"), Some(&"v"));
        clock.set(51);
        assert_eq!(store.get(&"k"), None);
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn test_overflow_prefers_expired_entries() {
        let clock = Arc::new(ManualClock::new(0));
        let mut store = IndexedStore::new(2)
            .unwrap()
            .with_ttl(Duration::from_millis(10))
            .with_clock(clock.clone());
        store.set("stale", 0);
        clock.set(8);
        store.set("live", 1);
        assert_eq!(store.get(&"stale"), Some(&0));
        clock.set(15);

        // "stale" is most recently used but expired; "live" must survive.
        store.set("new", 2);
        assert!(store.has(&"live"));
        assert!(store.has(&"new"));
        assert_eq!(store.size(), 2);
    }

    #[test]
    fn test_all_expired_still_bounded() {
        let clock = Arc::new(ManualClock::new(0));
        let mut store = IndexedStore::new(2)
            .unwrap()
            .with_ttl(Duration::from_millis(1))
            .with_clock(clock.clone());
        store.set(1, "a");
        store.set(2, "b");
        clock.set(100);
        store.set(3, "c");
        assert_eq!(store.size(), 1);
        assert_eq!(store.get_all_values(), vec![&"c"]);
    }

    #[test]
    fn test_listing_is_insertion_ordered() {
        let mut store = IndexedStore::new(3).unwrap();
        store.set("x", 1);
        store.set("y", 2);
        store.set("z", 3);
        store.get(&"x");
        assert_eq!(store.get_all_keys(), vec![&"x", &"y", &"z"]);
        assert_eq!(store.keys_by_recency(), vec![&"x", &"z", &"y"]);
    }

    #[test]
    fn test_delete_and_clear_skip_callback() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let mut store = IndexedStore::new(3).unwrap();
        store.on_evict(move |_: &&str, _: &StorageEntry<i32>, _| *counter.lock().unwrap() += 1);
        store.set("a", 1);
        store.set("b", 2);
        assert_eq!(store.delete(&"a"), Some(1));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_peek_does_not_refresh() {
        let mut store = IndexedStore::new(2).unwrap();
        store.set("a", 1);
        store.set("b", 2);
        assert_eq!(store.peek(&"a"), Some(&1));
        store.set("c", 3);
        assert!(!store.has(&"a"));
    }
}
