//! Fixed-capacity FIFO ring buffer.
//!
//! Entries live in a circular array of slots. `head` points at the oldest live
//! entry and `tail` at the next write position. Pushing into a full buffer
//! evicts exactly the entry at `head` before writing, so eviction order is
//! insertion order regardless of later payload mutation.

use super::{Clock, EntryId, EvictionReason, StorageEntry, SystemClock, is_expired};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked synchronously with each evicted entry.
pub type RingEvictionCallback<T> = Box<dyn FnMut(&StorageEntry<T>, EvictionReason) + Send>;

/// Insertion-ordered bounded store with FIFO eviction.
pub struct RingStore<T> {
    slots: Vec<Option<StorageEntry<T>>>,
    head: usize,
    tail: usize,
    size: usize,
    next_id: u64,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
    on_evict: Option<RingEvictionCallback<T>>,
}

impl<T> RingStore<T> {
    /// Creates a ring store holding at most `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] if `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity { store: "ring" });
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots,
            head: 0,
            tail: 0,
            size: 0,
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
        F: FnMut(&StorageEntry<T>, EvictionReason) + Send + 'static,
    {
        self.on_evict = Some(Box::new(callback));
    }

    /// Appends a payload stamped with the current time, returning its id.
    pub fn push(&mut self, payload: T) -> EntryId {
        self.push_evicting(payload).0
    }

    /// Appends a payload and hands back the entry evicted to make room, if any.
    ///
    /// The eviction callback still fires before this returns.
    pub fn push_evicting(&mut self, payload: T) -> (EntryId, Option<StorageEntry<T>>) {
        let now = self.clock.now_ms();
        self.push_at(payload, now)
    }

    /// Appends a payload with an explicit capture time.
    pub fn push_with_timestamp(&mut self, payload: T, timestamp: u64) -> EntryId {
        self.push_at(payload, timestamp).0
    }

    /// Replaces the contents with `(timestamp, payload)` pairs, oldest first.
    ///
    /// Ids are reissued. Pairs beyond capacity evict the oldest as usual.
    pub fn import_entries(&mut self, entries: impl IntoIterator<Item = (u64, T)>) {
        self.clear();
        for (timestamp, payload) in entries {
            self.push_at(payload, timestamp);
        }
    }

    fn push_at(&mut self, payload: T, timestamp: u64) -> (EntryId, Option<StorageEntry<T>>) {
        let evicted = if self.size == self.capacity() {
            self.pop_oldest(EvictionReason::Capacity)
        } else {
            None
        };

        let id = EntryId::new(self.next_id);
        self.next_id += 1;
        self.place(StorageEntry {
            id,
            timestamp,
            payload,
        });
        (id, evicted)
    }

    fn place(&mut self, entry: StorageEntry<T>) {
        let capacity = self.capacity();
        self.slots[self.tail] = Some(entry);
        self.tail = (self.tail + 1) % capacity;
        self.size += 1;
    }

    fn pop_oldest(&mut self, reason: EvictionReason) -> Option<StorageEntry<T>> {
        if self.size == 0 {
            return None;
        }
        let entry = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.size -= 1;

        if let Some(evicted) = &entry {
            if let Some(callback) = self.on_evict.as_mut() {
                callback(evicted, reason);
            }
            metrics::counter!(
                "lookout_store_evictions_total",
                "store" => "ring",
                "reason" => reason.as_str()
            )
            .increment(1);
        }
        entry
    }

    fn slot_index(&self, offset: usize) -> usize {
        (self.head + offset) % self.capacity()
    }

    fn is_live(&self, entry: &StorageEntry<T>, now: u64) -> bool {
        !is_expired(entry.timestamp, self.ttl, now)
    }

    /// Iterates live entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &StorageEntry<T>> {
        let now = self.clock.now_ms();
        (0..self.size)
            .filter_map(move |offset| self.slots[self.slot_index(offset)].as_ref())
            .filter(move |entry| self.is_live(entry, now))
    }

    /// Returns the payload stored under `id`.
    pub fn get(&self, id: EntryId) -> Option<&T> {
        self.get_entry(id).map(|entry| &entry.payload)
    }

    /// Returns the full entry stored under `id`.
    pub fn get_entry(&self, id: EntryId) -> Option<&StorageEntry<T>> {
        self.iter().find(|entry| entry.id == id)
    }

    /// Mutates the payload stored under `id` in place.
    ///
    /// Returns false if no live entry has that id. Position in eviction
    /// order is unaffected.
    pub fn update<F>(&mut self, id: EntryId, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        match self.find_entry_mut(|entry| entry.id == id) {
            Some(entry) => {
                f(&mut entry.payload);
                true
            },
            None => false,
        }
    }

    /// Returns the first live payload matching `predicate`, oldest first.
    pub fn find<P>(&self, mut predicate: P) -> Option<&T>
    where
        P: FnMut(&T) -> bool,
    {
        self.iter()
            .map(|entry| &entry.payload)
            .find(|payload| predicate(payload))
    }

    /// Returns the first live entry matching `predicate` for in-place mutation.
    pub fn find_entry_mut<P>(&mut self, mut predicate: P) -> Option<&mut StorageEntry<T>>
    where
        P: FnMut(&StorageEntry<T>) -> bool,
    {
        let now = self.clock.now_ms();
        let ttl = self.ttl;
        let capacity = self.capacity();
        let head = self.head;
        let size = self.size;

        let index = (0..size).map(|offset| (head + offset) % capacity).find(|&index| {
            self.slots[index]
                .as_ref()
                .is_some_and(|entry| !is_expired(entry.timestamp, ttl, now) && predicate(entry))
        })?;
        self.slots[index].as_mut()
    }

    /// Returns all live payloads matching `predicate`, oldest first.
    pub fn filter<P>(&self, mut predicate: P) -> Vec<&T>
    where
        P: FnMut(&T) -> bool,
    {
        self.iter()
            .map(|entry| &entry.payload)
            .filter(|payload| predicate(payload))
            .collect()
    }

    /// Returns all live payloads, oldest first.
    pub fn get_all(&self) -> Vec<&T> {
        self.iter().map(|entry| &entry.payload).collect()
    }

    /// Returns all live entries with id and timestamp, oldest first.
    pub fn get_all_entries(&self) -> Vec<&StorageEntry<T>> {
        self.iter().collect()
    }

    /// Removes every entry without invoking the eviction callback.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.size = 0;
    }

    /// Returns the number of occupied slots, including expired entries not yet swept.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns the fixed capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the next push will evict.
    pub fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    /// Returns true if no slot is occupied.
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Sweeps expired entries, returning how many were removed.
    ///
    /// Survivors keep their ids, timestamps and relative order.
    pub fn remove_expired(&mut self) -> usize {
        if self.ttl.is_none() || self.size == 0 {
            return 0;
        }
        let now = self.clock.now_ms();

        let mut drained = Vec::with_capacity(self.size);
        for offset in 0..self.size {
            let index = self.slot_index(offset);
            if let Some(entry) = self.slots[index].take() {
                drained.push(entry);
            }
        }
        self.head = 0;
        self.tail = 0;
        self.size = 0;

        let mut removed = 0;
        for entry in drained {
            if self.is_live(&entry, now) {
                self.place(entry);
                continue;
            }
            removed += 1;
            if let Some(callback) = self.on_evict.as_mut() {
                callback(&entry, EvictionReason::Expired);
            }
        }

        if removed > 0 {
            metrics::counter!(
                "lookout_store_evictions_total",
                "store" => "ring",
                "reason" => EvictionReason::Expired.as_str()
            )
            .increment(removed as u64);
            tracing::debug!(removed, remaining = self.size, "Swept expired ring entries");
        }
        removed
    }
}

impl<T> std::fmt::Debug for RingStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingStore")
            .field("capacity", &self.capacity())
            .field("size", &self.size)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
