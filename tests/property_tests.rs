//! Property-based tests for the bounded stores and error grouping.
//!
//! Uses proptest to verify invariants across random inputs:
//! - The ring store keeps exactly the most recent `capacity` pushes, in order
//! - Every push past capacity evicts exactly one entry, oldest first
//! - The indexed store never exceeds capacity and evicts the least recently used key
//! - Message normalization is idempotent and number-insensitive

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use lookout::monitors::fingerprint::{fingerprint, normalize_message};
use lookout::store::{IndexedStore, RingStore};
use proptest::prelude::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

proptest! {
    /// Property: the ring holds the last `capacity` values in push order.
    #[test]
    fn prop_ring_keeps_most_recent(
        capacity in 1usize..32,
        values in prop::collection::vec(any::<u32>(), 0..128),
    ) {
        let mut store = RingStore::new(capacity).unwrap();
        for value in &values {
            store.push(*value);
        }

        let expected: Vec<u32> = values
            .iter()
            .skip(values.len().saturating_sub(capacity))
            .copied()
            .collect();
        let actual: Vec<u32> = store.get_all().into_iter().copied().collect();
        prop_assert_eq!(actual, expected);
        prop_assert_eq!(store.size(), values.len().min(capacity));
        prop_assert_eq!(store.is_full(), values.len() >= capacity);
    }

    /// Property: evictions happen once per overflowing push, oldest first.
    #[test]
    fn prop_ring_evicts_in_fifo_order(
        capacity in 1usize..16,
        values in prop::collection::vec(any::<u16>(), 0..64),
    ) {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&evicted);
        let mut store = RingStore::new(capacity).unwrap();
        store.on_evict(move |entry, _reason| sink.lock().unwrap().push(entry.payload));
        for value in &values {
            store.push(*value);
        }

        let expected: Vec<u16> = values
            .iter()
            .take(values.len().saturating_sub(capacity))
            .copied()
            .collect();
        prop_assert_eq!(evicted.lock().unwrap().clone(), expected);
    }

    /// Property: the indexed store matches a reference LRU model.
    #[test]
    fn prop_indexed_store_is_lru(
        capacity in 1usize..8,
        ops in prop::collection::vec((0u8..12, any::<bool>()), 0..96),
    ) {
        let mut store = IndexedStore::new(capacity).unwrap();
        // Front is least recently used.
        let mut model: VecDeque<u8> = VecDeque::new();

        for (key, is_write) in ops {
            if is_write {
                store.set(key, u32::from(key));
                model.retain(|k| *k != key);
                model.push_back(key);
                if model.len() > capacity {
                    model.pop_front();
                }
            } else if store.get(&key).is_some() {
                prop_assert!(model.contains(&key));
                model.retain(|k| *k != key);
                model.push_back(key);
            } else {
                prop_assert!(!model.contains(&key));
            }
            prop_assert!(store.size() <= capacity);
        }

        let recency: Vec<u8> = store.keys_by_recency().into_iter().copied().collect();
        let expected: Vec<u8> = model.iter().rev().copied().collect();
        prop_assert_eq!(recency, expected);
    }

    /// Property: normalizing twice changes nothing.
    #[test]
    fn prop_normalize_is_idempotent(message in "[a-zA-Z0-9 '\"x.]{0,60}") {
        let once = normalize_message(&message);
        prop_assert_eq!(normalize_message(&once), once);
    }

    /// Property: messages differing only in a number share a fingerprint.
    #[test]
    fn prop_fingerprint_ignores_numbers(a in 0u64..1_000_000, b in 0u64..1_000_000) {
        let left = fingerprint(&format!("order {a} failed"), &[], Some("src/shop.rs:10"));
        let right = fingerprint(&format!("order {b} failed"), &[], Some("src/shop.rs:10"));
        prop_assert_eq!(left, right);
    }
}
