//! In-flight operation tracking.

use crate::models::CorrelationId;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Tracks operations between start and completion.
///
/// Each id resolves at most once. Uninstalling the owning adapter drains
/// every pending operation, so late completions resolve to `None` and are
/// dropped by the caller.
#[derive(Debug, Default)]
pub struct Correlator {
    in_flight: Mutex<HashMap<CorrelationId, Instant>>,
}

impl Correlator {
    /// Creates an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a new operation under a fresh id.
    pub fn begin(&self) -> CorrelationId {
        let id = CorrelationId::generate();
        self.lock().insert(id.clone(), Instant::now());
        id
    }

    /// Finishes an operation, returning its elapsed time.
    ///
    /// Returns `None` for unknown, already resolved, or cancelled ids.
    pub fn resolve(&self, id: &CorrelationId) -> Option<Duration> {
        self.lock().remove(id).map(|started_at| started_at.elapsed())
    }

    /// Elapsed time of a live operation without resolving it.
    #[must_use]
    pub fn elapsed(&self, id: &CorrelationId) -> Option<Duration> {
        self.lock().get(id).map(Instant::elapsed)
    }

    /// Whether `id` is in flight.
    #[must_use]
    pub fn is_live(&self, id: &CorrelationId) -> bool {
        self.lock().contains_key(id)
    }

    /// Cancels every operation currently in flight, returning how many.
    pub fn cancel_all(&self) -> usize {
        let mut in_flight = self.lock();
        let count = in_flight.len();
        in_flight.clear();
        count
    }

    /// Operations in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CorrelationId, Instant>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_exactly_once() {
        let correlator = Correlator::new();
        let id = correlator.begin();
        assert!(correlator.is_live(&id));
        assert!(correlator.resolve(&id).is_some());
        assert!(correlator.resolve(&id).is_none());
        assert!(correlator.is_empty());
    }

    #[test]
    fn test_cancelled_operations_resolve_to_none() {
        let correlator = Correlator::new();
        let first = correlator.begin();
        let second = correlator.begin();
        assert_eq!(correlator.cancel_all(), 2);
        assert!(!correlator.is_live(&first));
        assert!(correlator.is_empty());

        let third = correlator.begin();
        assert!(correlator.resolve(&first).is_none());
        assert!(correlator.resolve(&third).is_some());
        assert!(correlator.resolve(&second).is_none());
        assert!(correlator.is_empty());
    }

    #[test]
    fn test_unknown_id() {
        let correlator = Correlator::new();
        assert!(correlator.resolve(&CorrelationId::new("nope")).is_none());
        assert!(correlator.elapsed(&CorrelationId::new("nope")).is_none());
    }
}
