//! Per-key entry queue
//!
//! `KeyQueue` is the ordered storage behind one key. It knows nothing about
//! locking: every engine mutates it only while holding the lock that guards
//! the key. Any operation that walks the queue discards expired entries it
//! passes over, so correctness never depends on when the sweeper last ran.

use crate::types::Expirable;
use std::collections::VecDeque;
use std::time::Instant;

/// Result of a queue scan: what was found and how many expired entries were dropped
#[derive(Debug, Clone, PartialEq)]
pub struct Scan<T> {
    pub found: Option<T>,
    pub expired: usize,
}

impl<T> Scan<T> {
    fn miss(expired: usize) -> Self {
        Self {
            found: None,
            expired,
        }
    }
}

/// Ordered values (or expirables) stored under one key
#[derive(Debug, Clone)]
pub struct KeyQueue<V> {
    entries: VecDeque<Expirable<V>>,
}

impl<V> Default for KeyQueue<V> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<V> KeyQueue<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail (FIFO delivery)
    pub fn push_back(&mut self, entry: Expirable<V>) {
        self.entries.push_back(entry);
    }

    /// Prepend at the head (urgent delivery)
    pub fn push_front(&mut self, entry: Expirable<V>) {
        self.entries.push_front(entry);
    }

    /// Replace everything with a single entry
    pub fn replace(&mut self, entry: Expirable<V>) {
        self.entries.clear();
        self.entries.push_back(entry);
    }

    /// Entry count, including expired entries not yet discarded
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove and return the earliest live entry accepted by `pred`
    pub fn take_first(&mut self, now: Instant, mut pred: impl FnMut(&V) -> bool) -> Scan<V> {
        let mut expired = 0;
        let mut idx = 0;
        while idx < self.entries.len() {
            if self.entries[idx].is_expired(now) {
                self.entries.remove(idx);
                expired += 1;
                continue;
            }
            if pred(self.entries[idx].value()) {
                let found = self.entries.remove(idx).map(Expirable::into_value);
                return Scan { found, expired };
            }
            idx += 1;
        }
        Scan::miss(expired)
    }

    /// Clone the earliest live entry accepted by `pred`, leaving it in place
    pub fn read_first(&mut self, now: Instant, mut pred: impl FnMut(&V) -> bool) -> Scan<V>
    where
        V: Clone,
    {
        let mut expired = 0;
        let mut idx = 0;
        while idx < self.entries.len() {
            if self.entries[idx].is_expired(now) {
                self.entries.remove(idx);
                expired += 1;
                continue;
            }
            if pred(self.entries[idx].value()) {
                let found = Some(self.entries[idx].value().clone());
                return Scan { found, expired };
            }
            idx += 1;
        }
        Scan::miss(expired)
    }

    /// Drop expired entries from the head until a live one is found
    ///
    /// Returns the number dropped; afterwards the head (if any) is live.
    pub fn trim_head(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        while self.entries.front().is_some_and(|e| e.is_expired(now)) {
            self.entries.pop_front();
            expired += 1;
        }
        expired
    }

    /// True if at least one entry is still live (expired heads are discarded)
    pub fn has_live(&mut self, now: Instant) -> Scan<bool> {
        let expired = self.trim_head(now);
        Scan {
            found: Some(!self.entries.is_empty()),
            expired,
        }
    }

    /// Remove every expired entry
    ///
    /// Returns the number removed and whether live expirable entries remain.
    pub fn purge_expired(&mut self, now: Instant) -> (usize, bool) {
        let before = self.entries.len();
        self.entries.retain(|e| !e.is_expired(now));
        let remaining_expirable = self.entries.iter().any(Expirable::is_expirable);
        (before - self.entries.len(), remaining_expirable)
    }

    /// Iterate over stored entries, expired ones included
    pub fn iter(&self) -> impl Iterator<Item = &Expirable<V>> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn expiring(value: &'static str, now: Instant, ms: u64) -> Expirable<&'static str> {
        Expirable::until(value, now + Duration::from_millis(ms))
    }

    #[test]
    fn test_fifo_and_push_front() {
        let now = Instant::now();
        let mut queue = KeyQueue::new();
        queue.push_back(Expirable::permanent("b"));
        queue.push_front(Expirable::permanent("a"));
        queue.push_back(Expirable::permanent("c"));

        assert_eq!(queue.take_first(now, |_| true).found, Some("a"));
        assert_eq!(queue.take_first(now, |_| true).found, Some("b"));
        assert_eq!(queue.take_first(now, |_| true).found, Some("c"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_replace_discards_previous() {
        let mut queue = KeyQueue::new();
        queue.push_back(Expirable::permanent(1));
        queue.push_back(Expirable::permanent(2));
        queue.replace(Expirable::permanent(3));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.read_first(Instant::now(), |_| true).found, Some(3));
    }

    #[test]
    fn test_scan_skips_non_matches_and_drops_expired() {
        let now = Instant::now();
        let mut queue = KeyQueue::new();
        queue.push_back(Expirable::permanent("x"));
        queue.push_back(expiring("stale", now, 1));
        queue.push_back(Expirable::permanent("y"));

        let later = now + Duration::from_millis(5);
        let scan = queue.take_first(later, |v| *v == "y");
        assert_eq!(scan.found, Some("y"));
        assert_eq!(scan.expired, 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.read_first(later, |_| true).found, Some("x"));
    }

    #[test]
    fn test_has_live_trims_expired_head() {
        let now = Instant::now();
        let mut queue = KeyQueue::new();
        queue.push_back(expiring("a", now, 1));
        queue.push_back(expiring("b", now, 1));

        let scan = queue.has_live(now + Duration::from_millis(2));
        assert_eq!(scan.found, Some(false));
        assert_eq!(scan.expired, 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_purge_reports_remaining_expirables() {
        let now = Instant::now();
        let mut queue = KeyQueue::new();
        queue.push_back(expiring("short", now, 1));
        queue.push_back(expiring("long", now, 10_000));
        queue.push_back(Expirable::permanent("forever"));

        let (removed, remaining) = queue.purge_expired(now + Duration::from_millis(2));
        assert_eq!(removed, 1);
        assert!(remaining);

        queue.take_first(now, |v| *v == "long");
        let (removed, remaining) = queue.purge_expired(now + Duration::from_millis(2));
        assert_eq!(removed, 0);
        assert!(!remaining);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Back(u8),
        Front(u8),
        Take,
        TakeMatching(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<u8>().prop_map(Op::Back),
            any::<u8>().prop_map(Op::Front),
            Just(Op::Take),
            (0u8..4).prop_map(Op::TakeMatching),
        ]
    }

    proptest! {
        #[test]
        fn test_queue_matches_deque_model(ops in prop::collection::vec(op(), 0..64)) {
            let now = Instant::now();
            let mut queue = KeyQueue::new();
            let mut model = VecDeque::new();

            for op in ops {
                match op {
                    Op::Back(v) => {
                        queue.push_back(Expirable::permanent(v));
                        model.push_back(v);
                    }
                    Op::Front(v) => {
                        queue.push_front(Expirable::permanent(v));
                        model.push_front(v);
                    }
                    Op::Take => {
                        prop_assert_eq!(queue.take_first(now, |_| true).found, model.pop_front());
                    }
                    Op::TakeMatching(m) => {
                        let expected = model
                            .iter()
                            .position(|v| v % 4 == m)
                            .and_then(|idx| model.remove(idx));
                        prop_assert_eq!(queue.take_first(now, |v| v % 4 == m).found, expected);
                    }
                }
                prop_assert_eq!(queue.len(), model.len());
            }
        }
    }
}
