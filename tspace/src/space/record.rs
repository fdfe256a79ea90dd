//! Per-key record: lock, conditions and queue for one key

use crate::cancel::Wake;
use crate::queue::KeyQueue;
use parking_lot::{Condvar, Mutex};

/// State guarded by a record's lock
#[derive(Debug)]
pub(crate) struct RecordState<V> {
    pub(crate) queue: KeyQueue<V>,
    /// Threads currently parked on `has_value`
    pub(crate) waiters: usize,
    /// Set once the record has been dropped from the table; holders of a
    /// stale `Arc` must look the key up again
    pub(crate) retired: bool,
}

/// Everything the per-key engine keeps for one key
#[derive(Debug)]
pub(crate) struct KeyRecord<V> {
    pub(crate) state: Mutex<RecordState<V>>,
    /// Signalled on every insertion under this key
    pub(crate) has_value: Condvar,
    /// Signalled whenever the queue becomes empty
    pub(crate) is_empty: Condvar,
}

impl<V> KeyRecord<V> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RecordState {
                queue: KeyQueue::new(),
                waiters: 0,
                retired: false,
            }),
            has_value: Condvar::new(),
            is_empty: Condvar::new(),
        }
    }

    /// Wake every thread parked on either condition
    pub(crate) fn wake_all(&self) {
        let _state = self.state.lock();
        self.has_value.notify_all();
        self.is_empty.notify_all();
    }
}

impl<V: Send> Wake for KeyRecord<V> {
    fn wake(&self) {
        self.wake_all();
    }
}
