//! Cooperative cancellation of blocked retrievals

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Something a blocked caller is parked on
pub(crate) trait Wake: Send + Sync {
    /// Wake every thread parked on this object
    fn wake(&self);
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    parked: Mutex<Vec<Weak<dyn Wake>>>,
}

/// Cancellation signal shared between a blocked caller and whoever cancels it
///
/// Cancelling wakes the waiter, which then performs the same cleanup as a
/// timeout and returns `Ok(None)`.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel and wake every waiter parked under this token
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        // Wake outside the list lock; waiters register while holding their record lock.
        let parked = std::mem::take(&mut *self.inner.parked.lock());
        for waker in parked.iter().filter_map(Weak::upgrade) {
            waker.wake();
        }
    }

    /// Record that the caller is about to park on `target`
    ///
    /// Must be called before re-checking `is_cancelled` under the same lock
    /// the caller waits with.
    pub(crate) fn park_on(&self, target: Weak<dyn Wake>) {
        let mut parked = self.inner.parked.lock();
        parked.retain(|w| w.strong_count() > 0);
        if !parked.iter().any(|w| Weak::ptr_eq(w, &target)) {
            parked.push(target);
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
