//! The Space contract and its engines
//!
//! A space maps keys to ordered queues of values. Producers deposit values
//! under a key; consumers take or read them in FIFO order, optionally
//! blocking, optionally with a timeout, optionally filtering by content
//! through a [`Template`].
//!
//! This module provides:
//! - `Space` trait: the contract every engine honours
//! - `SpaceCore`: the per-key locking engine
//! - `LocalSpace`: `SpaceCore` plus a listener registry
//! - `GlobalLockSpace`: the single-lock baseline

mod global;
mod local;
mod per_key;
mod record;

pub use global::GlobalLockSpace;
pub use local::LocalSpace;
pub use per_key::SpaceCore;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::listener::Listener;
use crate::metrics::MetricsSnapshot;
use crate::template::Template;
use crate::types::{SpaceKey, SpaceValue};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Core trait for tuple-space engines
///
/// Every timeout is a [`Duration`]. On insertion a zero timeout means the
/// value never expires. Blocking operations without a timeout only return
/// once a value is available, or with [`SpaceError::Closed`] when the space
/// is closed underneath them.
///
/// [`SpaceError::Closed`]: crate::SpaceError::Closed
pub trait Space<K: SpaceKey, V: SpaceValue>: Send + Sync {
    /// Get the space name
    fn name(&self) -> &str;

    /// Append `value` to the tail of `key`'s queue, expiring after `timeout`
    fn out_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()>;

    /// Prepend `value` to the head of `key`'s queue, expiring after `timeout`
    fn push_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()>;

    /// Replace `key`'s whole queue with `value`, expiring after `timeout`
    fn put_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()>;

    fn out(&self, key: K, value: V) -> Result<()> {
        self.out_timeout(key, value, Duration::ZERO)
    }

    fn push(&self, key: K, value: V) -> Result<()> {
        self.push_timeout(key, value, Duration::ZERO)
    }

    fn put(&self, key: K, value: V) -> Result<()> {
        self.put_timeout(key, value, Duration::ZERO)
    }

    /// Remove and return the head, blocking until a value arrives
    fn in_(&self, key: &K) -> Result<V>;

    /// Remove and return the head, blocking up to `timeout`
    fn in_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>>;

    /// Return the head without removing it, blocking until a value arrives
    fn rd(&self, key: &K) -> Result<V>;

    fn rd_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>>;

    /// Remove and return the head if one is present
    fn inp(&self, key: &K) -> Result<Option<V>>;

    /// Return the head if one is present
    fn rdp(&self, key: &K) -> Result<Option<V>>;

    /// Remove the earliest value accepted by `template`, blocking
    fn in_match(&self, template: &Template<K, V>) -> Result<V>;

    fn in_match_timeout(&self, template: &Template<K, V>, timeout: Duration) -> Result<Option<V>>;

    fn rd_match(&self, template: &Template<K, V>) -> Result<V>;

    fn rd_match_timeout(&self, template: &Template<K, V>, timeout: Duration) -> Result<Option<V>>;

    fn inp_match(&self, template: &Template<K, V>) -> Result<Option<V>>;

    fn rdp_match(&self, template: &Template<K, V>) -> Result<Option<V>>;

    /// Remove and return the head, giving up on timeout or when `token` is
    /// cancelled
    ///
    /// `timeout: None` waits without a deadline. Both ways of giving up
    /// return `Ok(None)` after the same cleanup a timeout performs.
    fn in_cancellable(
        &self,
        key: &K,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>>;

    fn rd_cancellable(
        &self,
        key: &K,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>>;

    fn in_match_cancellable(
        &self,
        template: &Template<K, V>,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>>;

    fn rd_match_cancellable(
        &self,
        template: &Template<K, V>,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>>;

    /// Block while `key` holds a live value
    fn nrd(&self, key: &K) -> Result<()>;

    /// Block up to `timeout` while `key` holds a live value
    ///
    /// Returns `None` once the key is empty, or the value still present
    /// when the timeout elapsed.
    fn nrd_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>>;

    /// True if at least one of `keys` holds a live value
    fn exist_any(&self, keys: &[K]) -> Result<bool>;

    fn exist_any_timeout(&self, keys: &[K], timeout: Duration) -> Result<bool>;

    /// Number of entries stored under `key`
    fn size(&self, key: &K) -> usize;

    /// Snapshot of keys currently holding storage
    fn keys(&self) -> Vec<K>;

    /// Register a one-shot listener for the next insertion under `key`
    fn add_listener(&self, key: K, listener: Arc<dyn Listener<K, V>>) -> Result<()> {
        self.add_listener_timeout(key, listener, Duration::ZERO)
    }

    /// Like `add_listener`, but the registration lapses after `timeout`
    fn add_listener_timeout(
        &self,
        key: K,
        listener: Arc<dyn Listener<K, V>>,
        timeout: Duration,
    ) -> Result<()>;

    /// Remove a registration of `listener`; true if one was found
    fn remove_listener(&self, key: &K, listener: &Arc<dyn Listener<K, V>>) -> Result<bool>;

    /// Write a bounded diagnostic listing
    fn dump(&self, sink: &mut dyn io::Write, indent: &str) -> io::Result<()>;

    fn metrics(&self) -> MetricsSnapshot;

    /// Wake blocked callers with `Closed` and release all state
    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Where an insertion lands in the key's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// FIFO append (`out`)
    Tail,
    /// Urgent prepend (`push`)
    Head,
    /// Destructive replacement (`put`)
    Replace,
}

/// How long a retrieval may block
#[derive(Debug, Clone, Copy)]
pub(crate) enum Wait {
    Probe,
    Until(Instant),
    Forever,
}

impl Wait {
    pub(crate) fn timeout(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Wait::Until(deadline),
            None => Wait::Forever,
        }
    }
}

/// One key's line in a dump
pub(crate) struct DumpRow {
    pub key: String,
    pub size: usize,
    pub head: Option<String>,
}

/// Shared dump layout for all engines
pub(crate) struct DumpView<'a> {
    pub name: &'a str,
    pub closed: bool,
    pub limit: usize,
    pub pending: (usize, usize),
    pub metrics: MetricsSnapshot,
}

impl DumpView<'_> {
    pub fn write(
        &self,
        sink: &mut dyn io::Write,
        indent: &str,
        mut rows: Vec<DumpRow>,
    ) -> io::Result<()> {
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        let status = if self.closed { " closed" } else { "" };
        writeln!(sink, "{indent}space {} ({} keys){status}", self.name, rows.len())?;
        for row in rows.iter().take(self.limit) {
            match &row.head {
                Some(head) => {
                    writeln!(sink, "{indent}  {} size={} head={head}", row.key, row.size)?
                }
                None => writeln!(sink, "{indent}  {} size={}", row.key, row.size)?,
            }
        }
        if rows.len() > self.limit {
            writeln!(sink, "{indent}  ... {} more", rows.len() - self.limit)?;
        }
        let (short, long) = self.pending;
        writeln!(sink, "{indent}  gc short={short} long={long}")?;
        writeln!(sink, "{indent}  metrics {}", self.metrics)
    }
}
