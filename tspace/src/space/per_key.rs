//! Per-key locking engine
//!
//! Every key owns a [`KeyRecord`] holding its own mutex, a "value arrived"
//! condition, an "became empty" condition and the key's queue. Records are
//! created on demand in a concurrent map and dropped again by the
//! housekeeping step ([`CoreInner::settle`]) once their queue is empty and no
//! thread is parked waiting for a value. An insertion only wakes threads
//! parked on its own key.
//!
//! Lock order: a record lock may be held while touching the map (removal),
//! but a map guard is never held while acquiring a record lock. Anything
//! that needs to visit many records snapshots the map first.

use super::record::{KeyRecord, RecordState};
use super::{DumpRow, DumpView, Placement, Wait};
use crate::cancel::{CancelToken, Wake};
use crate::config::SpaceConfig;
use crate::error::{Result, SpaceError};
use crate::metrics::{MetricsSnapshot, SpaceMetrics};
use crate::queue::KeyQueue;
use crate::sweeper::{Generation, Generations, SweepReport, SweepTarget, Sweeper};
use crate::template::{Matcher, Template};
use crate::types::{Expirable, SpaceKey, SpaceValue};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

enum Select<'a, V> {
    Head,
    Matching(&'a dyn Matcher<V>),
}

impl<V> Clone for Select<'_, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Select<'_, V> {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Take,
    Read,
}

/// Space-wide "something was inserted" signal for timed `exist_any`
///
/// Producers only touch the lock when somebody is watching.
#[derive(Default)]
struct InsertSignal {
    watchers: AtomicUsize,
    epoch: Mutex<u64>,
    changed: Condvar,
}

impl InsertSignal {
    fn notify(&self) {
        if self.watchers.load(Ordering::SeqCst) > 0 {
            self.wake_all();
        }
    }

    fn wake_all(&self) {
        let mut epoch = self.epoch.lock();
        *epoch = epoch.wrapping_add(1);
        self.changed.notify_all();
    }

    /// Start watching; check the condition only after this returns
    fn watch(&self) -> InsertWatch<'_> {
        self.watchers.fetch_add(1, Ordering::SeqCst);
        let epoch = *self.epoch.lock();
        InsertWatch {
            signal: self,
            epoch,
        }
    }
}

struct InsertWatch<'a> {
    signal: &'a InsertSignal,
    epoch: u64,
}

impl InsertWatch<'_> {
    fn wait_until(&self, deadline: Instant) {
        let mut epoch = self.signal.epoch.lock();
        if *epoch == self.epoch {
            self.signal.changed.wait_until(&mut epoch, deadline);
        }
    }
}

impl Drop for InsertWatch<'_> {
    fn drop(&mut self) {
        self.signal.watchers.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct CoreInner<K, V> {
    name: String,
    config: SpaceConfig,
    table: DashMap<K, Arc<KeyRecord<V>>>,
    generations: Generations<K>,
    inserted: InsertSignal,
    metrics: SpaceMetrics,
    closed: AtomicBool,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<K: SpaceKey, V: SpaceValue> CoreInner<K, V> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn closed_error(&self) -> SpaceError {
        SpaceError::Closed(self.name.clone())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(self.closed_error())
        } else {
            Ok(())
        }
    }

    /// Look up the live record for `key`, creating it if absent
    fn record(&self, key: &K) -> Arc<KeyRecord<V>> {
        if let Some(record) = self.table.get(key) {
            return record.value().clone();
        }
        self.table
            .entry(key.clone())
            .or_insert_with(|| Arc::new(KeyRecord::new()))
            .value()
            .clone()
    }

    /// Look up the live record for `key` without creating one
    fn existing(&self, key: &K) -> Option<Arc<KeyRecord<V>>> {
        self.table.get(key).map(|record| record.value().clone())
    }

    fn records(&self) -> Vec<(K, Arc<KeyRecord<V>>)> {
        self.table
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Post-fetch housekeeping, run under the record lock
    ///
    /// Signals emptiness and drops the record from the table only when its
    /// queue is empty and nobody is parked waiting for a value on it.
    /// Returns true if the record was dropped.
    fn settle(&self, key: &K, record: &Arc<KeyRecord<V>>, state: &mut RecordState<V>) -> bool {
        if !state.queue.is_empty() {
            return false;
        }
        record.is_empty.notify_all();
        if state.waiters > 0 || state.retired {
            return false;
        }
        state.retired = true;
        self.generations.forget(key);
        let removed = self
            .table
            .remove_if(key, |_, current| Arc::ptr_eq(current, record))
            .is_some();
        if removed {
            self.metrics.record_removed_record();
            tracing::trace!(space = %self.name, ?key, "key record removed");
        }
        removed
    }

    fn scan(&self, queue: &mut KeyQueue<V>, select: Select<'_, V>, mode: Mode) -> Option<V> {
        let now = Instant::now();
        let scan = match (mode, select) {
            (Mode::Take, Select::Head) => queue.take_first(now, |_| true),
            (Mode::Take, Select::Matching(m)) => queue.take_first(now, |v| m.matches(v)),
            (Mode::Read, Select::Head) => queue.read_first(now, |_| true),
            (Mode::Read, Select::Matching(m)) => queue.read_first(now, |v| m.matches(v)),
        };
        self.metrics.record_expired(scan.expired);
        scan.found
    }

    fn insert(&self, key: K, value: V, ttl: Duration, placement: Placement) -> Result<()> {
        self.ensure_open()?;
        let entry = Expirable::with_ttl(value, ttl, Instant::now())
            .ok_or_else(|| SpaceError::invalid(format!("timeout {ttl:?} is out of range")))?;

        loop {
            let record = self.record(&key);
            let mut state = record.state.lock();
            if state.retired {
                continue;
            }
            if self.is_closed() {
                self.settle(&key, &record, &mut state);
                return Err(self.closed_error());
            }
            match placement {
                Placement::Tail => state.queue.push_back(entry),
                Placement::Head => state.queue.push_front(entry),
                Placement::Replace => state.queue.replace(entry),
            }
            // Registered under the record lock so `settle` cannot forget it early
            if !ttl.is_zero() {
                self.generations.register(&key, ttl);
            }
            record.has_value.notify_all();
            break;
        }

        self.metrics.record_insert();
        self.inserted.notify();
        Ok(())
    }

    fn fetch(
        &self,
        key: &K,
        select: Select<'_, V>,
        mode: Mode,
        wait: Wait,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<V>> {
        loop {
            self.ensure_open()?;
            let record = match wait {
                Wait::Probe => match self.existing(key) {
                    Some(record) => record,
                    None => {
                        self.metrics.record_probe_miss();
                        return Ok(None);
                    }
                },
                Wait::Until(_) | Wait::Forever => self.record(key),
            };
            let mut state = record.state.lock();
            if state.retired {
                continue;
            }

            loop {
                if let Some(value) = self.scan(&mut state.queue, select, mode) {
                    match mode {
                        Mode::Take => self.metrics.record_take(),
                        Mode::Read => self.metrics.record_read(),
                    }
                    self.settle(key, &record, &mut state);
                    return Ok(Some(value));
                }
                if self.is_closed() {
                    self.settle(key, &record, &mut state);
                    return Err(self.closed_error());
                }

                let cancelled = match cancel {
                    Some(token) => {
                        let weak = Arc::downgrade(&record);
                        let target: Weak<dyn Wake> = weak;
                        token.park_on(target);
                        token.is_cancelled()
                    }
                    None => false,
                };
                let deadline = match wait {
                    Wait::Probe => {
                        self.metrics.record_probe_miss();
                        self.settle(key, &record, &mut state);
                        return Ok(None);
                    }
                    Wait::Until(deadline) if cancelled || Instant::now() >= deadline => {
                        self.metrics.record_timeout();
                        self.settle(key, &record, &mut state);
                        return Ok(None);
                    }
                    Wait::Until(deadline) => Some(deadline),
                    Wait::Forever if cancelled => {
                        self.metrics.record_timeout();
                        self.settle(key, &record, &mut state);
                        return Ok(None);
                    }
                    Wait::Forever => None,
                };

                state.waiters += 1;
                match deadline {
                    Some(deadline) => {
                        record.has_value.wait_until(&mut state, deadline);
                    }
                    None => record.has_value.wait(&mut state),
                }
                state.waiters -= 1;

                if state.retired {
                    break;
                }
            }
        }
    }

    fn nrd(&self, key: &K, wait: Wait) -> Result<Option<V>> {
        let poll = self.config.poll_interval();
        loop {
            self.ensure_open()?;
            let Some(record) = self.existing(key) else {
                return Ok(None);
            };
            let mut state = record.state.lock();
            if state.retired {
                continue;
            }

            loop {
                let Some(value) = self.scan(&mut state.queue, Select::Head, Mode::Read) else {
                    self.settle(key, &record, &mut state);
                    return Ok(None);
                };
                if self.is_closed() {
                    return Err(self.closed_error());
                }
                let now = Instant::now();
                let wake_at = match wait {
                    Wait::Until(deadline) if now >= deadline => return Ok(Some(value)),
                    Wait::Until(deadline) => deadline.min(now + poll),
                    Wait::Probe | Wait::Forever => now + poll,
                };
                record.is_empty.wait_until(&mut state, wake_at);
                if state.retired {
                    break;
                }
            }
        }
    }

    fn has_live(&self, key: &K) -> bool {
        loop {
            let Some(record) = self.existing(key) else {
                return false;
            };
            let mut state = record.state.lock();
            if state.retired {
                continue;
            }
            let scan = state.queue.has_live(Instant::now());
            self.metrics.record_expired(scan.expired);
            let live = scan.found.unwrap_or(false);
            if !live {
                self.settle(key, &record, &mut state);
            }
            return live;
        }
    }
}

impl<K: SpaceKey, V: SpaceValue> SweepTarget for CoreInner<K, V> {
    fn sweep(&self, generation: Generation) -> SweepReport {
        let mut report = SweepReport::default();
        if self.is_closed() {
            return report;
        }
        for key in self.generations.take(generation) {
            report.keys += 1;
            let Some(record) = self.existing(&key) else {
                continue;
            };
            let mut state = record.state.lock();
            if state.retired {
                continue;
            }
            let (expired, remaining) = state.queue.purge_expired(Instant::now());
            report.expired += expired;
            if remaining {
                self.generations.register_in(generation, &key);
            }
            if self.settle(&key, &record, &mut state) {
                report.records_removed += 1;
            }
        }
        self.metrics.record_expired(report.expired);
        self.metrics.record_sweep();
        report
    }

    fn sweep_panicked(&self, _generation: Generation) {
        self.metrics.record_sweep_panic();
    }
}

impl<K, V> Drop for CoreInner<K, V> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.signal_stop();
        }
    }
}

/// The per-key blocking tuple-space engine
///
/// Cloning is cheap and yields another handle to the same space. The
/// engine has no listener support of its own; [`LocalSpace`](super::LocalSpace)
/// layers that on top.
///
/// `close` is mandatory: it stops the sweeper thread, wakes every blocked
/// caller with [`SpaceError::Closed`] and clears all state. Dropping the last
/// handle only asks the sweeper to stop.
pub struct SpaceCore<K: SpaceKey, V: SpaceValue> {
    inner: Arc<CoreInner<K, V>>,
}

impl<K: SpaceKey, V: SpaceValue> Clone for SpaceCore<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: SpaceKey, V: SpaceValue> fmt::Debug for SpaceCore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpaceCore")
            .field("name", &self.inner.name)
            .field("keys", &self.inner.table.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<K: SpaceKey, V: SpaceValue> SpaceCore<K, V> {
    /// Create an engine and start its sweeper (unless disabled in `config`)
    pub fn new(name: impl Into<String>, config: SpaceConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|err| SpaceError::invalid(err.to_string()))?;
        let name = name.into();
        let inner = Arc::new(CoreInner {
            generations: Generations::new(config.short_threshold()),
            name,
            config,
            table: DashMap::new(),
            inserted: InsertSignal::default(),
            metrics: SpaceMetrics::new(),
            closed: AtomicBool::new(false),
            sweeper: Mutex::new(None),
        });

        if inner.config.sweeper {
            let weak = Arc::downgrade(&inner);
            let target: Weak<dyn SweepTarget> = weak;
            let sweeper = Sweeper::spawn(&inner.name, target, &inner.config)?;
            *inner.sweeper.lock() = Some(sweeper);
        }
        tracing::debug!(space = %inner.name, "space created");
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &SpaceConfig {
        &self.inner.config
    }

    /// Append `value` under `key`
    pub fn out(&self, key: K, value: V) -> Result<()> {
        self.inner.insert(key, value, Duration::ZERO, Placement::Tail)
    }

    /// Append `value` under `key`, expiring after `timeout` (zero: never)
    pub fn out_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()> {
        self.inner.insert(key, value, timeout, Placement::Tail)
    }

    /// Prepend `value` under `key`
    pub fn push(&self, key: K, value: V) -> Result<()> {
        self.inner.insert(key, value, Duration::ZERO, Placement::Head)
    }

    pub fn push_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()> {
        self.inner.insert(key, value, timeout, Placement::Head)
    }

    /// Replace everything under `key` with `value`
    pub fn put(&self, key: K, value: V) -> Result<()> {
        self.inner.insert(key, value, Duration::ZERO, Placement::Replace)
    }

    pub fn put_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()> {
        self.inner.insert(key, value, timeout, Placement::Replace)
    }

    /// Remove and return the head, blocking until one arrives
    pub fn in_(&self, key: &K) -> Result<V> {
        self.inner
            .fetch(key, Select::Head, Mode::Take, Wait::Forever, None)?
            .ok_or_else(|| SpaceError::coordination("unbounded wait ended without a value"))
    }

    /// Remove and return the head, blocking up to `timeout`
    pub fn in_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>> {
        self.inner
            .fetch(key, Select::Head, Mode::Take, Wait::timeout(timeout), None)
    }

    /// Read the head without removing it, blocking until one arrives
    pub fn rd(&self, key: &K) -> Result<V> {
        self.inner
            .fetch(key, Select::Head, Mode::Read, Wait::Forever, None)?
            .ok_or_else(|| SpaceError::coordination("unbounded wait ended without a value"))
    }

    pub fn rd_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>> {
        self.inner
            .fetch(key, Select::Head, Mode::Read, Wait::timeout(timeout), None)
    }

    /// Non-blocking take
    pub fn inp(&self, key: &K) -> Result<Option<V>> {
        self.inner
            .fetch(key, Select::Head, Mode::Take, Wait::Probe, None)
    }

    /// Non-blocking read
    pub fn rdp(&self, key: &K) -> Result<Option<V>> {
        self.inner
            .fetch(key, Select::Head, Mode::Read, Wait::Probe, None)
    }

    /// Remove the earliest entry matching `template`, blocking until one arrives
    pub fn in_match(&self, template: &Template<K, V>) -> Result<V> {
        self.inner
            .fetch(
                template.key(),
                Select::Matching(template.matcher()),
                Mode::Take,
                Wait::Forever,
                None,
            )?
            .ok_or_else(|| SpaceError::coordination("unbounded wait ended without a value"))
    }

    pub fn in_match_timeout(
        &self,
        template: &Template<K, V>,
        timeout: Duration,
    ) -> Result<Option<V>> {
        self.inner.fetch(
            template.key(),
            Select::Matching(template.matcher()),
            Mode::Take,
            Wait::timeout(timeout),
            None,
        )
    }

    pub fn rd_match(&self, template: &Template<K, V>) -> Result<V> {
        self.inner
            .fetch(
                template.key(),
                Select::Matching(template.matcher()),
                Mode::Read,
                Wait::Forever,
                None,
            )?
            .ok_or_else(|| SpaceError::coordination("unbounded wait ended without a value"))
    }

    pub fn rd_match_timeout(
        &self,
        template: &Template<K, V>,
        timeout: Duration,
    ) -> Result<Option<V>> {
        self.inner.fetch(
            template.key(),
            Select::Matching(template.matcher()),
            Mode::Read,
            Wait::timeout(timeout),
            None,
        )
    }

    pub fn inp_match(&self, template: &Template<K, V>) -> Result<Option<V>> {
        self.inner.fetch(
            template.key(),
            Select::Matching(template.matcher()),
            Mode::Take,
            Wait::Probe,
            None,
        )
    }

    pub fn rdp_match(&self, template: &Template<K, V>) -> Result<Option<V>> {
        self.inner.fetch(
            template.key(),
            Select::Matching(template.matcher()),
            Mode::Read,
            Wait::Probe,
            None,
        )
    }

    /// Like `in_timeout`, but also stops waiting when `token` is cancelled
    ///
    /// `timeout: None` waits without a deadline. Cancellation is reported
    /// the same way as a timeout: `Ok(None)`.
    pub fn in_cancellable(
        &self,
        key: &K,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        let wait = timeout.map_or(Wait::Forever, Wait::timeout);
        self.inner
            .fetch(key, Select::Head, Mode::Take, wait, Some(token))
    }

    /// Like `rd_timeout`, but also stops waiting when `token` is cancelled
    pub fn rd_cancellable(
        &self,
        key: &K,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        let wait = timeout.map_or(Wait::Forever, Wait::timeout);
        self.inner
            .fetch(key, Select::Head, Mode::Read, wait, Some(token))
    }

    /// Like `in_match_timeout`, but also stops waiting when `token` is cancelled
    pub fn in_match_cancellable(
        &self,
        template: &Template<K, V>,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        let wait = timeout.map_or(Wait::Forever, Wait::timeout);
        self.inner.fetch(
            template.key(),
            Select::Matching(template.matcher()),
            Mode::Take,
            wait,
            Some(token),
        )
    }

    pub fn rd_match_cancellable(
        &self,
        template: &Template<K, V>,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        let wait = timeout.map_or(Wait::Forever, Wait::timeout);
        self.inner.fetch(
            template.key(),
            Select::Matching(template.matcher()),
            Mode::Read,
            wait,
            Some(token),
        )
    }

    /// Block while `key` has a live entry
    pub fn nrd(&self, key: &K) -> Result<()> {
        self.inner.nrd(key, Wait::Forever).map(|_| ())
    }

    /// Block up to `timeout` while `key` has a live entry
    ///
    /// Returns `None` once the key is empty, or the value still present
    /// when the timeout elapsed.
    pub fn nrd_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>> {
        self.inner.nrd(key, Wait::timeout(timeout))
    }

    /// True if any of `keys` currently has a live entry
    pub fn exist_any(&self, keys: &[K]) -> Result<bool> {
        self.inner.ensure_open()?;
        Ok(keys.iter().any(|key| self.inner.has_live(key)))
    }

    /// Poll until any of `keys` has a live entry or `timeout` elapses
    pub fn exist_any_timeout(&self, keys: &[K], timeout: Duration) -> Result<bool> {
        let deadline = Instant::now().checked_add(timeout);
        let poll = self.inner.config.poll_interval();
        loop {
            let watch = self.inner.inserted.watch();
            if self.exist_any(keys)? {
                return Ok(true);
            }
            let now = Instant::now();
            let wake_at = match deadline {
                Some(deadline) if now >= deadline => return Ok(false),
                Some(deadline) => deadline.min(now + poll),
                None => now + poll,
            };
            watch.wait_until(wake_at);
        }
    }

    /// Remove every live entry under `key` in one step
    pub(crate) fn take_all(&self, key: &K) -> Result<Vec<V>> {
        loop {
            self.inner.ensure_open()?;
            let Some(record) = self.inner.existing(key) else {
                return Ok(Vec::new());
            };
            let mut state = record.state.lock();
            if state.retired {
                continue;
            }
            let mut taken = Vec::new();
            while let Some(value) = self.inner.scan(&mut state.queue, Select::Head, Mode::Take) {
                self.inner.metrics.record_take();
                taken.push(value);
            }
            self.inner.settle(key, &record, &mut state);
            return Ok(taken);
        }
    }

    /// Entry count for `key`, expired-but-unswept entries included
    pub fn size(&self, key: &K) -> usize {
        self.inner
            .existing(key)
            .map_or(0, |record| record.state.lock().queue.len())
    }

    /// Keys that currently own a record
    pub fn keys(&self) -> Vec<K> {
        self.inner
            .table
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Keys pending in a sweep generation
    pub fn pending_sweep(&self, generation: Generation) -> usize {
        self.inner.generations.pending(generation)
    }

    /// Run one sweep of `generation` on the calling thread
    pub fn sweep_now(&self, generation: Generation) -> SweepReport {
        self.inner.sweep(generation)
    }

    /// Live entries per key, for snapshotting
    pub(crate) fn entries(&self) -> Vec<(K, Vec<Expirable<V>>)> {
        let now = Instant::now();
        self.inner
            .records()
            .into_iter()
            .filter_map(|(key, record)| {
                let state = record.state.lock();
                let live: Vec<_> = state
                    .queue
                    .iter()
                    .filter(|entry| !entry.is_expired(now))
                    .cloned()
                    .collect();
                (!live.is_empty()).then_some((key, live))
            })
            .collect()
    }

    /// Write a bounded diagnostic listing of keys and sizes
    pub fn dump(&self, sink: &mut dyn io::Write, indent: &str) -> io::Result<()> {
        let now = Instant::now();
        let rows = self
            .inner
            .records()
            .into_iter()
            .map(|(key, record)| {
                let state = record.state.lock();
                let head = state
                    .queue
                    .iter()
                    .find_map(|entry| entry.get(now))
                    .map(|value| format!("{value:?}"));
                DumpRow {
                    key: format!("{key:?}"),
                    size: state.queue.len(),
                    head,
                }
            })
            .collect();
        let view = DumpView {
            name: &self.inner.name,
            closed: self.is_closed(),
            limit: self.inner.config.dump_limit,
            pending: (
                self.inner.generations.pending(Generation::Short),
                self.inner.generations.pending(Generation::Long),
            ),
            metrics: self.metrics(),
        };
        view.write(sink, indent, rows)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        self.inner.ensure_open()
    }

    pub(crate) fn counters(&self) -> &SpaceMetrics {
        &self.inner.metrics
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Stop the sweeper, wake every blocked caller with `Closed`, clear all state
    ///
    /// Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let sweeper = self.inner.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop();
        }

        let records = self.inner.records();
        for (_, record) in &records {
            let mut state = record.state.lock();
            state.queue.clear();
            state.retired = true;
            record.has_value.notify_all();
            record.is_empty.notify_all();
        }
        self.inner.table.clear();
        self.inner.generations.clear();
        self.inner.inserted.wake_all();
        tracing::debug!(space = %self.inner.name, keys = records.len(), "space closed");
        Ok(())
    }
}
