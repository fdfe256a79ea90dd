//! Single-lock baseline engine
//!
//! One mutex guards every key's queue and one condition variable is
//! broadcast on every insertion and every key drain. Simple and easy to
//! reason about; every waiter wakes on every change, so it degrades under
//! many concurrent waiters on distinct keys.

use super::{DumpRow, DumpView, Placement, Space, Wait};
use crate::cancel::{CancelToken, Wake};
use crate::config::SpaceConfig;
use crate::error::{Result, SpaceError};
use crate::listener::{insert_then_fire, Listener, ListenerRegistry};
use crate::metrics::{MetricsSnapshot, SpaceMetrics};
use crate::queue::KeyQueue;
use crate::sweeper::{Generation, Generations, SweepReport, SweepTarget, Sweeper};
use crate::template::{Matcher, Template};
use crate::types::{Expirable, SpaceKey, SpaceValue};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

type Entries<K, V> = HashMap<K, KeyQueue<V>>;

struct GlobalInner<K, V> {
    name: String,
    config: SpaceConfig,
    entries: Mutex<Entries<K, V>>,
    changed: Condvar,
    generations: Generations<K>,
    metrics: SpaceMetrics,
    closed: AtomicBool,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<K: SpaceKey, V: SpaceValue> GlobalInner<K, V> {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SpaceError::Closed(self.name.clone()))
        } else {
            Ok(())
        }
    }

    fn insert(&self, key: K, value: V, ttl: Duration, placement: Placement) -> Result<()> {
        let entry = Expirable::with_ttl(value, ttl, Instant::now())
            .ok_or_else(|| SpaceError::invalid(format!("timeout {ttl:?} is out of range")))?;
        {
            let mut entries = self.entries.lock();
            self.ensure_open()?;
            let queue = entries.entry(key.clone()).or_default();
            match placement {
                Placement::Tail => queue.push_back(entry),
                Placement::Head => queue.push_front(entry),
                Placement::Replace => queue.replace(entry),
            }
            if !ttl.is_zero() {
                self.generations.register(&key, ttl);
            }
            self.changed.notify_all();
        }
        self.metrics.record_insert();
        Ok(())
    }

    /// Scan `key`'s queue; drops the queue once it is empty
    fn scan(
        &self,
        entries: &mut MutexGuard<'_, Entries<K, V>>,
        key: &K,
        matcher: Option<&dyn Matcher<V>>,
        take: bool,
    ) -> Option<V> {
        let queue = entries.get_mut(key)?;
        let now = Instant::now();
        let accepts = |value: &V| matcher.map_or(true, |m| m.matches(value));
        let scan = if take {
            queue.take_first(now, accepts)
        } else {
            queue.read_first(now, accepts)
        };
        self.metrics.record_expired(scan.expired);
        if queue.is_empty() {
            entries.remove(key);
            self.generations.forget(key);
            self.changed.notify_all();
            self.metrics.record_removed_record();
        }
        scan.found
    }

    fn fetch(
        self: &Arc<Self>,
        key: &K,
        matcher: Option<&dyn Matcher<V>>,
        take: bool,
        wait: Wait,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<V>> {
        let mut entries = self.entries.lock();
        loop {
            self.ensure_open()?;
            if let Some(value) = self.scan(&mut entries, key, matcher, take) {
                if take {
                    self.metrics.record_take();
                } else {
                    self.metrics.record_read();
                }
                return Ok(Some(value));
            }
            let cancelled = match cancel {
                Some(token) => {
                    let weak = Arc::downgrade(self);
                    let target: Weak<dyn Wake> = weak;
                    token.park_on(target);
                    token.is_cancelled()
                }
                None => false,
            };
            match wait {
                Wait::Probe => {
                    self.metrics.record_probe_miss();
                    return Ok(None);
                }
                Wait::Until(_) | Wait::Forever if cancelled => {
                    self.metrics.record_timeout();
                    return Ok(None);
                }
                Wait::Until(deadline) if Instant::now() >= deadline => {
                    self.metrics.record_timeout();
                    return Ok(None);
                }
                Wait::Until(deadline) => {
                    self.changed.wait_until(&mut entries, deadline);
                }
                Wait::Forever => self.changed.wait(&mut entries),
            }
        }
    }

    fn nrd(&self, key: &K, wait: Wait) -> Result<Option<V>> {
        let poll = self.config.poll_interval();
        let mut entries = self.entries.lock();
        loop {
            self.ensure_open()?;
            let Some(value) = self.scan(&mut entries, key, None, false) else {
                return Ok(None);
            };
            let now = Instant::now();
            let wake_at = match wait {
                Wait::Until(deadline) if now >= deadline => return Ok(Some(value)),
                Wait::Until(deadline) => deadline.min(now + poll),
                Wait::Probe | Wait::Forever => now + poll,
            };
            self.changed.wait_until(&mut entries, wake_at);
        }
    }

    fn any_live(&self, entries: &mut MutexGuard<'_, Entries<K, V>>, keys: &[K]) -> bool {
        let now = Instant::now();
        keys.iter().any(|key| {
            let Some(queue) = entries.get_mut(key) else {
                return false;
            };
            let scan = queue.has_live(now);
            self.metrics.record_expired(scan.expired);
            if queue.is_empty() {
                entries.remove(key);
                self.generations.forget(key);
                self.metrics.record_removed_record();
            }
            scan.found.unwrap_or(false)
        })
    }

    fn exist_any(&self, keys: &[K], deadline: Option<Instant>, wait: bool) -> Result<bool> {
        let poll = self.config.poll_interval();
        let mut entries = self.entries.lock();
        loop {
            self.ensure_open()?;
            if self.any_live(&mut entries, keys) {
                return Ok(true);
            }
            if !wait {
                return Ok(false);
            }
            let now = Instant::now();
            let wake_at = match deadline {
                Some(deadline) if now >= deadline => return Ok(false),
                Some(deadline) => deadline.min(now + poll),
                None => now + poll,
            };
            self.changed.wait_until(&mut entries, wake_at);
        }
    }
}

impl<K: SpaceKey, V: SpaceValue> Wake for GlobalInner<K, V> {
    fn wake(&self) {
        let _entries = self.entries.lock();
        self.changed.notify_all();
    }
}

impl<K: SpaceKey, V: SpaceValue> SweepTarget for GlobalInner<K, V> {
    fn sweep(&self, generation: Generation) -> SweepReport {
        let mut report = SweepReport::default();
        let keys = self.generations.take(generation);
        if keys.is_empty() || self.closed.load(Ordering::SeqCst) {
            return report;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock();
        for key in keys {
            report.keys += 1;
            let Some(queue) = entries.get_mut(&key) else {
                continue;
            };
            let (expired, remaining) = queue.purge_expired(now);
            report.expired += expired;
            if remaining {
                self.generations.register_in(generation, &key);
            }
            if queue.is_empty() {
                entries.remove(&key);
                self.generations.forget(&key);
                report.records_removed += 1;
                self.metrics.record_removed_record();
            }
        }
        if report.records_removed > 0 {
            self.changed.notify_all();
        }
        self.metrics.record_expired(report.expired);
        self.metrics.record_sweep();
        report
    }

    fn sweep_panicked(&self, _generation: Generation) {
        self.metrics.record_sweep_panic();
    }
}

impl<K, V> Drop for GlobalInner<K, V> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.signal_stop();
        }
    }
}

/// Globally-locked space
///
/// Honours the same contract as [`LocalSpace`](super::LocalSpace) and is
/// kept as a reference point for benchmarks.
pub struct GlobalLockSpace<K: SpaceKey, V: SpaceValue> {
    inner: Arc<GlobalInner<K, V>>,
    listeners: Arc<OnceCell<ListenerRegistry<K, V>>>,
}

impl<K: SpaceKey, V: SpaceValue> Clone for GlobalLockSpace<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<K: SpaceKey, V: SpaceValue> fmt::Debug for GlobalLockSpace<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalLockSpace")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<K: SpaceKey, V: SpaceValue> GlobalLockSpace<K, V> {
    pub fn new(name: impl Into<String>, config: SpaceConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|err| SpaceError::invalid(err.to_string()))?;
        let inner = Arc::new(GlobalInner {
            generations: Generations::new(config.short_threshold()),
            name: name.into(),
            config,
            entries: Mutex::new(HashMap::new()),
            changed: Condvar::new(),
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
        tracing::debug!(space = %inner.name, "global-lock space created");
        Ok(Self {
            inner,
            listeners: Arc::new(OnceCell::new()),
        })
    }

    /// Run one sweep of `generation` on the calling thread
    pub fn sweep_now(&self, generation: Generation) -> SweepReport {
        self.inner.sweep(generation)
    }

    fn insert(&self, key: K, value: V, timeout: Duration, placement: Placement) -> Result<()> {
        let inner = &self.inner;
        insert_then_fire(self.listeners.get(), &inner.metrics, key, value, |k, v| {
            inner.insert(k, v, timeout, placement)
        })
    }

    fn blocking(&self, value: Option<V>) -> Result<V> {
        value.ok_or_else(|| SpaceError::coordination("unbounded wait ended without a value"))
    }
}

impl<K: SpaceKey, V: SpaceValue> Space<K, V> for GlobalLockSpace<K, V> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn out_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()> {
        self.insert(key, value, timeout, Placement::Tail)
    }

    fn push_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()> {
        self.insert(key, value, timeout, Placement::Head)
    }

    fn put_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()> {
        self.insert(key, value, timeout, Placement::Replace)
    }

    fn in_(&self, key: &K) -> Result<V> {
        self.blocking(self.inner.fetch(key, None, true, Wait::Forever, None)?)
    }

    fn in_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>> {
        self.inner.fetch(key, None, true, Wait::timeout(timeout), None)
    }

    fn rd(&self, key: &K) -> Result<V> {
        self.blocking(self.inner.fetch(key, None, false, Wait::Forever, None)?)
    }

    fn rd_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>> {
        self.inner.fetch(key, None, false, Wait::timeout(timeout), None)
    }

    fn inp(&self, key: &K) -> Result<Option<V>> {
        self.inner.fetch(key, None, true, Wait::Probe, None)
    }

    fn rdp(&self, key: &K) -> Result<Option<V>> {
        self.inner.fetch(key, None, false, Wait::Probe, None)
    }

    fn in_match(&self, template: &Template<K, V>) -> Result<V> {
        let found = self.inner.fetch(
            template.key(),
            Some(template.matcher()),
            true,
            Wait::Forever,
            None,
        )?;
        self.blocking(found)
    }

    fn in_match_timeout(&self, template: &Template<K, V>, timeout: Duration) -> Result<Option<V>> {
        self.inner.fetch(
            template.key(),
            Some(template.matcher()),
            true,
            Wait::timeout(timeout),
            None,
        )
    }

    fn rd_match(&self, template: &Template<K, V>) -> Result<V> {
        let found = self.inner.fetch(
            template.key(),
            Some(template.matcher()),
            false,
            Wait::Forever,
            None,
        )?;
        self.blocking(found)
    }

    fn rd_match_timeout(&self, template: &Template<K, V>, timeout: Duration) -> Result<Option<V>> {
        self.inner.fetch(
            template.key(),
            Some(template.matcher()),
            false,
            Wait::timeout(timeout),
            None,
        )
    }

    fn inp_match(&self, template: &Template<K, V>) -> Result<Option<V>> {
        self.inner
            .fetch(template.key(), Some(template.matcher()), true, Wait::Probe, None)
    }

    fn rdp_match(&self, template: &Template<K, V>) -> Result<Option<V>> {
        self.inner
            .fetch(template.key(), Some(template.matcher()), false, Wait::Probe, None)
    }

    fn in_cancellable(
        &self,
        key: &K,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        let wait = timeout.map_or(Wait::Forever, Wait::timeout);
        self.inner.fetch(key, None, true, wait, Some(token))
    }

    fn rd_cancellable(
        &self,
        key: &K,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        let wait = timeout.map_or(Wait::Forever, Wait::timeout);
        self.inner.fetch(key, None, false, wait, Some(token))
    }

    fn in_match_cancellable(
        &self,
        template: &Template<K, V>,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        let wait = timeout.map_or(Wait::Forever, Wait::timeout);
        self.inner
            .fetch(template.key(), Some(template.matcher()), true, wait, Some(token))
    }

    fn rd_match_cancellable(
        &self,
        template: &Template<K, V>,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        let wait = timeout.map_or(Wait::Forever, Wait::timeout);
        self.inner
            .fetch(template.key(), Some(template.matcher()), false, wait, Some(token))
    }

    fn nrd(&self, key: &K) -> Result<()> {
        self.inner.nrd(key, Wait::Forever).map(|_| ())
    }

    fn nrd_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>> {
        self.inner.nrd(key, Wait::timeout(timeout))
    }

    fn exist_any(&self, keys: &[K]) -> Result<bool> {
        self.inner.exist_any(keys, None, false)
    }

    fn exist_any_timeout(&self, keys: &[K], timeout: Duration) -> Result<bool> {
        let deadline = Instant::now().checked_add(timeout);
        self.inner.exist_any(keys, deadline, true)
    }

    fn size(&self, key: &K) -> usize {
        self.inner.entries.lock().get(key).map_or(0, KeyQueue::len)
    }

    fn keys(&self) -> Vec<K> {
        self.inner.entries.lock().keys().cloned().collect()
    }

    fn add_listener_timeout(
        &self,
        key: K,
        listener: Arc<dyn Listener<K, V>>,
        timeout: Duration,
    ) -> Result<()> {
        self.inner.ensure_open()?;
        let registry = self
            .listeners
            .get_or_try_init(|| ListenerRegistry::new(&self.inner.name, &self.inner.config))?;
        registry.add(key, listener, timeout)
    }

    fn remove_listener(&self, key: &K, listener: &Arc<dyn Listener<K, V>>) -> Result<bool> {
        self.inner.ensure_open()?;
        match self.listeners.get() {
            Some(registry) => registry.remove(key, listener),
            None => Ok(false),
        }
    }

    fn dump(&self, sink: &mut dyn io::Write, indent: &str) -> io::Result<()> {
        let now = Instant::now();
        let rows = self
            .inner
            .entries
            .lock()
            .iter()
            .map(|(key, queue)| DumpRow {
                key: format!("{key:?}"),
                size: queue.len(),
                head: queue
                    .iter()
                    .find_map(|entry| entry.get(now))
                    .map(|value| format!("{value:?}")),
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
        view.write(sink, indent, rows)?;
        if let Some(registry) = self.listeners.get() {
            registry.dump(sink, &format!("{indent}  "))?;
        }
        Ok(())
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let sweeper = self.inner.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop();
        }
        if let Some(registry) = self.listeners.get() {
            registry.close()?;
        }
        let keys = {
            let mut entries = self.inner.entries.lock();
            let keys = entries.len();
            entries.clear();
            self.inner.changed.notify_all();
            keys
        };
        self.inner.generations.clear();
        tracing::debug!(space = %self.inner.name, keys, "global-lock space closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}
