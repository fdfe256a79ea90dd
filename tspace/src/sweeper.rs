//! Two-generation background expiry sweeper
//!
//! Keys that receive an expirable entry are registered in one of two
//! generations depending on the entry's timeout: short timeouts are swept
//! frequently, long ones rarely. Each tick atomically snapshots and clears a
//! generation's pending set and hands the keys to the owning engine, which
//! purges expired entries and re-registers keys that still hold expirables.
//!
//! The sweeper only holds a weak reference to its engine, so it never keeps
//! a space alive. Panics raised by a tick are caught and logged; one bad
//! tick never stops the thread.

use crate::config::SpaceConfig;
use crate::error::{Result, SpaceError};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Sweep cadence an expirable key is registered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    /// Frequent sweeps for short timeouts
    Short,
    /// Infrequent sweeps for long timeouts
    Long,
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::Short => write!(f, "short"),
            Generation::Long => write!(f, "long"),
        }
    }
}

/// Pending-key sets for both generations
#[derive(Debug)]
pub struct Generations<K> {
    short: Mutex<HashSet<K>>,
    long: Mutex<HashSet<K>>,
    short_threshold: Duration,
}

impl<K: Eq + Hash + Clone> Generations<K> {
    pub fn new(short_threshold: Duration) -> Self {
        Self {
            short: Mutex::new(HashSet::new()),
            long: Mutex::new(HashSet::new()),
            short_threshold,
        }
    }

    /// Generation an entry with this timeout belongs to
    pub fn classify(&self, ttl: Duration) -> Generation {
        if ttl < self.short_threshold {
            Generation::Short
        } else {
            Generation::Long
        }
    }

    /// Register `key` for an entry that expires after `ttl`
    pub fn register(&self, key: &K, ttl: Duration) {
        self.register_in(self.classify(ttl), key);
    }

    pub fn register_in(&self, generation: Generation, key: &K) {
        let mut set = self.set(generation).lock();
        if !set.contains(key) {
            set.insert(key.clone());
        }
    }

    /// Drop `key` from both generations once it holds no entries
    pub fn forget(&self, key: &K) {
        self.short.lock().remove(key);
        self.long.lock().remove(key);
    }

    /// Snapshot and clear one generation
    pub fn take(&self, generation: Generation) -> Vec<K> {
        std::mem::take(&mut *self.set(generation).lock())
            .into_iter()
            .collect()
    }

    pub fn pending(&self, generation: Generation) -> usize {
        self.set(generation).lock().len()
    }

    pub fn clear(&self) {
        self.short.lock().clear();
        self.long.lock().clear();
    }

    fn set(&self, generation: Generation) -> &Mutex<HashSet<K>> {
        match generation {
            Generation::Short => &self.short,
            Generation::Long => &self.long,
        }
    }
}

/// What one generation tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Keys visited
    pub keys: usize,
    /// Expired entries removed
    pub expired: usize,
    /// Key records dropped because they became empty
    pub records_removed: usize,
}

/// An engine the sweeper can drive
pub trait SweepTarget: Send + Sync {
    /// Purge expired entries for every key pending in `generation`
    fn sweep(&self, generation: Generation) -> SweepReport;

    /// Called after a tick of `generation` panicked
    fn sweep_panicked(&self, _generation: Generation) {}
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep until `deadline`; returns true if stopped meanwhile
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.cond.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Handle to a running sweeper thread
pub struct Sweeper {
    signal: Arc<StopSignal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Sweeper {
    /// Spawn the sweeper thread for `target`
    pub fn spawn(name: &str, target: Weak<dyn SweepTarget>, config: &SpaceConfig) -> Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = signal.clone();
        let short_every = config.short_sweep_interval();
        let long_every = config.long_sweep_interval();
        let space_name = name.to_string();

        let handle = thread::Builder::new()
            .name(format!("tspace-sweeper-{name}"))
            .spawn(move || run(&space_name, target, &thread_signal, short_every, long_every))
            .map_err(|err| SpaceError::coordination_from("failed to spawn sweeper thread", err))?;

        tracing::debug!(space = %name, ?short_every, ?long_every, "sweeper started");
        Ok(Self {
            signal,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Ask the thread to stop without waiting for it
    pub fn signal_stop(&self) {
        self.signal.stop();
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(&self) {
        self.signal.stop();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // Closed from inside a sweep tick; the loop exits on its own.
                return;
            }
            if handle.join().is_err() {
                tracing::warn!("sweeper thread panicked during shutdown");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.signal.is_stopped()
    }
}

impl fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sweeper")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn run(
    name: &str,
    target: Weak<dyn SweepTarget>,
    signal: &StopSignal,
    short_every: Duration,
    long_every: Duration,
) {
    let start = Instant::now();
    let mut next_short = start + short_every;
    let mut next_long = start + long_every;

    loop {
        if signal.wait_until(next_short.min(next_long)) {
            break;
        }
        let Some(target) = target.upgrade() else {
            break;
        };
        let now = Instant::now();
        if now >= next_short {
            tick(name, target.as_ref(), Generation::Short);
            next_short = Instant::now() + short_every;
        }
        if now >= next_long {
            tick(name, target.as_ref(), Generation::Long);
            next_long = Instant::now() + long_every;
        }
    }
    tracing::debug!(space = %name, "sweeper stopped");
}

fn tick(name: &str, target: &dyn SweepTarget, generation: Generation) {
    match catch_unwind(AssertUnwindSafe(|| target.sweep(generation))) {
        Ok(report) => {
            if report.keys > 0 {
                tracing::trace!(
                    space = %name,
                    %generation,
                    keys = report.keys,
                    expired = report.expired,
                    removed = report.records_removed,
                    "sweep finished"
                );
            }
        }
        Err(_) => {
            target.sweep_panicked(generation);
            tracing::warn!(space = %name, %generation, "sweep tick panicked");
        }
    }
}
