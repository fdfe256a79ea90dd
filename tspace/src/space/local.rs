//! Per-key engine with listener fan-out

use super::{Space, SpaceCore};
use crate::cancel::CancelToken;
use crate::config::SpaceConfig;
use crate::error::Result;
use crate::listener::{insert_then_fire, Listener, ListenerRegistry};
use crate::metrics::MetricsSnapshot;
use crate::template::Template;
use crate::types::{SpaceKey, SpaceValue};
use once_cell::sync::OnceCell;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// The default in-memory space
///
/// Wraps a [`SpaceCore`] and attaches a [`ListenerRegistry`] the first time
/// a listener is registered. Listeners run on the inserting thread after
/// the key's lock has been released.
pub struct LocalSpace<K: SpaceKey, V: SpaceValue> {
    core: SpaceCore<K, V>,
    listeners: Arc<OnceCell<ListenerRegistry<K, V>>>,
}

impl<K: SpaceKey, V: SpaceValue> Clone for LocalSpace<K, V> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<K: SpaceKey, V: SpaceValue> fmt::Debug for LocalSpace<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSpace")
            .field("core", &self.core)
            .field("listeners", &self.listeners.get())
            .finish()
    }
}

impl<K: SpaceKey, V: SpaceValue> LocalSpace<K, V> {
    pub fn new(name: impl Into<String>, config: SpaceConfig) -> Result<Self> {
        Ok(Self {
            core: SpaceCore::new(name, config)?,
            listeners: Arc::new(OnceCell::new()),
        })
    }

    /// Create a space with default configuration
    pub fn with_defaults(name: impl Into<String>) -> Result<Self> {
        Self::new(name, SpaceConfig::default())
    }

    /// The underlying engine
    pub fn core(&self) -> &SpaceCore<K, V> {
        &self.core
    }

    fn registry(&self) -> Result<&ListenerRegistry<K, V>> {
        self.listeners
            .get_or_try_init(|| ListenerRegistry::new(self.core.name(), self.core.config()))
    }
}

impl<K: SpaceKey, V: SpaceValue> Space<K, V> for LocalSpace<K, V> {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn out_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()> {
        let core = &self.core;
        insert_then_fire(self.listeners.get(), core.counters(), key, value, |k, v| {
            core.out_timeout(k, v, timeout)
        })
    }

    fn push_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()> {
        let core = &self.core;
        insert_then_fire(self.listeners.get(), core.counters(), key, value, |k, v| {
            core.push_timeout(k, v, timeout)
        })
    }

    fn put_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()> {
        let core = &self.core;
        insert_then_fire(self.listeners.get(), core.counters(), key, value, |k, v| {
            core.put_timeout(k, v, timeout)
        })
    }

    fn in_(&self, key: &K) -> Result<V> {
        self.core.in_(key)
    }

    fn in_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>> {
        self.core.in_timeout(key, timeout)
    }

    fn rd(&self, key: &K) -> Result<V> {
        self.core.rd(key)
    }

    fn rd_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>> {
        self.core.rd_timeout(key, timeout)
    }

    fn inp(&self, key: &K) -> Result<Option<V>> {
        self.core.inp(key)
    }

    fn rdp(&self, key: &K) -> Result<Option<V>> {
        self.core.rdp(key)
    }

    fn in_match(&self, template: &Template<K, V>) -> Result<V> {
        self.core.in_match(template)
    }

    fn in_match_timeout(&self, template: &Template<K, V>, timeout: Duration) -> Result<Option<V>> {
        self.core.in_match_timeout(template, timeout)
    }

    fn rd_match(&self, template: &Template<K, V>) -> Result<V> {
        self.core.rd_match(template)
    }

    fn rd_match_timeout(&self, template: &Template<K, V>, timeout: Duration) -> Result<Option<V>> {
        self.core.rd_match_timeout(template, timeout)
    }

    fn inp_match(&self, template: &Template<K, V>) -> Result<Option<V>> {
        self.core.inp_match(template)
    }

    fn rdp_match(&self, template: &Template<K, V>) -> Result<Option<V>> {
        self.core.rdp_match(template)
    }

    fn in_cancellable(
        &self,
        key: &K,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        self.core.in_cancellable(key, timeout, token)
    }

    fn rd_cancellable(
        &self,
        key: &K,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        self.core.rd_cancellable(key, timeout, token)
    }

    fn in_match_cancellable(
        &self,
        template: &Template<K, V>,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        self.core.in_match_cancellable(template, timeout, token)
    }

    fn rd_match_cancellable(
        &self,
        template: &Template<K, V>,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        self.core.rd_match_cancellable(template, timeout, token)
    }

    fn nrd(&self, key: &K) -> Result<()> {
        self.core.nrd(key)
    }

    fn nrd_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>> {
        self.core.nrd_timeout(key, timeout)
    }

    fn exist_any(&self, keys: &[K]) -> Result<bool> {
        self.core.exist_any(keys)
    }

    fn exist_any_timeout(&self, keys: &[K], timeout: Duration) -> Result<bool> {
        self.core.exist_any_timeout(keys, timeout)
    }

    fn size(&self, key: &K) -> usize {
        self.core.size(key)
    }

    fn keys(&self) -> Vec<K> {
        self.core.keys()
    }

    fn add_listener_timeout(
        &self,
        key: K,
        listener: Arc<dyn Listener<K, V>>,
        timeout: Duration,
    ) -> Result<()> {
        self.core.ensure_open()?;
        self.registry()?.add(key, listener, timeout)
    }

    fn remove_listener(&self, key: &K, listener: &Arc<dyn Listener<K, V>>) -> Result<bool> {
        self.core.ensure_open()?;
        match self.listeners.get() {
            Some(registry) => registry.remove(key, listener),
            None => Ok(false),
        }
    }

    fn dump(&self, sink: &mut dyn io::Write, indent: &str) -> io::Result<()> {
        self.core.dump(sink, indent)?;
        if let Some(registry) = self.listeners.get() {
            registry.dump(sink, &format!("{indent}  "))?;
        }
        Ok(())
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics()
    }

    fn close(&self) -> Result<()> {
        if let Some(registry) = self.listeners.get() {
            registry.close()?;
        }
        self.core.close()
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}
