//! One-shot insertion listeners
//!
//! Listeners are kept in a second, ordinary per-key space keyed like the
//! primary one. Every successful insertion drains the listeners registered
//! under its key and invokes each with `(key, value)` after the primary
//! key's lock has been released. A listener that wants further
//! notifications registers itself again.

use crate::config::SpaceConfig;
use crate::error::Result;
use crate::metrics::SpaceMetrics;
use crate::space::SpaceCore;
use crate::template::Template;
use crate::types::{SpaceKey, SpaceValue};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked on the next insertion under a key
pub trait Listener<K, V>: Send + Sync {
    fn notify(&self, key: &K, value: &V);
}

impl<K, V, F> Listener<K, V> for F
where
    F: Fn(&K, &V) + Send + Sync,
{
    fn notify(&self, key: &K, value: &V) {
        self(key, value)
    }
}

/// A registered listener, compared by identity
pub struct ListenerHandle<K, V>(Arc<dyn Listener<K, V>>);

impl<K, V> ListenerHandle<K, V> {
    fn is(&self, other: &Arc<dyn Listener<K, V>>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(other))
    }
}

impl<K, V> Clone for ListenerHandle<K, V> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<K, V> fmt::Debug for ListenerHandle<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener@{:p}", Arc::as_ptr(&self.0))
    }
}

/// Listener bookkeeping for one space
pub struct ListenerRegistry<K: SpaceKey, V: SpaceValue> {
    entries: SpaceCore<K, ListenerHandle<K, V>>,
}

impl<K: SpaceKey, V: SpaceValue> ListenerRegistry<K, V> {
    /// Create the registry for the space named `owner`
    pub fn new(owner: &str, config: &SpaceConfig) -> Result<Self> {
        let entries = SpaceCore::new(format!("{owner}.listeners"), config.clone())?;
        Ok(Self { entries })
    }

    /// Register `listener` for the next insertion under `key`
    ///
    /// A non-zero `ttl` makes the registration lapse if nothing is
    /// inserted in time.
    pub fn add(&self, key: K, listener: Arc<dyn Listener<K, V>>, ttl: Duration) -> Result<()> {
        self.entries.out_timeout(key, ListenerHandle(listener), ttl)
    }

    /// Remove one registration of `listener` under `key`
    pub fn remove(&self, key: &K, listener: &Arc<dyn Listener<K, V>>) -> Result<bool> {
        let wanted = Arc::clone(listener);
        let template = Template::new(key.clone(), move |handle: &ListenerHandle<K, V>| {
            handle.is(&wanted)
        });
        Ok(self.entries.inp_match(&template)?.is_some())
    }

    /// Cheap pre-check so insertions only clone when someone listens
    pub fn is_watching(&self, key: &K) -> bool {
        self.entries.size(key) > 0
    }

    /// Drain and invoke every listener registered under `key`
    ///
    /// Must be called without holding any lock of the primary space.
    pub fn fire(&self, key: &K, value: &V, metrics: &SpaceMetrics) {
        let handles = match self.entries.take_all(key) {
            Ok(handles) => handles,
            Err(err) => {
                tracing::debug!(?key, error = %err, "listener registry unavailable");
                return;
            }
        };
        for handle in handles {
            metrics.record_listener_fired();
            if catch_unwind(AssertUnwindSafe(|| handle.0.notify(key, value))).is_err() {
                metrics.record_listener_panic();
                tracing::warn!(space = %self.entries.name(), ?key, "listener panicked");
            }
        }
    }

    pub fn dump(&self, sink: &mut dyn std::io::Write, indent: &str) -> std::io::Result<()> {
        self.entries.dump(sink, indent)
    }

    pub fn close(&self) -> Result<()> {
        self.entries.close()
    }
}

/// Run `insert`, then fire the listeners watching `key`
///
/// Key and value are only cloned when a listener is registered.
pub(crate) fn insert_then_fire<K: SpaceKey, V: SpaceValue>(
    registry: Option<&ListenerRegistry<K, V>>,
    metrics: &SpaceMetrics,
    key: K,
    value: V,
    insert: impl FnOnce(K, V) -> Result<()>,
) -> Result<()> {
    match registry.filter(|registry| registry.is_watching(&key)) {
        Some(registry) => {
            let (fired_key, fired_value) = (key.clone(), value.clone());
            insert(key, value)?;
            registry.fire(&fired_key, &fired_value, metrics);
            Ok(())
        }
        None => insert(key, value),
    }
}

impl<K: SpaceKey, V: SpaceValue> fmt::Debug for ListenerRegistry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("keys", &self.entries.keys().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> ListenerRegistry<&'static str, u32> {
        let config = SpaceConfig {
            sweeper: false,
            ..SpaceConfig::default()
        };
        ListenerRegistry::new("test", &config).unwrap()
    }

    #[test]
    fn test_fire_is_one_shot() {
        let registry = registry();
        let metrics = SpaceMetrics::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let listener: Arc<dyn Listener<&'static str, u32>> =
            Arc::new(move |_: &&'static str, value: &u32| {
                counter.fetch_add(*value as usize, Ordering::SeqCst);
            });

        registry.add("k", listener, Duration::ZERO).unwrap();
        assert!(registry.is_watching(&"k"));

        registry.fire(&"k", &5, &metrics);
        registry.fire(&"k", &7, &metrics);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert!(!registry.is_watching(&"k"));
        assert_eq!(metrics.snapshot().listeners_fired, 1);
    }

    #[test]
    fn test_remove_by_identity() {
        let registry = registry();
        let first: Arc<dyn Listener<&'static str, u32>> = Arc::new(|_: &&'static str, _: &u32| {});
        let second: Arc<dyn Listener<&'static str, u32>> = Arc::new(|_: &&'static str, _: &u32| {});

        registry.add("k", first.clone(), Duration::ZERO).unwrap();
        assert!(!registry.remove(&"k", &second).unwrap());
        assert!(registry.remove(&"k", &first).unwrap());
        assert!(!registry.is_watching(&"k"));
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        let registry = registry();
        let metrics = SpaceMetrics::new();
        let after = Arc::new(AtomicUsize::new(0));
        let counter = after.clone();

        registry
            .add("k", Arc::new(|_: &&'static str, _: &u32| panic!("boom")), Duration::ZERO)
            .unwrap();
        registry
            .add(
                "k",
                Arc::new(move |_: &&'static str, _: &u32| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                Duration::ZERO,
            )
            .unwrap();

        registry.fire(&"k", &1, &metrics);
        assert_eq!(after.load(Ordering::SeqCst), 1);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.listeners_fired, 2);
        assert_eq!(snapshot.listener_panics, 1);
    }
}
