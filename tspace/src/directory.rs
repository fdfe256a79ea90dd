//! Space directory: one shared space per `scheme:name[:param]` string
//!
//! Lookups are normalized (`orders` and `TSpace:orders` both resolve to
//! `tspace:orders`), the first lookup creates the space through the factory
//! registered for its scheme, and every later lookup returns the same
//! instance until it is released or closed.

use crate::config::{DirectoryConfig, SpaceConfig};
use crate::error::{Result, SpaceError};
use crate::persistent::PersistentSpace;
use crate::space::{GlobalLockSpace, LocalSpace, Space};
use crate::types::{SpaceKey, SpaceValue};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Scheme used when a directory string names no scheme
pub const DEFAULT_SCHEME: &str = "tspace";

/// Directory string of the default space
pub const DEFAULT_SPACE: &str = "tspace:default";

/// A parsed directory string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpaceUri {
    scheme: String,
    name: String,
    param: Option<String>,
}

impl SpaceUri {
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Everything after the second `:`, verbatim
    pub fn param(&self) -> Option<&str> {
        self.param.as_deref()
    }
}

impl FromStr for SpaceUri {
    type Err = SpaceError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let mut parts = s.splitn(3, ':');
        let first = parts.next().unwrap_or_default();
        let (scheme, name) = match parts.next() {
            Some(name) => (first.to_ascii_lowercase(), name),
            None => (DEFAULT_SCHEME.to_string(), first),
        };
        let param = parts.next().filter(|p| !p.is_empty()).map(str::to_string);

        if scheme.is_empty() {
            return Err(SpaceError::invalid(format!("missing scheme in '{s}'")));
        }
        if name.is_empty() {
            return Err(SpaceError::invalid(format!("missing space name in '{s}'")));
        }
        Ok(Self {
            scheme,
            name: name.to_string(),
            param,
        })
    }
}

impl fmt::Display for SpaceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.name)?;
        if let Some(param) = &self.param {
            write!(f, ":{param}")?;
        }
        Ok(())
    }
}

/// Builds the space for a directory string
pub type SpaceFactory<K, V> =
    Arc<dyn Fn(&SpaceUri, SpaceConfig) -> Result<Arc<dyn Space<K, V>>> + Send + Sync>;

/// One cached space; its lock serializes creation of that space only
type Slot<K, V> = Arc<Mutex<Option<Arc<dyn Space<K, V>>>>>;

/// Registry of named spaces
///
/// Lock order: a slot lock may be held while taking the map lock, never
/// the other way round.
pub struct SpaceDirectory<K: SpaceKey, V: SpaceValue> {
    config: DirectoryConfig,
    factories: RwLock<HashMap<String, SpaceFactory<K, V>>>,
    spaces: Mutex<HashMap<String, Slot<K, V>>>,
}

impl<K: SpaceKey, V: SpaceValue> SpaceDirectory<K, V> {
    /// Directory with the in-memory schemes `tspace` and `gspace`
    pub fn new(config: DirectoryConfig) -> Self {
        let directory = Self {
            config,
            factories: RwLock::new(HashMap::new()),
            spaces: Mutex::new(HashMap::new()),
        };
        directory.register_scheme(
            "tspace",
            Arc::new(|uri: &SpaceUri, config: SpaceConfig| -> Result<Arc<dyn Space<K, V>>> {
                let space: Arc<dyn Space<K, V>> =
                    Arc::new(LocalSpace::new(uri.to_string(), config)?);
                Ok(space)
            }),
        );
        directory.register_scheme(
            "gspace",
            Arc::new(|uri: &SpaceUri, config: SpaceConfig| -> Result<Arc<dyn Space<K, V>>> {
                let space: Arc<dyn Space<K, V>> =
                    Arc::new(GlobalLockSpace::new(uri.to_string(), config)?);
                Ok(space)
            }),
        );
        directory
    }

    /// Register (or replace) the factory for `scheme`
    pub fn register_scheme(&self, scheme: &str, factory: SpaceFactory<K, V>) {
        self.factories
            .write()
            .insert(scheme.to_ascii_lowercase(), factory);
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Resolve `uri`, creating the space on first use
    ///
    /// The factory runs without the directory-wide lock, so it may look up
    /// other spaces. Looking up its own string from inside the factory
    /// deadlocks.
    pub fn lookup(&self, uri: &str) -> Result<Arc<dyn Space<K, V>>> {
        let uri: SpaceUri = uri.parse()?;
        let normalized = uri.to_string();
        let factory = self
            .factories
            .read()
            .get(uri.scheme())
            .cloned()
            .ok_or_else(|| SpaceError::invalid(format!("unknown scheme '{}'", uri.scheme())))?;

        loop {
            let slot = Arc::clone(self.spaces.lock().entry(normalized.clone()).or_default());
            let mut current = slot.lock();
            if !self.is_cached(&normalized, &slot) {
                // Released while we waited for the slot
                continue;
            }
            if let Some(space) = current.as_ref() {
                if !space.is_closed() {
                    return Ok(Arc::clone(space));
                }
                tracing::debug!(space = %normalized, "replacing closed space");
            }

            return match factory(&uri, self.config.config_for(&normalized)) {
                Ok(space) => {
                    *current = Some(Arc::clone(&space));
                    tracing::debug!(space = %normalized, "space registered");
                    Ok(space)
                }
                Err(err) => {
                    if current.is_none() {
                        self.spaces.lock().remove(&normalized);
                    }
                    Err(err)
                }
            };
        }
    }

    fn is_cached(&self, normalized: &str, slot: &Slot<K, V>) -> bool {
        self.spaces
            .lock()
            .get(normalized)
            .is_some_and(|cached| Arc::ptr_eq(cached, slot))
    }

    /// The space behind [`DEFAULT_SPACE`]
    pub fn default_space(&self) -> Result<Arc<dyn Space<K, V>>> {
        self.lookup(DEFAULT_SPACE)
    }

    /// True if `uri` currently resolves to a live, cached space
    pub fn contains(&self, uri: &str) -> bool {
        let Ok(uri) = uri.parse::<SpaceUri>() else {
            return false;
        };
        let Some(slot) = self.spaces.lock().get(&uri.to_string()).cloned() else {
            return false;
        };
        let current = slot.lock();
        current.as_ref().is_some_and(|space| !space.is_closed())
    }

    /// Normalized strings of every cached space
    pub fn names(&self) -> Vec<String> {
        let slots: Vec<_> = self
            .spaces
            .lock()
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();
        let mut names: Vec<_> = slots
            .into_iter()
            .filter(|(_, slot)| slot.lock().is_some())
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }

    /// Close and forget one space; false if it was not cached
    pub fn release(&self, uri: &str) -> Result<bool> {
        let uri: SpaceUri = uri.parse()?;
        let Some(slot) = self.spaces.lock().remove(&uri.to_string()) else {
            return Ok(false);
        };
        let space = slot.lock().take();
        match space {
            Some(space) => {
                space.close()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every cached space, returning the first failure
    pub fn close_all(&self) -> Result<()> {
        let slots: Vec<_> = self.spaces.lock().drain().collect();
        let mut first_error = None;
        for (name, slot) in slots {
            let Some(space) = slot.lock().take() else {
                continue;
            };
            if let Err(err) = space.close() {
                tracing::warn!(space = %name, error = %err, "failed to close space");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<K, V> SpaceDirectory<K, V>
where
    K: SpaceKey + Serialize + DeserializeOwned,
    V: SpaceValue + Serialize + DeserializeOwned,
{
    /// Add the `persistent:name:path` scheme
    pub fn with_persistence(self) -> Self {
        self.register_scheme(
            "persistent",
            Arc::new(|uri: &SpaceUri, config: SpaceConfig| -> Result<Arc<dyn Space<K, V>>> {
                let path = uri.param().ok_or_else(|| {
                    SpaceError::invalid(format!("'{uri}' needs a snapshot path parameter"))
                })?;
                let space: Arc<dyn Space<K, V>> =
                    Arc::new(PersistentSpace::open(uri.to_string(), path, config)?);
                Ok(space)
            }),
        );
        self
    }
}

impl<K: SpaceKey, V: SpaceValue> Default for SpaceDirectory<K, V> {
    fn default() -> Self {
        Self::new(DirectoryConfig::default())
    }
}

impl<K: SpaceKey, V: SpaceValue> fmt::Debug for SpaceDirectory<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.factories.read().keys().cloned().collect();
        schemes.sort();
        f.debug_struct("SpaceDirectory")
            .field("schemes", &schemes)
            .field("spaces", &self.names())
            .finish()
    }
}

static SHARED: Lazy<SpaceDirectory<String, serde_json::Value>> =
    Lazy::new(|| SpaceDirectory::default().with_persistence());

/// Process-wide directory of string-keyed JSON spaces
pub fn shared() -> &'static SpaceDirectory<String, serde_json::Value> {
    &SHARED
}
