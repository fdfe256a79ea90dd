//! File-backed storage strategy
//!
//! `PersistentSpace` serves every operation from an in-memory
//! [`LocalSpace`] and writes its live contents to a JSON snapshot on
//! [`flush`](PersistentSpace::flush) and on close. Expiry is stored as a
//! wall-clock instant so timed entries keep their remaining lifetime across
//! restarts; entries that expired while the process was down are skipped
//! on load. Writes go to a temporary file in the same directory that is
//! then renamed over the snapshot.

use crate::cancel::CancelToken;
use crate::config::SpaceConfig;
use crate::error::{Result, SpaceError};
use crate::listener::Listener;
use crate::metrics::MetricsSnapshot;
use crate::space::{LocalSpace, Space};
use crate::template::Template;
use crate::types::{SpaceKey, SpaceValue};
use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot<K, V> {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: Vec<SnapshotEntry<K, V>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry<K, V> {
    key: K,
    values: Vec<SnapshotValue<V>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotValue<V> {
    value: V,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

/// What loading a snapshot restored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub restored: usize,
    /// Entries whose expiry passed while the snapshot sat on disk
    pub skipped: usize,
}

/// A space whose contents survive restarts via an explicit snapshot file
#[derive(Clone)]
pub struct PersistentSpace<K: SpaceKey, V: SpaceValue> {
    path: PathBuf,
    space: LocalSpace<K, V>,
    loaded: LoadReport,
}

impl<K, V> PersistentSpace<K, V>
where
    K: SpaceKey + Serialize + DeserializeOwned,
    V: SpaceValue + Serialize + DeserializeOwned,
{
    /// Open the space backed by `path`, restoring a snapshot if one exists
    pub fn open(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        config: SpaceConfig,
    ) -> Result<Self> {
        let path = path.into();
        let space = LocalSpace::new(name, config)?;
        let loaded = if path.exists() {
            restore(&space, read_snapshot(&path)?)?
        } else {
            LoadReport::default()
        };
        tracing::debug!(
            space = %space.name(),
            path = %path.display(),
            restored = loaded.restored,
            skipped = loaded.skipped,
            "persistent space opened"
        );
        Ok(Self {
            path,
            space,
            loaded,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What was restored when the space was opened
    pub fn load_report(&self) -> LoadReport {
        self.loaded
    }

    /// Write the live contents to the snapshot file
    pub fn flush(&self) -> Result<()> {
        if self.space.is_closed() {
            return Err(SpaceError::Closed(self.space.name().to_string()));
        }
        let snapshot = self.capture()?;
        self.write_snapshot(&snapshot)?;
        tracing::trace!(
            space = %self.space.name(),
            keys = snapshot.entries.len(),
            "snapshot written"
        );
        Ok(())
    }

    fn capture(&self) -> Result<Snapshot<K, V>> {
        let now = Instant::now();
        let saved_at = Utc::now();
        let mut entries = Vec::new();
        for (key, stored) in self.space.core().entries() {
            let mut values = Vec::with_capacity(stored.len());
            for entry in stored {
                let expires_at = match entry.remaining(now) {
                    None => None,
                    Some(left) if left.is_zero() => continue,
                    Some(left) => Some(wall_clock_deadline(saved_at, left)?),
                };
                values.push(SnapshotValue {
                    value: entry.into_value(),
                    expires_at,
                });
            }
            if !values.is_empty() {
                entries.push(SnapshotEntry { key, values });
            }
        }
        Ok(Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at,
            entries,
        })
    }

    fn write_snapshot(&self, snapshot: &Snapshot<K, V>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, snapshot)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| SpaceError::from(err.error))?;
        Ok(())
    }
}

fn wall_clock_deadline(now: DateTime<Utc>, left: Duration) -> Result<DateTime<Utc>> {
    TimeDelta::from_std(left)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| SpaceError::coordination(format!("expiry {left:?} cannot be stored")))
}

fn read_snapshot<K, V>(path: &Path) -> Result<Snapshot<K, V>>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    let file = File::open(path)?;
    let snapshot: Snapshot<K, V> = serde_json::from_reader(BufReader::new(file))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SpaceError::coordination(format!(
            "unsupported snapshot version {} in {}",
            snapshot.version,
            path.display()
        )));
    }
    Ok(snapshot)
}

fn restore<K: SpaceKey, V: SpaceValue>(
    space: &LocalSpace<K, V>,
    snapshot: Snapshot<K, V>,
) -> Result<LoadReport> {
    let now = Utc::now();
    let mut report = LoadReport::default();
    for SnapshotEntry { key, values } in snapshot.entries {
        for SnapshotValue { value, expires_at } in values {
            let ttl = match expires_at {
                None => Duration::ZERO,
                Some(at) => match (at - now).to_std() {
                    Ok(left) if !left.is_zero() => left,
                    _ => {
                        report.skipped += 1;
                        continue;
                    }
                },
            };
            space.core().out_timeout(key.clone(), value, ttl)?;
            report.restored += 1;
        }
    }
    Ok(report)
}

impl<K, V> Space<K, V> for PersistentSpace<K, V>
where
    K: SpaceKey + Serialize + DeserializeOwned,
    V: SpaceValue + Serialize + DeserializeOwned,
{
    fn name(&self) -> &str {
        self.space.name()
    }

    fn out_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()> {
        self.space.out_timeout(key, value, timeout)
    }

    fn push_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()> {
        self.space.push_timeout(key, value, timeout)
    }

    fn put_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()> {
        self.space.put_timeout(key, value, timeout)
    }

    fn in_(&self, key: &K) -> Result<V> {
        self.space.in_(key)
    }

    fn in_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>> {
        self.space.in_timeout(key, timeout)
    }

    fn rd(&self, key: &K) -> Result<V> {
        self.space.rd(key)
    }

    fn rd_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>> {
        self.space.rd_timeout(key, timeout)
    }

    fn inp(&self, key: &K) -> Result<Option<V>> {
        self.space.inp(key)
    }

    fn rdp(&self, key: &K) -> Result<Option<V>> {
        self.space.rdp(key)
    }

    fn in_match(&self, template: &Template<K, V>) -> Result<V> {
        self.space.in_match(template)
    }

    fn in_match_timeout(&self, template: &Template<K, V>, timeout: Duration) -> Result<Option<V>> {
        self.space.in_match_timeout(template, timeout)
    }

    fn rd_match(&self, template: &Template<K, V>) -> Result<V> {
        self.space.rd_match(template)
    }

    fn rd_match_timeout(&self, template: &Template<K, V>, timeout: Duration) -> Result<Option<V>> {
        self.space.rd_match_timeout(template, timeout)
    }

    fn inp_match(&self, template: &Template<K, V>) -> Result<Option<V>> {
        self.space.inp_match(template)
    }

    fn rdp_match(&self, template: &Template<K, V>) -> Result<Option<V>> {
        self.space.rdp_match(template)
    }

    fn in_cancellable(
        &self,
        key: &K,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        self.space.in_cancellable(key, timeout, token)
    }

    fn rd_cancellable(
        &self,
        key: &K,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        self.space.rd_cancellable(key, timeout, token)
    }

    fn in_match_cancellable(
        &self,
        template: &Template<K, V>,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        self.space.in_match_cancellable(template, timeout, token)
    }

    fn rd_match_cancellable(
        &self,
        template: &Template<K, V>,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<Option<V>> {
        self.space.rd_match_cancellable(template, timeout, token)
    }

    fn nrd(&self, key: &K) -> Result<()> {
        self.space.nrd(key)
    }

    fn nrd_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>> {
        self.space.nrd_timeout(key, timeout)
    }

    fn exist_any(&self, keys: &[K]) -> Result<bool> {
        self.space.exist_any(keys)
    }

    fn exist_any_timeout(&self, keys: &[K], timeout: Duration) -> Result<bool> {
        self.space.exist_any_timeout(keys, timeout)
    }

    fn size(&self, key: &K) -> usize {
        self.space.size(key)
    }

    fn keys(&self) -> Vec<K> {
        self.space.keys()
    }

    fn add_listener_timeout(
        &self,
        key: K,
        listener: Arc<dyn Listener<K, V>>,
        timeout: Duration,
    ) -> Result<()> {
        self.space.add_listener_timeout(key, listener, timeout)
    }

    fn remove_listener(&self, key: &K, listener: &Arc<dyn Listener<K, V>>) -> Result<bool> {
        self.space.remove_listener(key, listener)
    }

    fn dump(&self, sink: &mut dyn io::Write, indent: &str) -> io::Result<()> {
        writeln!(sink, "{indent}snapshot {}", self.path.display())?;
        self.space.dump(sink, indent)
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.space.metrics()
    }

    /// Flush the snapshot, then close the in-memory space
    ///
    /// The space is closed even if the flush fails; the flush error is
    /// returned.
    fn close(&self) -> Result<()> {
        if self.space.is_closed() {
            return Ok(());
        }
        let flushed = self.flush();
        self.space.close()?;
        flushed
    }

    fn is_closed(&self) -> bool {
        self.space.is_closed()
    }
}
