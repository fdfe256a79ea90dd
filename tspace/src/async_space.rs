//! Tokio adapter
//!
//! Blocking retrievals run on tokio's blocking pool so async callers never
//! park a runtime worker. Insertions and probes never block and are called
//! directly.
//!
//! Dropping a retrieval future cancels the blocked call. A value the call
//! took after its future was dropped is pushed back to the head of its key.

use crate::cancel::CancelToken;
use crate::error::{Result, SpaceError};
use crate::space::Space;
use crate::template::Template;
use crate::types::{SpaceKey, SpaceValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

type Outcome<V> = Result<Option<V>>;

/// Return a value whose caller went away to the head of `key`
fn put_back<K: SpaceKey, V: SpaceValue>(space: &dyn Space<K, V>, key: K, value: V) {
    if let Err(err) = space.push(key, value) {
        tracing::warn!(space = %space.name(), %err, "could not restore abandoned value");
    }
}

/// Owned by a retrieval future; cancels the blocking call when dropped
struct Pending<K: SpaceKey, V: SpaceValue> {
    space: Arc<dyn Space<K, V>>,
    token: CancelToken,
    outcome: oneshot::Receiver<Outcome<V>>,
    /// Key to restore a taken value under; `None` for reads
    restore: Option<K>,
}

impl<K: SpaceKey, V: SpaceValue> Drop for Pending<K, V> {
    fn drop(&mut self) {
        self.token.cancel();
        // After close() the sender either already delivered or will fail
        self.outcome.close();
        if let Ok(Ok(Some(value))) = self.outcome.try_recv() {
            if let Some(key) = self.restore.take() {
                put_back(self.space.as_ref(), key, value);
            }
        }
    }
}

/// Async front-end for any space
pub struct AsyncSpace<K: SpaceKey, V: SpaceValue> {
    space: Arc<dyn Space<K, V>>,
}

impl<K: SpaceKey, V: SpaceValue> Clone for AsyncSpace<K, V> {
    fn clone(&self) -> Self {
        Self {
            space: Arc::clone(&self.space),
        }
    }
}

impl<K: SpaceKey, V: SpaceValue> AsyncSpace<K, V> {
    pub fn new(space: Arc<dyn Space<K, V>>) -> Self {
        Self { space }
    }

    /// The wrapped space, for synchronous access
    pub fn space(&self) -> &Arc<dyn Space<K, V>> {
        &self.space
    }

    pub fn out(&self, key: K, value: V) -> Result<()> {
        self.space.out(key, value)
    }

    pub fn out_timeout(&self, key: K, value: V, timeout: Duration) -> Result<()> {
        self.space.out_timeout(key, value, timeout)
    }

    pub fn push(&self, key: K, value: V) -> Result<()> {
        self.space.push(key, value)
    }

    pub fn put(&self, key: K, value: V) -> Result<()> {
        self.space.put(key, value)
    }

    pub fn inp(&self, key: &K) -> Result<Option<V>> {
        self.space.inp(key)
    }

    pub fn rdp(&self, key: &K) -> Result<Option<V>> {
        self.space.rdp(key)
    }

    pub async fn in_(&self, key: K) -> Result<V> {
        let restore = Some(key.clone());
        let found = self
            .retrieve(restore, move |space, token| space.in_cancellable(&key, None, token))
            .await?;
        found.ok_or_else(|| SpaceError::coordination("unbounded wait ended without a value"))
    }

    pub async fn in_timeout(&self, key: K, timeout: Duration) -> Result<Option<V>> {
        let restore = Some(key.clone());
        self.retrieve(restore, move |space, token| {
            space.in_cancellable(&key, Some(timeout), token)
        })
        .await
    }

    pub async fn rd(&self, key: K) -> Result<V> {
        let found = self
            .retrieve(None, move |space, token| space.rd_cancellable(&key, None, token))
            .await?;
        found.ok_or_else(|| SpaceError::coordination("unbounded wait ended without a value"))
    }

    pub async fn rd_timeout(&self, key: K, timeout: Duration) -> Result<Option<V>> {
        self.retrieve(None, move |space, token| {
            space.rd_cancellable(&key, Some(timeout), token)
        })
        .await
    }

    pub async fn in_match_timeout(
        &self,
        template: Template<K, V>,
        timeout: Duration,
    ) -> Result<Option<V>> {
        let restore = Some(template.key().clone());
        self.retrieve(restore, move |space, token| {
            space.in_match_cancellable(&template, Some(timeout), token)
        })
        .await
    }

    pub async fn rd_match_timeout(
        &self,
        template: Template<K, V>,
        timeout: Duration,
    ) -> Result<Option<V>> {
        self.retrieve(None, move |space, token| {
            space.rd_match_cancellable(&template, Some(timeout), token)
        })
        .await
    }

    pub async fn nrd_timeout(&self, key: K, timeout: Duration) -> Result<Option<V>> {
        self.blocking(move |space| space.nrd_timeout(&key, timeout))
            .await
    }

    pub async fn exist_any_timeout(&self, keys: Vec<K>, timeout: Duration) -> Result<bool> {
        self.blocking(move |space| space.exist_any_timeout(&keys, timeout))
            .await
    }

    /// Run a cancellable retrieval on the blocking pool
    async fn retrieve<F>(&self, restore: Option<K>, op: F) -> Outcome<V>
    where
        F: FnOnce(&dyn Space<K, V>, &CancelToken) -> Outcome<V> + Send + 'static,
    {
        let token = CancelToken::new();
        let (sender, receiver) = oneshot::channel();
        let mut pending = Pending {
            space: Arc::clone(&self.space),
            token: token.clone(),
            outcome: receiver,
            restore: restore.clone(),
        };

        let space = Arc::clone(&self.space);
        tokio::task::spawn_blocking(move || {
            let outcome = op(space.as_ref(), &token);
            if let Err(Ok(Some(value))) = sender.send(outcome) {
                if let Some(key) = restore {
                    put_back(space.as_ref(), key, value);
                }
            }
        });

        let delivered = (&mut pending.outcome).await;
        delivered.map_err(|err| SpaceError::coordination_from("blocking space task failed", err))?
    }

    /// Run a non-consuming wait on the blocking pool
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Space<K, V>) -> Result<T> + Send + 'static,
    {
        let space = Arc::clone(&self.space);
        tokio::task::spawn_blocking(move || op(space.as_ref()))
            .await
            .map_err(|err| SpaceError::coordination_from("blocking space task failed", err))?
    }
}
