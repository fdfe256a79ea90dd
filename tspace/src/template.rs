//! Content-addressed retrieval templates
//!
//! A [`Template`] pairs a key with a [`Matcher`]. Retrieval through a
//! template scans the key's queue for the earliest live entry the matcher
//! accepts instead of taking the head.
//!
//! Matching is pluggable: closures, deep equality ([`Equals`]) and content
//! digests ([`DigestMatcher`]) are provided.

use crate::error::{Result, SpaceError};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Predicate over candidate values
pub trait Matcher<V>: Send + Sync {
    /// Returns true if `candidate` satisfies this matcher
    fn matches(&self, candidate: &V) -> bool;
}

impl<V, F> Matcher<V> for F
where
    F: Fn(&V) -> bool + Send + Sync,
{
    fn matches(&self, candidate: &V) -> bool {
        self(candidate)
    }
}

/// Deep-equality matcher
#[derive(Debug, Clone, PartialEq)]
pub struct Equals<V>(pub V);

impl<V> Matcher<V> for Equals<V>
where
    V: PartialEq + Send + Sync,
{
    fn matches(&self, candidate: &V) -> bool {
        &self.0 == candidate
    }
}

/// Matches values whose serialized form has the same blake3 digest
///
/// Values are encoded with `serde_json` before hashing. Candidates that
/// fail to serialize never match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestMatcher {
    digest: blake3::Hash,
}

impl DigestMatcher {
    /// Digest of `value`
    pub fn of<V: Serialize>(value: &V) -> Result<Self> {
        Ok(Self {
            digest: digest(value)?,
        })
    }

    /// Match against a digest computed elsewhere
    pub fn from_hash(digest: blake3::Hash) -> Self {
        Self { digest }
    }

    pub fn hash(&self) -> &blake3::Hash {
        &self.digest
    }
}

impl<V: Serialize> Matcher<V> for DigestMatcher {
    fn matches(&self, candidate: &V) -> bool {
        match digest(candidate) {
            Ok(hash) => hash == self.digest,
            Err(err) => {
                tracing::trace!(error = %err, "candidate not digestible");
                false
            }
        }
    }
}

fn digest<V: Serialize>(value: &V) -> Result<blake3::Hash> {
    let bytes = serde_json::to_vec(value)?;
    Ok(blake3::hash(&bytes))
}

/// A key plus a content predicate
pub struct Template<K, V> {
    key: K,
    matcher: Arc<dyn Matcher<V>>,
}

impl<K, V: 'static> Template<K, V> {
    /// Template with an arbitrary matcher
    pub fn new(key: K, matcher: impl Matcher<V> + 'static) -> Self {
        Self {
            key,
            matcher: Arc::new(matcher),
        }
    }

    /// Template matching values equal to `value`
    pub fn equals(key: K, value: V) -> Self
    where
        V: PartialEq + Send + Sync,
    {
        Self::new(key, Equals(value))
    }

    /// Template matching values with the same content digest as `value`
    pub fn digest(key: K, value: &V) -> Result<Self>
    where
        V: Serialize,
    {
        let matcher = DigestMatcher::of(value)
            .map_err(|err| SpaceError::invalid(format!("template value not digestible: {err}")))?;
        Ok(Self::new(key, matcher))
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn matches(&self, candidate: &V) -> bool {
        self.matcher.matches(candidate)
    }

    pub(crate) fn matcher(&self) -> &dyn Matcher<V> {
        self.matcher.as_ref()
    }
}

impl<K: Clone, V> Clone for Template<K, V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            matcher: Arc::clone(&self.matcher),
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for Template<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
