//! Core type definitions for tuple spaces
//!
//! Bounds for keys and values, and the `Expirable` storage wrapper that
//! gives timed entries an absolute deadline on the monotonic clock.

use std::fmt::Debug;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Anything usable as a space key
///
/// Blanket-implemented for every type with the required bounds.
pub trait SpaceKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> SpaceKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Anything storable as a space value
pub trait SpaceValue: Clone + Debug + Send + Sync + 'static {}

impl<T> SpaceValue for T where T: Clone + Debug + Send + Sync + 'static {}

/// A stored value with an optional absolute expiration instant
///
/// Once the monotonic clock passes `expires_at` the value is logically
/// absent, even if it has not been physically removed yet. Callers of a
/// space never see this wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct Expirable<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Expirable<V> {
    /// Wrap a value that never expires
    pub fn permanent(value: V) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Wrap a value with an absolute deadline
    pub fn until(value: V, expires_at: Instant) -> Self {
        Self {
            value,
            expires_at: Some(expires_at),
        }
    }

    /// Wrap a value that expires `ttl` from `now`
    ///
    /// A zero `ttl` means no expiry. Returns `None` when the deadline
    /// cannot be represented.
    pub fn with_ttl(value: V, ttl: Duration, now: Instant) -> Option<Self> {
        if ttl.is_zero() {
            return Some(Self::permanent(value));
        }
        now.checked_add(ttl).map(|deadline| Self::until(value, deadline))
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// True for entries that carry a deadline at all
    pub fn is_expirable(&self) -> bool {
        self.expires_at.is_some()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    /// Time left before expiry, `None` for permanent entries
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// The value, or `None` once expired
    pub fn get(&self, now: Instant) -> Option<&V> {
        if self.is_expired(now) {
            None
        } else {
            Some(&self.value)
        }
    }

    /// The value regardless of expiry
    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_never_expires() {
        let entry = Expirable::permanent("v");
        let later = Instant::now() + Duration::from_secs(3600);
        assert!(!entry.is_expired(later));
        assert_eq!(entry.get(later), Some(&"v"));
        assert_eq!(entry.remaining(later), None);
    }

    #[test]
    fn test_expired_value_is_absent() {
        let now = Instant::now();
        let entry = Expirable::with_ttl("v", Duration::from_millis(10), now).unwrap();
        assert!(entry.is_expirable());
        assert_eq!(entry.get(now), Some(&"v"));

        let after = now + Duration::from_millis(10);
        assert!(entry.is_expired(after));
        assert_eq!(entry.get(after), None);
        assert_eq!(entry.remaining(after), Some(Duration::ZERO));
    }

    #[test]
    fn test_zero_ttl_is_permanent() {
        let entry = Expirable::with_ttl(1, Duration::ZERO, Instant::now()).unwrap();
        assert!(!entry.is_expirable());
    }

    #[test]
    fn test_unrepresentable_deadline() {
        assert!(Expirable::with_ttl(1, Duration::MAX, Instant::now()).is_none());
    }
}
