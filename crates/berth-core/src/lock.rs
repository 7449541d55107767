//! Leased, timeout-bounded locks.
//!
//! The deployment job runner serialises all state mutation through per-key
//! locks: one per application-and-job, and one per step of a run. This module
//! provides the lock registry those keys map into. Acquisition is bounded by
//! a wall-clock timeout and surfaces [`Error::LockTimeout`] on expiry, which
//! callers treat as "try again next cycle". A [`LockLease`] releases its key
//! when dropped, so a crashed or cancelled task cannot strand a lock.
//!
//! Callers are responsible for acquisition order. The runner's discipline is
//! {application-job, run, step}, with one sanctioned inversion: briefly taking
//! a prerequisite's step lock to confirm it is idle.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;

use crate::error::{Error, Result};

/// The key of a lock in a [`LockRegistry`].
///
/// Keys are slash-separated paths, e.g. `"jobs/tenant.app.default/systemTest"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Creates a lock key from path segments.
    #[must_use]
    pub fn of(segments: &[&str]) -> Self {
        Self(segments.join("/"))
    }

    /// Returns the path form of this key.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registry of leased locks, one per key.
///
/// Locks are created on first use and fair per key (FIFO among waiters).
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockRegistry {
    /// Creates an empty lock registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `key`, waiting at most `timeout`.
    ///
    /// The returned lease holds the lock until dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] if the lock is not acquired in time.
    pub async fn lock(&self, key: &LockKey, timeout: Duration) -> Result<LockLease> {
        let mutex = {
            let mut locks = self.locks.lock().expect("lock registry poisoned");
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(LockLease {
                key: key.clone(),
                _guard: guard,
            }),
            Err(_) => Err(Error::LockTimeout {
                key: key.to_string(),
            }),
        }
    }

    /// Returns whether the lock for `key` is currently held.
    #[must_use]
    pub fn is_locked(&self, key: &LockKey) -> bool {
        let locks = self.locks.lock().expect("lock registry poisoned");
        locks.get(key).is_some_and(|m| m.try_lock().is_err())
    }
}

/// A held lock, released on drop.
pub struct LockLease {
    key: LockKey,
    _guard: OwnedMutexGuard<()>,
}

impl LockLease {
    /// Returns the key this lease holds.
    #[must_use]
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl fmt::Debug for LockLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockLease").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_excludes_second_holder() {
        let registry = LockRegistry::new();
        let key = LockKey::of(&["jobs", "tenant.app.default", "systemTest"]);

        let lease = registry.lock(&key, Duration::from_secs(1)).await.unwrap();
        assert!(registry.is_locked(&key));

        let second = registry.lock(&key, Duration::from_millis(20)).await;
        assert!(matches!(second, Err(Error::LockTimeout { .. })));

        drop(lease);
        assert!(!registry.is_locked(&key));
        registry.lock(&key, Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let registry = LockRegistry::new();
        let first = LockKey::of(&["steps", "a"]);
        let second = LockKey::of(&["steps", "b"]);

        let _a = registry.lock(&first, Duration::from_secs(1)).await.unwrap();
        let _b = registry.lock(&second, Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn lease_releases_on_drop() {
        let registry = Arc::new(LockRegistry::new());
        let key = LockKey::of(&["steps", "deployReal"]);

        {
            let _lease = registry.lock(&key, Duration::from_secs(1)).await.unwrap();
        }
        let reacquired = registry.lock(&key, Duration::from_millis(20)).await;
        assert!(reacquired.is_ok());
    }
}
