//! Mutual exclusion for sync jobs: a lease keyed by (user, platform) must
//! be held while a job is anywhere between accepted and terminal, so two
//! jobs can never merge into the same rows concurrently.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::model::PlatformId;

type Key = (i64, PlatformId);

#[derive(Clone, Default)]
pub struct KeyedLease {
    held: Arc<Mutex<HashSet<Key>>>,
}

/// Held lease; releases its key on drop.
pub struct LeaseGuard {
    key: Key,
    held: Arc<Mutex<HashSet<Key>>>,
}

impl KeyedLease {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for (user, platform); `None` while another holder is
    /// active.
    pub fn try_acquire(&self, user_id: i64, platform: PlatformId) -> Option<LeaseGuard> {
        let key = (user_id, platform);
        let mut held = lock(&self.held);
        if !held.insert(key) {
            return None;
        }
        Some(LeaseGuard {
            key,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, user_id: i64, platform: PlatformId) -> bool {
        lock(&self.held).contains(&(user_id, platform))
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        lock(&self.held).remove(&self.key);
    }
}

fn lock(held: &Mutex<HashSet<Key>>) -> MutexGuard<'_, HashSet<Key>> {
    match held.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_for_same_key_fails() {
        let lease = KeyedLease::new();
        let guard = lease.try_acquire(1, PlatformId::Steam);
        assert!(guard.is_some());
        assert!(lease.try_acquire(1, PlatformId::Steam).is_none());
        // other keys stay independent
        assert!(lease.try_acquire(1, PlatformId::Gog).is_some());
        assert!(lease.try_acquire(2, PlatformId::Steam).is_some());
    }

    #[test]
    fn drop_releases_the_key() {
        let lease = KeyedLease::new();
        {
            let _guard = lease.try_acquire(1, PlatformId::Steam).unwrap();
            assert!(lease.is_held(1, PlatformId::Steam));
        }
        assert!(!lease.is_held(1, PlatformId::Steam));
        assert!(lease.try_acquire(1, PlatformId::Steam).is_some());
    }
}
