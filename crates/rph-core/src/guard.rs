//! Single in-flight generation per session.
//!
//! A replayed or double-clicked generate request must not create a second
//! lesson plan while the first provider call is still running. The guard
//! hands out at most one [`InFlightPermit`] per key; dropping the permit
//! releases the key, including when the holding future is cancelled.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::error::PlannerError;

#[derive(Debug, Clone, Default)]
pub struct InFlightGuard {
    active: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, failing with [`PlannerError::GenerationInProgress`] if
    /// another permit for it is alive.
    pub fn try_acquire(&self, key: Uuid) -> Result<InFlightPermit, PlannerError> {
        if !lock(&self.active).insert(key) {
            return Err(PlannerError::GenerationInProgress);
        }
        Ok(InFlightPermit {
            key,
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_active(&self, key: Uuid) -> bool {
        lock(&self.active).contains(&key)
    }
}

/// Proof that the holder owns the in-flight slot for one key.
#[derive(Debug)]
pub struct InFlightPermit {
    key: Uuid,
    active: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.key);
    }
}

// The set stays consistent even if a holder panicked mid-insert.
fn lock(set: &Mutex<HashSet<Uuid>>) -> MutexGuard<'_, HashSet<Uuid>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let guard = InFlightGuard::new();
        let key = Uuid::new_v4();

        let permit = guard.try_acquire(key).expect("first acquire");
        assert!(guard.is_active(key));
        assert!(matches!(
            guard.try_acquire(key),
            Err(PlannerError::GenerationInProgress)
        ));

        drop(permit);
        assert!(!guard.is_active(key));
        guard.try_acquire(key).expect("acquire after release");
    }

    #[test]
    fn keys_are_independent() {
        let guard = InFlightGuard::new();
        let _a = guard.try_acquire(Uuid::new_v4()).unwrap();
        let _b = guard.try_acquire(Uuid::new_v4()).unwrap();
    }

    #[tokio::test]
    async fn cancelled_holder_releases_key() {
        let guard = InFlightGuard::new();
        let key = Uuid::new_v4();

        let g = guard.clone();
        let handle = tokio::spawn(async move {
            let _permit = g.try_acquire(key).unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        tokio::task::yield_now().await;
        while !guard.is_active(key) {
            tokio::task::yield_now().await;
        }

        handle.abort();
        let _ = handle.await;
        assert!(!guard.is_active(key));
    }
}
