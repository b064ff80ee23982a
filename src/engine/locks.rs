// src/engine/locks.rs
// Per-identity-chain async locks
//
// Supersede and delete against the same logical memory are linearized by
// locking the chain's root id. Locks for different chains never contend,
// and no lock is held across an entire bulk operation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Map size at which acquire sweeps out unused entries.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Default)]
pub struct ChainLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ChainLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one identity chain. The guard is owned, so it
    /// can be held across await points.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = match self.inner.lock() {
                Ok(map) => map,
                Err(poisoned) => poisoned.into_inner(),
            };
            if map.len() >= SWEEP_THRESHOLD {
                // Entries nobody holds or waits on can be dropped; a future
                // acquire recreates them.
                map.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_mutually_exclusive() {
        let locks = Arc::new(ChainLocks::new());
        let in_section = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let in_section = in_section.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("chain-1").await;
                let now = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_section.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = ChainLocks::new();
        let _a = locks.acquire("chain-a").await;
        // Would deadlock if keys shared a lock
        let _b = locks.acquire("chain-b").await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn guard_release_allows_reacquire() {
        let locks = ChainLocks::new();
        drop(locks.acquire("chain-1").await);
        let _again = locks.acquire("chain-1").await;
    }
}
