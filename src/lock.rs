// SPDX-License-Identifier: MIT

//! Distributed run lock
//!
//! Exactly one worker may drive a run at a time. The lock is a single
//! entry per run id holding the owner id with a TTL; renew and release
//! must compare the stored owner under the same guard as the mutation,
//! so a worker can never stomp a lock that expired and was reacquired by
//! someone else.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::EngineError;

/// How long an acquired lock lives without a renew
pub const LOCK_TTL: Duration = Duration::from_secs(60);

/// Heartbeat interval for the renew loop
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Exclusive-ownership capability keyed by run id
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Try to take ownership. `false` means another worker already holds
    /// the lock - the normal contention path, not an error.
    async fn acquire(&self, run_id: &str, owner_id: &str) -> Result<bool, EngineError>;

    /// Extend the TTL, only if this owner still holds the lock
    async fn renew(&self, run_id: &str, owner_id: &str) -> Result<bool, EngineError>;

    /// Clear ownership, only if this owner still holds the lock. Returns
    /// `false` when the lock expired or belongs to someone else.
    async fn release(&self, run_id: &str, owner_id: &str) -> Result<bool, EngineError>;
}

struct LockEntry {
    owner: String,
    deadline: Instant,
}

/// Process-local lock manager with the same owner-check semantics a
/// Redis-backed adapter must provide
pub struct MemoryLockManager {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, LockEntry>>>,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::with_ttl(LOCK_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for MemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn acquire(&self, run_id: &str, owner_id: &str) -> Result<bool, EngineError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(run_id) {
            Some(entry) if entry.deadline > now => Ok(false),
            _ => {
                entries.insert(
                    run_id.to_string(),
                    LockEntry {
                        owner: owner_id.to_string(),
                        deadline: now + self.ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn renew(&self, run_id: &str, owner_id: &str) -> Result<bool, EngineError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get_mut(run_id) {
            Some(entry) if entry.owner == owner_id && entry.deadline > now => {
                entry.deadline = now + self.ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, run_id: &str, owner_id: &str) -> Result<bool, EngineError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(run_id) {
            Some(entry) if entry.owner == owner_id && entry.deadline > now => {
                entries.remove(run_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let locks = MemoryLockManager::new();
        assert!(locks.acquire("run-1", "worker-a").await.unwrap());
        assert!(!locks.acquire("run-1", "worker-b").await.unwrap());
        // Different run is independent
        assert!(locks.acquire("run-2", "worker-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_requires_ownership() {
        let locks = MemoryLockManager::new();
        assert!(locks.acquire("run-1", "worker-a").await.unwrap());

        // The loser of the race cannot clear the winner's lock
        assert!(!locks.release("run-1", "worker-b").await.unwrap());
        assert!(!locks.acquire("run-1", "worker-b").await.unwrap());

        assert!(locks.release("run-1", "worker-a").await.unwrap());
        assert!(locks.acquire("run-1", "worker-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_renew_extends_only_for_owner() {
        let locks = MemoryLockManager::new();
        assert!(locks.acquire("run-1", "worker-a").await.unwrap());
        assert!(locks.renew("run-1", "worker-a").await.unwrap());
        assert!(!locks.renew("run-1", "worker-b").await.unwrap());
        assert!(!locks.renew("run-2", "worker-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_reacquired() {
        let locks = MemoryLockManager::with_ttl(Duration::from_millis(10));
        assert!(locks.acquire("run-1", "worker-a").await.unwrap());

        tokio::time::sleep(Duration::from_millis(20)).await;

        // worker-a's lease is gone: renew and release both fail, and
        // worker-b wins a fresh acquire
        assert!(!locks.renew("run-1", "worker-a").await.unwrap());
        assert!(!locks.release("run-1", "worker-a").await.unwrap());
        assert!(locks.acquire("run-1", "worker-b").await.unwrap());

        // a's stale release must not clear b's new lock
        assert!(!locks.release("run-1", "worker-a").await.unwrap());
        assert!(!locks.acquire("run-1", "worker-c").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_then_reacquire_same_owner() {
        let locks = MemoryLockManager::new();
        assert!(locks.acquire("run-1", "worker-a").await.unwrap());
        assert!(locks.release("run-1", "worker-a").await.unwrap());
        assert!(locks.acquire("run-1", "worker-a").await.unwrap());
    }
}
