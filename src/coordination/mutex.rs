//! Lease-based distributed mutex
//!
//! Each [`DistributedMutex`] carries a fresh owner token. Acquisition writes
//! the token with `SET NX PX`; release deletes the key only while it still
//! holds that token, so a holder whose lease already expired can never free a
//! lock that has since been taken by someone else.

use std::time::Duration;
use uuid::Uuid;

use super::SharedCoordinator;

/// Named lock with a per-holder owner token
pub struct DistributedMutex {
    store: SharedCoordinator,
    key: String,
    token: String,
}

impl DistributedMutex {
    /// Create a handle for `key` with a newly generated owner token
    pub fn new(store: SharedCoordinator, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            token: Uuid::new_v4().to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Try to take the lock for `ttl`
    ///
    /// Never blocks or retries. Any store error counts as "not acquired".
    pub async fn acquire(&self, ttl: Duration) -> bool {
        match self.store.set_nx_px(&self.key, &self.token, ttl).await {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Lock acquire failed, treating as held");
                false
            }
        }
    }

    /// Release the lock if this handle still owns it
    pub async fn release(&self) -> bool {
        match self.store.compare_and_delete(&self.key, &self.token).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(key = %self.key, "Lock no longer owned at release");
                false
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Lock release failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for DistributedMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedMutex")
            .field("key", &self.key)
            .field("token", &self.token)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::coordination::{
        CoordinationError, CoordinationResult, CoordinationStore, MemoryCoordinator,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Unreachable;

    #[async_trait]
    impl CoordinationStore for Unreachable {
        async fn set_nx_px(&self, _: &str, _: &str, _: Duration) -> CoordinationResult<bool> {
            Err(CoordinationError::Backend("connection refused".into()))
        }
        async fn compare_and_delete(&self, _: &str, _: &str) -> CoordinationResult<bool> {
            Err(CoordinationError::Backend("connection refused".into()))
        }
        async fn zadd(&self, _: &str, _: &str, _: f64) -> CoordinationResult<()> {
            Err(CoordinationError::Backend("connection refused".into()))
        }
        async fn zcard(&self, _: &str) -> CoordinationResult<usize> {
            Err(CoordinationError::Backend("connection refused".into()))
        }
        async fn zscore(&self, _: &str, _: &str) -> CoordinationResult<Option<f64>> {
            Err(CoordinationError::Backend("connection refused".into()))
        }
        async fn zrange(&self, _: &str, _: isize, _: isize) -> CoordinationResult<Vec<String>> {
            Err(CoordinationError::Backend("connection refused".into()))
        }
        async fn zrem(&self, _: &str, _: &str) -> CoordinationResult<bool> {
            Err(CoordinationError::Backend("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_tokens_are_unique_per_handle() {
        let store: SharedCoordinator = Arc::new(MemoryCoordinator::new());
        let a = DistributedMutex::new(store.clone(), "locks:t1");
        let b = DistributedMutex::new(store, "locks:t1");
        assert_ne!(a.token(), b.token());
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive_until_release() {
        let store: SharedCoordinator = Arc::new(MemoryCoordinator::new());
        let a = DistributedMutex::new(store.clone(), "locks:t1");
        let b = DistributedMutex::new(store, "locks:t1");

        assert!(a.acquire(Duration::from_secs(30)).await);
        assert!(!b.acquire(Duration::from_secs(30)).await);

        assert!(!b.release().await);
        assert!(a.release().await);
        assert!(b.acquire(Duration::from_secs(30)).await);
    }

    #[tokio::test]
    async fn test_expired_holder_cannot_release_new_owner() {
        let clock = Arc::new(ManualClock::new(0));
        let store: SharedCoordinator = Arc::new(MemoryCoordinator::with_clock(clock.clone()));
        let a = DistributedMutex::new(store.clone(), "locks:t1");
        let b = DistributedMutex::new(store.clone(), "locks:t1");

        assert!(a.acquire(Duration::from_secs(30)).await);
        clock.advance(Duration::from_secs(31));
        assert!(b.acquire(Duration::from_secs(30)).await);

        assert!(!a.release().await);
        let c = DistributedMutex::new(store, "locks:t1");
        assert!(!c.acquire(Duration::from_secs(30)).await);
        assert!(b.release().await);
    }

    #[tokio::test]
    async fn test_store_errors_fail_closed() {
        let store: SharedCoordinator = Arc::new(Unreachable);
        let lock = DistributedMutex::new(store, "locks:t1");
        assert!(!lock.acquire(Duration::from_secs(30)).await);
        assert!(!lock.release().await);
    }
}
