//! Execution-policy lock service.
//!
//! A lightweight lock keyed on `(task_name, kwargs digest)` gates
//! overlapping executions. The default implementation rides the same TTL
//! store abstraction the token cache uses, so a shared cache can coordinate
//! workers across processes. Lock TTL is set slightly above the expected
//! task duration to bound orphan locks from worker crashes.

use crate::error::WorkerError;
use async_trait::async_trait;
use marketbeat_integration::TtlStore;
use std::sync::Arc;
use tokio::time::Duration;

/// Try/acquire-release lock primitive for overlap control.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Attempts to take the lock. Returns whether this caller now holds it.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, WorkerError>;

    /// Releases the lock.
    async fn release(&self, key: &str) -> Result<(), WorkerError>;
}

/// Lock service over a [`TtlStore`].
pub struct TtlLockService {
    store: Arc<dyn TtlStore>,
}

impl TtlLockService {
    /// Creates a lock service over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn TtlStore>) -> Self {
        Self { store }
    }

    fn store_key(key: &str) -> String {
        format!("lock:{key}")
    }
}

#[async_trait]
impl LockService for TtlLockService {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, WorkerError> {
        self.store
            .put_if_absent(&Self::store_key(key), "held".to_string(), ttl)
            .await
            .map_err(|e| WorkerError::LockService {
                message: e.to_string(),
            })
    }

    async fn release(&self, key: &str) -> Result<(), WorkerError> {
        self.store
            .remove(&Self::store_key(key))
            .await
            .map_err(|e| WorkerError::LockService {
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketbeat_integration::MemoryTtlStore;

    fn service() -> TtlLockService {
        TtlLockService::new(Arc::new(MemoryTtlStore::new()))
    }

    #[tokio::test]
    async fn second_acquire_is_refused_until_release() {
        let locks = service();
        let ttl = Duration::from_secs(60);

        assert!(locks.try_acquire("fetch:abcd", ttl).await.unwrap());
        assert!(!locks.try_acquire("fetch:abcd", ttl).await.unwrap());

        locks.release("fetch:abcd").await.unwrap();
        assert!(locks.try_acquire("fetch:abcd", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let locks = service();
        let ttl = Duration::from_secs(60);

        assert!(locks.try_acquire("fetch:abcd", ttl).await.unwrap());
        assert!(locks.try_acquire("fetch:ef01", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn ttl_expiry_frees_an_orphan_lock() {
        let locks = service();

        assert!(
            locks
                .try_acquire("fetch:abcd", Duration::from_millis(20))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(
            locks
                .try_acquire("fetch:abcd", Duration::from_secs(60))
                .await
                .unwrap()
        );
    }
}
