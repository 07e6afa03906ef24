use std::sync::Arc;
use std::time::Duration;

use outreach_core::LeaseKey;
use outreach_storage::LeaseStore;
use tracing::warn;

/// Grants the single right to process a `(channel, post)` pair.
#[derive(Clone)]
pub struct IdempotencyGate {
    leases: Arc<dyn LeaseStore>,
    ttl: Duration,
}

impl IdempotencyGate {
    pub fn new(leases: Arc<dyn LeaseStore>, ttl: Duration) -> Self {
        Self { leases, ttl }
    }

    /// `true` only for the caller that created the lease. Fails open when the
    /// lease store cannot be reached.
    pub async fn try_admit(&self, key: LeaseKey) -> bool {
        match self.leases.try_acquire(key, self.ttl).await {
            Ok(granted) => granted,
            Err(err) => {
                warn!(%key, error = %err, "lease store unavailable, admitting post without a lease");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use outreach_storage::{MemoryLeaseStore, StoreError};

    const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

    struct UnreachableLeases;

    #[async_trait]
    impl LeaseStore for UnreachableLeases {
        async fn try_acquire(&self, _key: LeaseKey, _ttl: Duration) -> Result<bool, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    fn key() -> LeaseKey {
        LeaseKey {
            channel_id: -1001234567890,
            post_id: 104,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn admits_once_per_window() {
        let gate = IdempotencyGate::new(Arc::new(MemoryLeaseStore::new()), WEEK);
        assert!(gate.try_admit(key()).await);
        assert!(!gate.try_admit(key()).await);

        tokio::time::advance(WEEK + Duration::from_secs(1)).await;
        assert!(gate.try_admit(key()).await);
    }

    #[tokio::test]
    async fn unavailable_store_fails_open() {
        let gate = IdempotencyGate::new(Arc::new(UnreachableLeases), WEEK);
        assert!(gate.try_admit(key()).await);
        assert!(gate.try_admit(key()).await);
    }
}
