use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use outreach_core::LeaseKey;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::StoreError;

/// Atomic "set if absent" with expiry, keyed by `(channel_id, post_id)`.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Returns `true` only to the caller that created (or revived an expired) marker.
    async fn try_acquire(&self, key: LeaseKey, ttl: Duration) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgLeaseStore {
    pool: PgPool,
}

impl PgLeaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseStore for PgLeaseStore {
    async fn try_acquire(&self, key: LeaseKey, ttl: Duration) -> Result<bool, StoreError> {
        // The conditional upsert only touches rows whose lease already expired,
        // so RETURNING yields a row exactly when this caller owns the lease.
        let row = sqlx::query(
            r#"
            INSERT INTO processing_leases (channel_id, post_id, acquired_at, expires_at)
            VALUES ($1, $2, NOW(), NOW() + make_interval(secs => $3::double precision))
            ON CONFLICT (channel_id, post_id) DO UPDATE
               SET acquired_at = EXCLUDED.acquired_at,
                   expires_at = EXCLUDED.expires_at
             WHERE processing_leases.expires_at <= NOW()
            RETURNING post_id
            "#,
        )
        .bind(key.channel_id)
        .bind(key.post_id)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}

/// Process-local lease map. Deadlines use tokio's clock so tests can pause time.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<HashMap<LeaseKey, Instant>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.leases.lock().await.len()
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(100 * 365 * 24 * 60 * 60)
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn try_acquire(&self, key: LeaseKey, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut leases = self.leases.lock().await;
        match leases.get(&key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                // A deadline past the clock's range is held until the process ends.
                leases.insert(key, now.checked_add(ttl).unwrap_or_else(far_future));
                Ok(true)
            }
        }
    }
}
