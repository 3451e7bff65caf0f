//! Reconcile Lock
//!
//! Named, leased mutual exclusion across processes. A lease that is never
//! released (crashed holder) stops blocking others once it expires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::error::TransferError;

/// Proof of holding a lock; required to release it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(Uuid);

impl LeaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[async_trait]
pub trait ReconcileLock: Send + Sync {
    /// Acquire `name` for `lease`. Returns None if another live holder has it.
    async fn try_acquire(
        &self,
        name: &str,
        lease: Duration,
    ) -> Result<Option<LeaseId>, TransferError>;

    /// Release a held lease. Releasing an expired or unknown lease is a no-op.
    async fn release(&self, name: &str, lease: LeaseId) -> Result<(), TransferError>;
}

fn lease_expiry(now: DateTime<Utc>, lease: Duration) -> Result<DateTime<Utc>, TransferError> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| TransferError::SystemError(format!("lock lease out of range: {:?}", lease)))
}

/// Postgres lock table (`cash_rail_locks_tb`)
///
/// At most one open row per job name, enforced by a partial unique index.
/// Acquire closes expired open rows, then inserts; a unique violation means
/// the lock is held.
pub struct PgReconcileLock {
    pool: PgPool,
}

impl PgReconcileLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReconcileLock for PgReconcileLock {
    async fn try_acquire(
        &self,
        name: &str,
        lease: Duration,
    ) -> Result<Option<LeaseId>, TransferError> {
        let now = Utc::now();
        let expires_at = lease_expiry(now, lease)?;

        let stale = sqlx::query(
            r#"
            UPDATE cash_rail_locks_tb
            SET completed_at = $1
            WHERE job_name = $2 AND completed_at IS NULL AND expires_at < $1
            "#,
        )
        .bind(now)
        .bind(name)
        .execute(&self.pool)
        .await?;
        if stale.rows_affected() > 0 {
            tracing::warn!(job = name, "Closed expired lock lease");
        }

        let lease_id = LeaseId::new();
        let inserted = sqlx::query(
            r#"
            INSERT INTO cash_rail_locks_tb (lease_id, job_name, locked_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(lease_id.0)
        .bind(name)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(Some(lease_id)),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn release(&self, name: &str, lease: LeaseId) -> Result<(), TransferError> {
        sqlx::query(
            r#"
            UPDATE cash_rail_locks_tb
            SET completed_at = NOW()
            WHERE lease_id = $1 AND job_name = $2 AND completed_at IS NULL
            "#,
        )
        .bind(lease.0)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Held {
    lease: LeaseId,
    expires_at: DateTime<Utc>,
}

/// In-process lock for single-instance deployments and tests
#[derive(Default)]
pub struct MemoryReconcileLock {
    held: DashMap<String, Held>,
}

impl MemoryReconcileLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held
            .get(name)
            .is_some_and(|h| h.expires_at > Utc::now())
    }
}

#[async_trait]
impl ReconcileLock for MemoryReconcileLock {
    async fn try_acquire(
        &self,
        name: &str,
        lease: Duration,
    ) -> Result<Option<LeaseId>, TransferError> {
        use dashmap::mapref::entry::Entry;
        let now = Utc::now();
        let next = Held {
            lease: LeaseId::new(),
            expires_at: lease_expiry(now, lease)?,
        };
        match self.held.entry(name.to_string()) {
            Entry::Occupied(mut slot) => {
                if slot.get().expires_at > now {
                    return Ok(None);
                }
                tracing::warn!(job = name, "Taking over expired lock lease");
                slot.insert(next);
            }
            Entry::Vacant(slot) => {
                slot.insert(next);
            }
        }
        Ok(Some(next.lease))
    }

    async fn release(&self, name: &str, lease: LeaseId) -> Result<(), TransferError> {
        self.held.remove_if(name, |_, h| h.lease == lease);
        Ok(())
    }
}
