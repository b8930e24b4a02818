use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::error::DbError;
use crate::models::datetime_to_millis;

const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A held advisory lock. Release it explicitly; the hold timeout is the
/// backstop against a crashed holder, not the normal release path.
#[derive(Debug)]
pub struct AdvisoryLock {
    pub key: String,
    owner: Uuid,
}

/// Named advisory locks over a lock table. Expired rows are stolen on the
/// next acquire attempt, so a crashed process cannot wedge a key forever.
#[derive(Clone)]
pub struct LockRepository {
    pool: SqlitePool,
}

impl LockRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Poll until the key is free or `wait_timeout` elapses. Returns `None`
    /// on timeout, which callers treat as a transient infrastructure error.
    pub async fn try_acquire(
        &self,
        key: &str,
        wait_timeout: Duration,
        hold_timeout: Duration,
    ) -> Result<Option<AdvisoryLock>, DbError> {
        let owner = Uuid::new_v4();
        let deadline = tokio::time::Instant::now() + wait_timeout;

        loop {
            let now = datetime_to_millis(Utc::now());
            let expires_at = now + hold_timeout.as_millis() as i64;

            sqlx::query("DELETE FROM advisory_locks WHERE lock_key = ? AND expires_at <= ?")
                .bind(key)
                .bind(now)
                .execute(&self.pool)
                .await?;

            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO advisory_locks (lock_key, owner, expires_at) \
                 VALUES (?, ?, ?)",
            )
            .bind(key)
            .bind(owner.to_string())
            .bind(expires_at)
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() == 1 {
                return Ok(Some(AdvisoryLock {
                    key: key.to_string(),
                    owner,
                }));
            }

            if tokio::time::Instant::now() + ACQUIRE_POLL_INTERVAL > deadline {
                warn!(lock_key = %key, "Advisory lock acquire timed out");
                return Ok(None);
            }
            tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
        }
    }

    pub async fn release(&self, lock: AdvisoryLock) -> Result<(), DbError> {
        sqlx::query("DELETE FROM advisory_locks WHERE lock_key = ? AND owner = ?")
            .bind(&lock.key)
            .bind(lock.owner.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
