//! Leased record claims.
//!
//! A claim gives one holder exclusive use of a record key across every
//! process sharing the database. Claims are taken, checked and released with
//! single statements, so holding one keeps no transaction (and no SQLite
//! writer lock) open. A holder that never releases loses the claim once its
//! lease expires.

use std::time::Duration;

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use super::format_timestamp;
use crate::types::{DatabaseError, DatabaseResult};

#[derive(Clone)]
pub struct ClaimRepository {
    pool: SqlitePool,
}

impl ClaimRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Take `key` for `holder` for `lease`.
    ///
    /// Returns `false` while another holder has an unexpired claim on the key;
    /// an expired claim is taken over.
    pub async fn try_claim(&self, key: &str, holder: &str, lease: Duration) -> DatabaseResult<bool> {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(lease)
            .ok()
            .and_then(|lease| now.checked_add_signed(lease))
            .ok_or_else(|| DatabaseError::QueryError(format!("claim lease {lease:?} is out of range")))?;

        let result = sqlx::query(
            "INSERT INTO record_claims (claim_key, holder, expires_at) VALUES (?, ?, ?) \
             ON CONFLICT (claim_key) DO UPDATE SET holder = excluded.holder, \
             expires_at = excluded.expires_at WHERE record_claims.expires_at <= ?",
        )
        .bind(key)
        .bind(holder)
        .bind(format_timestamp(expires_at))
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Whether `holder` still owns `key`, read inside the caller's transaction.
    pub async fn holds_in(
        &self,
        conn: &mut SqliteConnection,
        key: &str,
        holder: &str,
    ) -> DatabaseResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM record_claims WHERE claim_key = ? AND holder = ?",
        )
        .bind(key)
        .bind(holder)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count > 0)
    }

    /// Drop the claim if `holder` still owns it.
    pub async fn release(&self, key: &str, holder: &str) -> DatabaseResult<()> {
        sqlx::query("DELETE FROM record_claims WHERE claim_key = ? AND holder = ?")
            .bind(key)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
