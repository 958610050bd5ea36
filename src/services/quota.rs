use chrono::Utc;
use sqlx::SqliteConnection;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{StorageUsage, User};

/// Owner of the raw and deduplicated usage counters on each user.
///
/// Counters only move inside the transaction that mutates the files or
/// blobs they describe.
pub struct QuotaAccountant;

impl QuotaAccountant {
    /// Read-only usage snapshot
    pub async fn get_usage(db: &Database, user_id: &str) -> Result<StorageUsage> {
        let user = Self::load_user(db, user_id).await?;
        Ok(Self::usage_of(&user))
    }

    pub fn usage_of(user: &User) -> StorageUsage {
        let savings_bytes = user.storage_used - user.dedup_storage_used;
        let savings_percentage = if user.storage_used > 0 {
            savings_bytes as f64 * 100.0 / user.storage_used as f64
        } else {
            0.0
        };
        StorageUsage {
            storage_used_bytes: user.storage_used,
            deduplicated_usage_bytes: user.dedup_storage_used,
            storage_quota_bytes: user.storage_quota,
            savings_bytes,
            savings_percentage,
        }
    }

    /// Fail early when new content would not fit. Runs before any physical
    /// write; `apply_upload` re-checks the ceiling when it commits.
    pub async fn check_and_reserve(db: &Database, user_id: &str, incoming: i64) -> Result<()> {
        let user = Self::load_user(db, user_id).await?;
        if user.dedup_storage_used + incoming > user.storage_quota {
            return Err(Self::exceeded(&user, incoming));
        }
        Ok(())
    }

    /// Charge an upload. A nonzero `dedup_delta` is re-verified against the
    /// quota in the same statement.
    pub async fn apply_upload(
        conn: &mut SqliteConnection,
        user_id: &str,
        raw_delta: i64,
        dedup_delta: i64,
    ) -> Result<()> {
        Self::check_deltas(user_id, raw_delta, dedup_delta)?;

        let updated: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET storage_used = storage_used + ?1,
                dedup_storage_used = dedup_storage_used + ?2,
                updated_at = ?3
            WHERE id = ?4 AND (?2 = 0 OR dedup_storage_used + ?2 <= storage_quota)
            RETURNING id
            "#,
        )
        .bind(raw_delta)
        .bind(dedup_delta)
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        if updated.is_some() {
            return Ok(());
        }

        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
        match user {
            Some(user) => Err(Self::exceeded(&user, dedup_delta)),
            None => Err(AppError::NotFound(format!("User not found: {}", user_id))),
        }
    }

    /// Release a delete. Going below zero is an accounting bug.
    pub async fn apply_delete(
        conn: &mut SqliteConnection,
        user_id: &str,
        raw_delta: i64,
        dedup_delta: i64,
    ) -> Result<()> {
        Self::check_deltas(user_id, raw_delta, dedup_delta)?;

        let updated: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET storage_used = storage_used - ?1,
                dedup_storage_used = dedup_storage_used - ?2,
                updated_at = ?3
            WHERE id = ?4 AND storage_used >= ?1 AND dedup_storage_used >= ?2
            RETURNING id
            "#,
        )
        .bind(raw_delta)
        .bind(dedup_delta)
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        if updated.is_none() {
            return Err(AppError::invariant(format!(
                "quota counters of user {} would go negative (raw -{}, dedup -{})",
                user_id, raw_delta, dedup_delta
            )));
        }
        Ok(())
    }

    /// Move a blob's physical charge between users without a quota check
    pub async fn transfer_charge(
        conn: &mut SqliteConnection,
        from_user: &str,
        to_user: &str,
        bytes: i64,
    ) -> Result<()> {
        if from_user == to_user || bytes == 0 {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let released = sqlx::query(
            "UPDATE users SET dedup_storage_used = dedup_storage_used - ?1, updated_at = ?2 WHERE id = ?3 AND dedup_storage_used >= ?1",
        )
        .bind(bytes)
        .bind(&now)
        .bind(from_user)
        .execute(&mut *conn)
        .await?;
        if released.rows_affected() == 0 {
            return Err(AppError::invariant(format!(
                "cannot release {} charged bytes from user {}",
                bytes, from_user
            )));
        }

        let charged = sqlx::query(
            "UPDATE users SET dedup_storage_used = dedup_storage_used + ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(bytes)
        .bind(&now)
        .bind(to_user)
        .execute(&mut *conn)
        .await?;
        if charged.rows_affected() == 0 {
            return Err(AppError::invariant(format!(
                "charge transfer target {} does not exist",
                to_user
            )));
        }

        tracing::debug!("Moved {} charged bytes from {} to {}", bytes, from_user, to_user);
        Ok(())
    }

    fn check_deltas(user_id: &str, raw_delta: i64, dedup_delta: i64) -> Result<()> {
        if raw_delta < 0 || dedup_delta < 0 {
            return Err(AppError::invariant(format!(
                "negative quota delta for user {} (raw {}, dedup {})",
                user_id, raw_delta, dedup_delta
            )));
        }
        Ok(())
    }

    fn exceeded(user: &User, incoming: i64) -> AppError {
        AppError::QuotaExceeded(format!(
            "Storage quota exceeded: {} bytes used, {} incoming, quota {}",
            user.dedup_storage_used, incoming, user.storage_quota
        ))
    }

    async fn load_user(db: &Database, user_id: &str) -> Result<User> {
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User not found: {}", user_id)))
    }
}
