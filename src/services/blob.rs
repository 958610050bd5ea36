use chrono::Utc;
use sqlx::SqliteConnection;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{Blob, Decrement, GlobalStorageStats, Insertion, NewBlob, RefcountMismatch};

/// Digest -> blob mapping and the refcount lifecycle of each blob.
///
/// Functions taking a `SqliteConnection` run inside the caller's transaction;
/// the refcount changes they make are only visible once that commits.
pub struct BlobCatalog;

impl BlobCatalog {
    /// Look up a blob by content digest
    pub async fn find_by_digest(db: &Database, digest: &str) -> Result<Option<Blob>> {
        let blob = sqlx::query_as("SELECT * FROM blobs WHERE sha256 = ?")
            .bind(digest)
            .fetch_optional(db.pool())
            .await?;
        Ok(blob)
    }

    pub async fn get(db: &Database, blob_id: &str) -> Result<Blob> {
        sqlx::query_as("SELECT * FROM blobs WHERE id = ?")
            .bind(blob_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Blob not found: {}", blob_id)))
    }

    /// Insert a blob with its first reference already counted.
    ///
    /// When the digest is already catalogued the existing row takes the
    /// reference instead and comes back as `Insertion::Existing`. Zero-refcount
    /// rows never outlive their transaction, so this cannot revive a reaped blob.
    pub async fn create_new(conn: &mut SqliteConnection, new: &NewBlob) -> Result<Insertion> {
        let blob: Blob = sqlx::query_as(
            r#"
            INSERT INTO blobs (id, sha256, storage_key, size, mime_type, refcount, charged_user_id, created_at)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(sha256) DO UPDATE SET refcount = refcount + 1
            RETURNING *
            "#,
        )
        .bind(&new.id)
        .bind(&new.sha256)
        .bind(&new.storage_key)
        .bind(new.size)
        .bind(&new.mime_type)
        .bind(&new.charged_user_id)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&mut *conn)
        .await?;

        if blob.id == new.id {
            Ok(Insertion::Created(blob))
        } else {
            if blob.size != new.size {
                return Err(AppError::invariant(format!(
                    "blob {} for digest {} has size {}, new content has {}",
                    blob.id, new.sha256, blob.size, new.size
                )));
            }
            Ok(Insertion::Existing(blob))
        }
    }

    /// Add one reference. `None` means the blob is gone (or being reaped)
    /// and the caller has to treat its digest as unseen.
    pub async fn increment_reference(conn: &mut SqliteConnection, blob_id: &str) -> Result<Option<i64>> {
        let refcount = sqlx::query_scalar(
            "UPDATE blobs SET refcount = refcount + 1 WHERE id = ? AND refcount > 0 RETURNING refcount",
        )
        .bind(blob_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(refcount)
    }

    /// Drop `by` references in one step. Reaching zero deletes the row in
    /// the same transaction and hands back the blob so its object can go.
    pub async fn decrement_reference(
        conn: &mut SqliteConnection,
        blob_id: &str,
        by: i64,
    ) -> Result<Decrement> {
        if by <= 0 {
            return Err(AppError::invariant(format!(
                "refcount decrement of {} on blob {}",
                by, blob_id
            )));
        }

        let updated: Option<Blob> = sqlx::query_as(
            "UPDATE blobs SET refcount = refcount - ?1 WHERE id = ?2 AND refcount >= ?1 RETURNING *",
        )
        .bind(by)
        .bind(blob_id)
        .fetch_optional(&mut *conn)
        .await?;

        let blob = match updated {
            Some(blob) => blob,
            None => {
                let current: Option<i64> = sqlx::query_scalar("SELECT refcount FROM blobs WHERE id = ?")
                    .bind(blob_id)
                    .fetch_optional(&mut *conn)
                    .await?;
                return Err(match current {
                    None => AppError::NotFound(format!("Blob not found: {}", blob_id)),
                    Some(refcount) => AppError::invariant(format!(
                        "refcount of blob {} would go negative ({} - {})",
                        blob_id, refcount, by
                    )),
                });
            }
        };

        if blob.refcount > 0 {
            return Ok(Decrement::Retained(blob));
        }

        sqlx::query("DELETE FROM blobs WHERE id = ? AND refcount = 0")
            .bind(blob_id)
            .execute(&mut *conn)
            .await?;

        tracing::debug!("Blob {} reached zero references", blob_id);
        Ok(Decrement::Reaped(blob))
    }

    /// Move the charge for a surviving blob away from `from_user` once that
    /// user no longer references it. The oldest remaining file's owner takes
    /// it over. Returns the new charged user when a transfer happened.
    pub async fn reassign_charge(
        conn: &mut SqliteConnection,
        blob_id: &str,
        from_user: &str,
    ) -> Result<Option<String>> {
        let new_owner = sqlx::query_scalar(
            r#"
            UPDATE blobs
            SET charged_user_id = (
                SELECT owner_id FROM files WHERE blob_id = ?1
                ORDER BY uploaded_at, id LIMIT 1
            )
            WHERE id = ?1
              AND charged_user_id = ?2
              AND NOT EXISTS (SELECT 1 FROM files WHERE blob_id = ?1 AND owner_id = ?2)
              AND EXISTS (SELECT 1 FROM files WHERE blob_id = ?1)
            RETURNING charged_user_id
            "#,
        )
        .bind(blob_id)
        .bind(from_user)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(new_owner)
    }

    /// Every blob whose refcount disagrees with the files pointing at it.
    /// Empty on a healthy catalog.
    pub async fn verify_refcounts(db: &Database) -> Result<Vec<RefcountMismatch>> {
        let mismatches = sqlx::query_as(
            r#"
            SELECT b.id AS blob_id, b.refcount AS refcount, COUNT(f.id) AS file_count
            FROM blobs b
            LEFT JOIN files f ON f.blob_id = b.id
            GROUP BY b.id, b.refcount
            HAVING b.refcount != COUNT(f.id)
            ORDER BY b.id
            "#,
        )
        .fetch_all(db.pool())
        .await?;
        Ok(mismatches)
    }

    /// Logical bytes over all files against physical bytes over all blobs
    pub async fn global_stats(db: &Database) -> Result<GlobalStorageStats> {
        let (file_count, logical_bytes): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size), 0) FROM files")
                .fetch_one(db.pool())
                .await?;
        let (blob_count, physical_bytes): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size), 0) FROM blobs")
                .fetch_one(db.pool())
                .await?;

        let savings_bytes = logical_bytes - physical_bytes;
        let savings_percentage = if logical_bytes > 0 {
            savings_bytes as f64 * 100.0 / logical_bytes as f64
        } else {
            0.0
        };

        Ok(GlobalStorageStats {
            file_count,
            blob_count,
            logical_bytes,
            physical_bytes,
            savings_bytes,
            savings_percentage,
        })
    }
}
