use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{
    ContentItem, CreateFolderRequest, Folder, FolderContents, ListContentsQuery, ReapReport,
    SubtreeBlobShare,
};
use crate::services::FileService;
use crate::storage::BlobStore;

const DEFAULT_LISTING_LIMIT: i64 = 50;
const MAX_LISTING_LIMIT: i64 = 500;

/// Everything one user can see at one level. ?1 user, ?2 folder (NULL for
/// root), ?3 ownership filter. Shared files only appear at the root.
const LISTING_ITEMS: &str = r#"
    WITH items AS (
        SELECT id, 'folder' AS item_type, name AS filename, parent_id AS folder_id,
               NULL AS size, NULL AS content_type, created_at AS uploaded_at,
               1 AS user_owns_file, NULL AS download_count
        FROM folders
        WHERE owner_id = ?1 AND parent_id IS ?2 AND ?3 != 'shared'
        UNION ALL
        SELECT id, 'file', filename, folder_id, size, declared_mime, uploaded_at, 1, download_count
        FROM files
        WHERE owner_id = ?1 AND folder_id IS ?2 AND ?3 != 'shared'
        UNION ALL
        SELECT f.id, 'file', f.filename, NULL, f.size, f.declared_mime, f.uploaded_at, 0, f.download_count
        FROM files f
        JOIN file_shares s ON s.file_id = f.id
        WHERE s.shared_with = ?1 AND ?2 IS NULL AND ?3 != 'owned'
    )
"#;

/// ?4 name pattern, ?5 content type pattern, ?6/?7 upload window, ?8/?9
/// size bounds. File-only filters drop folders.
const LISTING_FILTER: &str = r#"
    WHERE (?4 IS NULL OR filename LIKE ?4 ESCAPE '\')
      AND (?5 IS NULL OR (item_type = 'file' AND content_type LIKE ?5 ESCAPE '\'))
      AND (?6 IS NULL OR uploaded_at >= ?6)
      AND (?7 IS NULL OR uploaded_at <= ?7)
      AND (?8 IS NULL OR (item_type = 'file' AND size >= ?8))
      AND (?9 IS NULL OR (item_type = 'file' AND size <= ?9))
"#;

/// Folder service
pub struct FolderService;

impl FolderService {
    pub async fn create_folder(db: &Database, owner_id: &str, req: CreateFolderRequest) -> Result<Folder> {
        let name = FileService::validate_filename(&req.name)?;
        if let Some(parent_id) = req.parent_id.as_deref() {
            Self::ensure_owned(db, parent_id, owner_id).await?;
        }

        let now = Utc::now().to_rfc3339();
        let folder = sqlx::query_as(
            r#"
            INSERT INTO folders (id, owner_id, parent_id, name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(owner_id)
        .bind(&req.parent_id)
        .bind(&name)
        .bind(&now)
        .bind(&now)
        .fetch_one(db.pool())
        .await?;
        Ok(folder)
    }

    pub async fn get_folder(db: &Database, folder_id: &str, owner_id: &str) -> Result<Folder> {
        Self::ensure_owned(db, folder_id, owner_id).await
    }

    /// Load a folder, failing with `NotFound` or `Forbidden`
    pub async fn ensure_owned(db: &Database, folder_id: &str, owner_id: &str) -> Result<Folder> {
        let folder: Folder = sqlx::query_as("SELECT * FROM folders WHERE id = ?")
            .bind(folder_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Folder not found: {}", folder_id)))?;

        if folder.owner_id != owner_id {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }
        Ok(folder)
    }

    pub async fn rename_folder(db: &Database, folder_id: &str, owner_id: &str, name: &str) -> Result<Folder> {
        Self::ensure_owned(db, folder_id, owner_id).await?;
        let name = FileService::validate_filename(name)?;

        sqlx::query_as("UPDATE folders SET name = ?, updated_at = ? WHERE id = ? AND owner_id = ? RETURNING *")
            .bind(&name)
            .bind(Utc::now().to_rfc3339())
            .bind(folder_id)
            .bind(owner_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Folder not found: {}", folder_id)))
    }

    /// One page of a folder level, or of the root when `folder_id` is
    /// `None`. The root also lists files other users shared with the caller.
    pub async fn list_contents(db: &Database, user_id: &str, query: &ListContentsQuery) -> Result<FolderContents> {
        let folder_id = query.folder_id.as_deref();
        if let Some(id) = folder_id {
            Self::ensure_owned(db, id, user_id).await?;
        }

        let limit = match query.limit {
            None | Some(0) => DEFAULT_LISTING_LIMIT,
            Some(n) if n < 0 => return Err(AppError::BadRequest("limit must not be negative".to_string())),
            Some(n) => n.min(MAX_LISTING_LIMIT),
        };
        let offset = query.offset.unwrap_or(0);
        if offset < 0 {
            return Err(AppError::BadRequest("offset must not be negative".to_string()));
        }
        let uploaded_after = normalize_timestamp(query.uploaded_after.as_deref(), "uploaded_after")?;
        let uploaded_before = normalize_timestamp(query.uploaded_before.as_deref(), "uploaded_before")?;
        let search = non_empty(query.search.as_deref()).map(|s| format!("%{}%", escape_like(s)));
        let content_type = non_empty(query.content_type.as_deref()).map(|s| format!("{}%", escape_like(s)));

        let count_sql = format!("{} SELECT COUNT(*) FROM items {}", LISTING_ITEMS, LISTING_FILTER);
        let total_count: i64 = sqlx::query_scalar(&count_sql)
            .bind(user_id)
            .bind(folder_id)
            .bind(query.ownership.as_str())
            .bind(&search)
            .bind(&content_type)
            .bind(&uploaded_after)
            .bind(&uploaded_before)
            .bind(query.min_size)
            .bind(query.max_size)
            .fetch_one(db.pool())
            .await?;

        let page_sql = format!(
            "{} SELECT * FROM items {} ORDER BY item_type = 'file', {} {}, id LIMIT ?10 OFFSET ?11",
            LISTING_ITEMS,
            LISTING_FILTER,
            query.sort_by.column(),
            query.sort_order.as_sql()
        );
        let items: Vec<ContentItem> = sqlx::query_as(&page_sql)
            .bind(user_id)
            .bind(folder_id)
            .bind(query.ownership.as_str())
            .bind(&search)
            .bind(&content_type)
            .bind(&uploaded_after)
            .bind(&uploaded_before)
            .bind(query.min_size)
            .bind(query.max_size)
            .bind(limit)
            .bind(offset)
            .fetch_all(db.pool())
            .await?;

        Ok(FolderContents {
            folder_id: folder_id.map(str::to_string),
            items,
            total_count,
            limit,
            offset,
        })
    }

    /// Delete a folder subtree and release every blob reference it held.
    ///
    /// The folder and everything under it go in one transaction. Each blob
    /// is then settled in its own transaction; a failing blob is logged and
    /// does not stop the others.
    pub async fn delete_folder(
        db: &Database,
        store: &dyn BlobStore,
        folder_id: &str,
        owner_id: &str,
    ) -> Result<ReapReport> {
        Self::ensure_owned(db, folder_id, owner_id).await?;

        let mut tx = db.pool().begin().await?;
        let touched = sqlx::query("UPDATE folders SET updated_at = ? WHERE id = ? AND owner_id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(folder_id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Folder not found: {}", folder_id)));
        }

        let shares = Self::collect_blob_shares(&mut *tx, folder_id).await?;
        sqlx::query("DELETE FROM folders WHERE id = ?")
            .bind(folder_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut report = ReapReport::default();
        let mut reaped_keys = Vec::new();
        for share in &shares {
            report.blobs_checked += 1;
            match Self::release_share(db, share).await {
                Ok(Some(key)) => {
                    report.blobs_reaped += 1;
                    reaped_keys.push(key);
                }
                Ok(None) => {}
                Err(e) => {
                    report.failures += 1;
                    tracing::error!(
                        "CRITICAL: Failed to release {} reference(s) to blob {} from deleted folder {}: {}",
                        share.file_count,
                        share.blob_id,
                        folder_id,
                        e
                    );
                }
            }
        }

        if !reaped_keys.is_empty() {
            if let Err(e) = store.delete_many(&reaped_keys).await {
                tracing::error!(
                    "CRITICAL: Failed to delete objects of reaped blobs from folder {}: {}",
                    folder_id,
                    e
                );
            }
        }

        tracing::info!(
            "Deleted folder {}: {} blob(s) checked, {} reaped, {} failed",
            folder_id,
            report.blobs_checked,
            report.blobs_reaped,
            report.failures
        );
        Ok(report)
    }

    async fn release_share(db: &Database, share: &SubtreeBlobShare) -> Result<Option<String>> {
        let mut tx = db.pool().begin().await?;
        let key = FileService::release_references(
            &mut *tx,
            &share.blob_id,
            &share.owner_id,
            share.file_count,
            share.total_size,
        )
        .await?;
        tx.commit().await?;
        Ok(key)
    }

    /// Blob references held by files anywhere under `folder_id`, one row per
    /// blob and owner
    pub async fn collect_blob_shares(conn: &mut SqliteConnection, folder_id: &str) -> Result<Vec<SubtreeBlobShare>> {
        let shares = sqlx::query_as(
            r#"
            WITH RECURSIVE subtree(id) AS (
                SELECT id FROM folders WHERE id = ?
                UNION
                SELECT f.id FROM folders f JOIN subtree s ON f.parent_id = s.id
            )
            SELECT blob_id, owner_id, COUNT(*) AS file_count, COALESCE(SUM(size), 0) AS total_size
            FROM files
            WHERE folder_id IN (SELECT id FROM subtree)
            GROUP BY blob_id, owner_id
            ORDER BY blob_id, owner_id
            "#,
        )
        .bind(folder_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(shares)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Timestamps are stored as UTC RFC 3339, so a normalized bound compares
/// correctly as text
fn normalize_timestamp(value: Option<&str>, field: &str) -> Result<Option<String>> {
    let Some(value) = non_empty(value) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(value)
        .map(|t| Some(t.with_timezone(&Utc).to_rfc3339()))
        .map_err(|_| AppError::BadRequest(format!("{} must be an RFC 3339 timestamp", field)))
}
