use bytes::Bytes;
use chrono::Utc;
use sqlx::SqliteConnection;
use std::time::Duration;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{
    Blob, Decrement, File, FileShare, FileUrlResponse, Insertion, NewBlob, UpdateFileRequest,
    UploadFile,
};
use crate::services::hasher::HashedContent;
use crate::services::{BlobCatalog, FolderService, QuotaAccountant};
use crate::storage::BlobStore;

/// File service: creates and removes the files that reference blobs
pub struct FileService;

impl FileService {
    /// Register an upload, reusing the existing blob for its digest if any
    pub async fn upload_file(
        db: &Database,
        store: &dyn BlobStore,
        owner_id: &str,
        upload: UploadFile,
    ) -> Result<File> {
        let filename = Self::validate_filename(&upload.filename)?;
        if let Some(folder_id) = upload.folder_id.as_deref() {
            FolderService::ensure_owned(db, folder_id, owner_id).await?;
        }

        let mime_type = upload
            .content_type
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| mime_guess::from_path(&filename).first_or_octet_stream().to_string());
        let target = NewFile {
            owner_id,
            folder_id: upload.folder_id.as_deref(),
            filename: &filename,
            mime_type: &mime_type,
        };
        let content = &upload.content;

        if let Some(blob) = BlobCatalog::find_by_digest(db, &content.digest).await? {
            if let Some(file) = Self::register_existing(db, &blob, &target).await? {
                Self::log_registered(&file);
                return Ok(file);
            }
            tracing::debug!("Blob for {} was reaped during upload, storing anew", content.digest);
        }

        let file = Self::register_new(db, store, content, &target).await?;
        Self::log_registered(&file);
        Ok(file)
    }

    fn log_registered(file: &File) {
        tracing::info!(
            "Registered file {} ({} bytes, blob {}) for user {}",
            file.id,
            file.size,
            file.blob_id,
            file.owner_id
        );
    }

    /// Dedup path: no physical write, only a reference and raw usage.
    /// `None` when the blob was reaped since it was looked up.
    async fn register_existing(db: &Database, blob: &Blob, target: &NewFile<'_>) -> Result<Option<File>> {
        let mut tx = db.pool().begin().await?;

        if BlobCatalog::increment_reference(&mut *tx, &blob.id).await?.is_none() {
            return Ok(None);
        }
        QuotaAccountant::apply_upload(&mut *tx, target.owner_id, blob.size, 0).await?;
        let file = Self::insert_file(&mut *tx, target, &blob.id, blob.size).await?;

        tx.commit().await?;
        Ok(Some(file))
    }

    /// New-content path. The object is written before any metadata so a
    /// committed blob row always has its object behind it. If the digest was
    /// catalogued meanwhile the file joins that blob and our object goes.
    async fn register_new(
        db: &Database,
        store: &dyn BlobStore,
        content: &HashedContent,
        target: &NewFile<'_>,
    ) -> Result<File> {
        let size = content.size as i64;
        QuotaAccountant::check_and_reserve(db, target.owner_id, size).await?;

        let blob_id = Uuid::new_v4().to_string();
        let storage_key = Self::storage_key(&content.digest, &blob_id, target.filename);
        store
            .upload(&storage_key, content.bytes.clone(), content.size, target.mime_type)
            .await?;

        let new_blob = NewBlob {
            id: blob_id,
            sha256: content.digest.clone(),
            storage_key,
            size,
            mime_type: Some(target.mime_type.to_string()),
            charged_user_id: target.owner_id.to_string(),
        };

        let (file, inserted) = match Self::commit_new_blob(db, &new_blob, target).await {
            Ok(committed) => committed,
            Err(e) => {
                Self::discard_object(store, &new_blob.storage_key).await;
                return Err(e);
            }
        };

        if let Insertion::Existing(blob) = &inserted {
            tracing::debug!(
                "Digest {} was stored concurrently, file {} joined blob {}",
                content.digest,
                file.id,
                blob.id
            );
            Self::discard_object(store, &new_blob.storage_key).await;
        }
        Ok(file)
    }

    async fn commit_new_blob(
        db: &Database,
        new_blob: &NewBlob,
        target: &NewFile<'_>,
    ) -> Result<(File, Insertion)> {
        let mut tx = db.pool().begin().await?;

        let inserted = BlobCatalog::create_new(&mut *tx, new_blob).await?;
        let (blob_id, size, dedup_delta) = match &inserted {
            Insertion::Created(blob) => (&blob.id, blob.size, blob.size),
            Insertion::Existing(blob) => (&blob.id, blob.size, 0),
        };
        QuotaAccountant::apply_upload(&mut *tx, target.owner_id, size, dedup_delta).await?;
        let file = Self::insert_file(&mut *tx, target, blob_id, size).await?;

        tx.commit().await?;
        Ok((file, inserted))
    }

    /// Best-effort removal of an object nothing references
    async fn discard_object(store: &dyn BlobStore, key: &str) {
        if let Err(e) = store.delete(key).await {
            tracing::warn!("Failed to remove unreferenced object {}: {}", key, e);
        }
    }

    async fn insert_file(
        conn: &mut SqliteConnection,
        target: &NewFile<'_>,
        blob_id: &str,
        size: i64,
    ) -> Result<File> {
        let file = sqlx::query_as(
            r#"
            INSERT INTO files (id, owner_id, blob_id, folder_id, filename, declared_mime, size, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(target.owner_id)
        .bind(blob_id)
        .bind(target.folder_id)
        .bind(target.filename)
        .bind(target.mime_type)
        .bind(size)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&mut *conn)
        .await?;
        Ok(file)
    }

    /// Delete a file. Once the metadata is gone the delete has succeeded;
    /// a failed physical cleanup is only logged.
    pub async fn delete_file(db: &Database, store: &dyn BlobStore, file_id: &str, owner_id: &str) -> Result<()> {
        let file = Self::get_owned_file(db, file_id, owner_id).await?;

        let mut tx = db.pool().begin().await?;
        let deleted = sqlx::query("DELETE FROM files WHERE id = ? AND owner_id = ?")
            .bind(&file.id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("File not found: {}", file_id)));
        }
        let reaped = Self::release_references(&mut *tx, &file.blob_id, owner_id, 1, file.size).await?;
        tx.commit().await?;

        tracing::info!("Deleted file {} for user {}", file.id, owner_id);

        if let Some(key) = reaped {
            if let Err(e) = store.delete(&key).await {
                tracing::error!(
                    "CRITICAL: Failed to delete object {} for reaped blob {}: {}",
                    key,
                    file.blob_id,
                    e
                );
            }
        }
        Ok(())
    }

    /// Drop `count` references held by `owner_id`'s files (already deleted in
    /// this transaction) and settle quota. Returns the storage key when the
    /// blob was reaped.
    pub(crate) async fn release_references(
        conn: &mut SqliteConnection,
        blob_id: &str,
        owner_id: &str,
        count: i64,
        raw_bytes: i64,
    ) -> Result<Option<String>> {
        match BlobCatalog::decrement_reference(&mut *conn, blob_id, count).await? {
            Decrement::Reaped(blob) => {
                if blob.charged_user_id == owner_id {
                    QuotaAccountant::apply_delete(&mut *conn, owner_id, raw_bytes, blob.size).await?;
                } else {
                    QuotaAccountant::apply_delete(&mut *conn, owner_id, raw_bytes, 0).await?;
                    QuotaAccountant::apply_delete(&mut *conn, &blob.charged_user_id, 0, blob.size).await?;
                }
                Ok(Some(blob.storage_key))
            }
            Decrement::Retained(blob) => {
                QuotaAccountant::apply_delete(&mut *conn, owner_id, raw_bytes, 0).await?;
                if blob.charged_user_id == owner_id {
                    if let Some(new_owner) = BlobCatalog::reassign_charge(&mut *conn, blob_id, owner_id).await? {
                        QuotaAccountant::transfer_charge(&mut *conn, owner_id, &new_owner, blob.size).await?;
                    }
                }
                Ok(None)
            }
        }
    }

    /// Get file by ID if the user owns it or holds a share grant
    pub async fn get_file(db: &Database, file_id: &str, user_id: &str) -> Result<File> {
        let file = Self::find_file(db, file_id).await?;
        if file.owner_id == user_id {
            return Ok(file);
        }

        let granted: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM file_shares WHERE file_id = ? AND shared_with = ?")
                .bind(file_id)
                .bind(user_id)
                .fetch_optional(db.pool())
                .await?;
        match granted {
            Some(_) => Ok(file),
            None => Err(AppError::Forbidden("Access denied".to_string())),
        }
    }

    /// Get file by ID, owner only
    pub async fn get_owned_file(db: &Database, file_id: &str, owner_id: &str) -> Result<File> {
        let file = Self::find_file(db, file_id).await?;
        if file.owner_id != owner_id {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }
        Ok(file)
    }

    async fn find_file(db: &Database, file_id: &str) -> Result<File> {
        sqlx::query_as("SELECT * FROM files WHERE id = ?")
            .bind(file_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File not found: {}", file_id)))
    }

    /// Read a file's content and count the download
    pub async fn download_file(
        db: &Database,
        store: &dyn BlobStore,
        file_id: &str,
        user_id: &str,
    ) -> Result<(File, Bytes)> {
        let file = Self::get_file(db, file_id, user_id).await?;
        let blob = BlobCatalog::get(db, &file.blob_id).await?;
        let data = store.get(&blob.storage_key).await?;

        sqlx::query("UPDATE files SET download_count = download_count + 1 WHERE id = ?")
            .bind(&file.id)
            .execute(db.pool())
            .await?;

        Ok((file, data))
    }

    /// Time-limited direct link to a file's object
    pub async fn presigned_url(
        db: &Database,
        store: &dyn BlobStore,
        file_id: &str,
        user_id: &str,
        ttl: Duration,
    ) -> Result<FileUrlResponse> {
        let file = Self::get_file(db, file_id, user_id).await?;
        let blob = BlobCatalog::get(db, &file.blob_id).await?;
        let url = store.presigned_url(&blob.storage_key, ttl).await?;
        Ok(FileUrlResponse {
            url,
            expires_in: ttl.as_secs(),
        })
    }

    /// Rename and/or move a file. The blob reference never changes.
    pub async fn update_file(
        db: &Database,
        file_id: &str,
        owner_id: &str,
        req: UpdateFileRequest,
    ) -> Result<File> {
        let mut file = Self::get_owned_file(db, file_id, owner_id).await?;

        if let Some(name) = req.filename.as_deref() {
            file.filename = Self::validate_filename(name)?;
        }
        if let Some(folder_id) = req.folder_id {
            if let Some(target) = folder_id.as_deref() {
                FolderService::ensure_owned(db, target, owner_id).await?;
            }
            file.folder_id = folder_id;
        }

        let updated = sqlx::query_as("UPDATE files SET filename = ?, folder_id = ? WHERE id = ? AND owner_id = ? RETURNING *")
            .bind(&file.filename)
            .bind(&file.folder_id)
            .bind(&file.id)
            .bind(owner_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File not found: {}", file_id)))?;
        Ok(updated)
    }

    /// Grant another user read access
    pub async fn share_file(db: &Database, file_id: &str, owner_id: &str, target_user_id: &str) -> Result<()> {
        let file = Self::get_owned_file(db, file_id, owner_id).await?;
        if target_user_id == owner_id {
            return Err(AppError::BadRequest("Cannot share a file with yourself".to_string()));
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
            .bind(target_user_id)
            .fetch_optional(db.pool())
            .await?;
        if exists.is_none() {
            return Err(AppError::NotFound(format!("User not found: {}", target_user_id)));
        }

        sqlx::query("INSERT OR IGNORE INTO file_shares (file_id, shared_with, created_at) VALUES (?, ?, ?)")
            .bind(&file.id)
            .bind(target_user_id)
            .bind(Utc::now().to_rfc3339())
            .execute(db.pool())
            .await?;
        Ok(())
    }

    pub async fn unshare_file(db: &Database, file_id: &str, owner_id: &str, target_user_id: &str) -> Result<()> {
        Self::get_owned_file(db, file_id, owner_id).await?;

        let result = sqlx::query("DELETE FROM file_shares WHERE file_id = ? AND shared_with = ?")
            .bind(file_id)
            .bind(target_user_id)
            .execute(db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Share not found".to_string()));
        }
        Ok(())
    }

    pub async fn list_shares(db: &Database, file_id: &str, owner_id: &str) -> Result<Vec<FileShare>> {
        Self::get_owned_file(db, file_id, owner_id).await?;

        let shares = sqlx::query_as(
            r#"
            SELECT u.id AS user_id, u.email, u.name, s.created_at
            FROM file_shares s
            JOIN users u ON u.id = s.shared_with
            WHERE s.file_id = ?
            ORDER BY s.created_at
            "#,
        )
        .bind(file_id)
        .fetch_all(db.pool())
        .await?;
        Ok(shares)
    }

    pub(crate) fn validate_filename(name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() || name == "." || name == ".." {
            return Err(AppError::BadRequest("Invalid filename".to_string()));
        }
        if name.contains('/') || name.contains('\\') || name.contains('\0') {
            return Err(AppError::BadRequest(
                "Filename cannot contain path separators".to_string(),
            ));
        }
        if name.chars().count() > 255 {
            return Err(AppError::BadRequest("Filename too long".to_string()));
        }
        Ok(name.to_string())
    }

    /// `{digest}_{blob id prefix}_{filename}`. The blob id part keeps keys
    /// unique across re-creations of the same digest.
    pub(crate) fn storage_key(digest: &str, blob_id: &str, filename: &str) -> String {
        let mut safe: String = filename
            .chars()
            .take(100)
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
            .collect();
        while safe.contains("..") {
            safe = safe.replace("..", "_.");
        }
        let prefix = blob_id.get(..8).unwrap_or(blob_id);
        format!("{}_{}_{}", digest, prefix, safe)
    }
}

/// Where a registered file lands
struct NewFile<'a> {
    owner_id: &'a str,
    folder_id: Option<&'a str>,
    filename: &'a str,
    mime_type: &'a str,
}
