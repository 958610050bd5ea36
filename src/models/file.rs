use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::services::hasher::HashedContent;

/// File model: a named, per-owner reference to a blob
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct File {
    pub id: String,
    pub owner_id: String,
    pub blob_id: String,
    /// `None` is the owner's root
    pub folder_id: Option<String>,
    pub filename: String,
    pub declared_mime: Option<String>,
    pub size: i64,
    pub uploaded_at: String,
    pub download_count: i64,
}

/// File response with additional info
#[derive(Debug, Clone, Serialize)]
pub struct FileResponse {
    pub id: String,
    pub filename: String,
    pub folder_id: Option<String>,
    pub size: i64,
    pub content_type: Option<String>,
    pub uploaded_at: String,
    pub download_count: i64,
    pub user_owns_file: bool,
    pub item_type: &'static str,
}

impl FileResponse {
    pub fn for_user(file: File, user_id: &str) -> Self {
        Self {
            user_owns_file: file.owner_id == user_id,
            id: file.id,
            filename: file.filename,
            folder_id: file.folder_id,
            size: file.size,
            content_type: file.declared_mime,
            uploaded_at: file.uploaded_at,
            download_count: file.download_count,
            item_type: "file",
        }
    }
}

impl From<File> for FileResponse {
    fn from(file: File) -> Self {
        let owner_id = file.owner_id.clone();
        Self::for_user(file, &owner_id)
    }
}

/// Everything the registrar needs for one upload
#[derive(Debug)]
pub struct UploadFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub folder_id: Option<String>,
    pub content: HashedContent,
}

/// Rename and/or move a file. Moving to root is `folder_id: Some(None)`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateFileRequest {
    pub filename: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub folder_id: Option<Option<String>>,
}

/// Distinguish an absent field from an explicit `null`
fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Presigned download link
#[derive(Debug, Serialize)]
pub struct FileUrlResponse {
    pub url: String,
    pub expires_in: u64,
}

/// Share a file with another user
#[derive(Debug, Deserialize)]
pub struct ShareFileRequest {
    pub user_id: String,
}

/// A user holding a read grant on a file
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FileShare {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub created_at: String,
}
