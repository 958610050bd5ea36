use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Folder model. `parent_id == None` places the folder at the owner's root.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Folder {
    pub id: String,
    pub owner_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Create folder request
#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    pub name: String,
    pub parent_id: Option<String>,
}

/// Rename folder request
#[derive(Debug, Deserialize)]
pub struct RenameFolderRequest {
    pub name: String,
}

/// Which files a listing includes, by who owns them
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    #[default]
    All,
    Owned,
    /// Files other users shared with the caller. Only the root lists them.
    Shared,
}

impl Ownership {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ownership::All => "all",
            Ownership::Owned => "owned",
            Ownership::Shared => "shared",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Name,
    Size,
    UploadedAt,
    DownloadCount,
}

impl SortField {
    /// Column of the listing CTE this field sorts on
    pub fn column(&self) -> &'static str {
        match self {
            SortField::Name => "filename COLLATE NOCASE",
            SortField::Size => "size",
            SortField::UploadedAt => "uploaded_at",
            SortField::DownloadCount => "download_count",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Query parameters of a folder listing.
/// GET /api/v1/folders/contents?folder_id=xxx&search=report&sort_by=size&sort_order=desc
#[derive(Debug, Default, Deserialize)]
pub struct ListContentsQuery {
    /// `None` lists the root
    pub folder_id: Option<String>,
    /// Case-insensitive substring of the item name
    pub search: Option<String>,
    /// MIME type or prefix, e.g. `image/`
    pub content_type: Option<String>,
    /// RFC 3339 timestamps, both inclusive
    pub uploaded_after: Option<String>,
    pub uploaded_before: Option<String>,
    #[serde(default)]
    pub ownership: Ownership,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    #[serde(default)]
    pub sort_by: SortField,
    #[serde(default)]
    pub sort_order: SortOrder,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// One row of a listing: a folder or a file
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ContentItem {
    pub id: String,
    /// `folder` or `file`
    pub item_type: String,
    pub filename: String,
    pub folder_id: Option<String>,
    pub size: Option<i64>,
    pub content_type: Option<String>,
    /// Creation time for folders
    pub uploaded_at: String,
    pub user_owns_file: bool,
    pub download_count: Option<i64>,
}

/// One page of a folder listing, folders first
#[derive(Debug, Serialize)]
pub struct FolderContents {
    pub folder_id: Option<String>,
    pub items: Vec<ContentItem>,
    /// Matching items across all pages
    pub total_count: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Per-blob share of a folder subtree that is about to be deleted
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct SubtreeBlobShare {
    pub blob_id: String,
    pub owner_id: String,
    /// Number of files in the subtree pointing at this blob
    pub file_count: i64,
    /// Sum of those files' sizes
    pub total_size: i64,
}

/// What happened to the blobs a folder deletion orphaned
#[derive(Debug, Default, Serialize)]
pub struct ReapReport {
    pub blobs_checked: usize,
    pub blobs_reaped: usize,
    pub failures: usize,
}
