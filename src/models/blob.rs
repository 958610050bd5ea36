use serde::Serialize;
use sqlx::FromRow;

/// Physical object stored once per distinct content digest
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Blob {
    pub id: String,
    pub sha256: String,
    pub storage_key: String,
    pub size: i64,
    pub mime_type: Option<String>,
    pub refcount: i64,
    /// User whose quota carries the physical cost of this blob
    pub charged_user_id: String,
    pub created_at: String,
}

/// Parameters for inserting a freshly uploaded blob
#[derive(Debug, Clone)]
pub struct NewBlob {
    pub id: String,
    pub sha256: String,
    pub storage_key: String,
    pub size: i64,
    pub mime_type: Option<String>,
    pub charged_user_id: String,
}

/// Outcome of committing freshly stored content
#[derive(Debug, Clone)]
pub enum Insertion {
    /// Our row went in; the uploader pays for the object
    Created(Blob),
    /// The digest was already catalogued; we took a reference on that row
    /// and our own object is now unreferenced
    Existing(Blob),
}

impl Insertion {
    pub fn blob(&self) -> &Blob {
        match self {
            Insertion::Created(blob) | Insertion::Existing(blob) => blob,
        }
    }
}

/// Outcome of dropping references to a blob
#[derive(Debug, Clone)]
pub enum Decrement {
    /// Other files still point at the blob
    Retained(Blob),
    /// Refcount reached zero; the row is gone and the object should be removed
    Reaped(Blob),
}

/// A blob whose refcount disagrees with the number of files referencing it
#[derive(Debug, Clone, FromRow, Serialize, PartialEq, Eq)]
pub struct RefcountMismatch {
    pub blob_id: String,
    pub refcount: i64,
    pub file_count: i64,
}

/// Service-wide logical vs physical usage
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStorageStats {
    pub file_count: i64,
    pub blob_count: i64,
    pub logical_bytes: i64,
    pub physical_bytes: i64,
    pub savings_bytes: i64,
    pub savings_percentage: f64,
}
