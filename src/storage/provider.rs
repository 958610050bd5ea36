use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Durable key -> bytes object storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`, returning the key it was stored under
    async fn upload(&self, key: &str, data: Bytes, size: u64, content_type: &str) -> Result<String>;

    /// Read an object back. Missing objects are `NotFound`.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Time-limited URL that downloads the object without a bearer token
    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Remove an object. Removing a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove several objects. Every key is attempted; failures are
    /// collected into a single error naming the keys left behind.
    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        let mut failed = Vec::new();
        for key in keys {
            if let Err(e) = self.delete(key).await {
                tracing::warn!("Failed to delete object {}: {}", key, e);
                failed.push(key.as_str());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(AppError::Storage(format!(
                "failed to delete {} of {} objects: {}",
                failed.len(),
                keys.len(),
                failed.join(", ")
            )))
        }
    }

    /// Get the storage type name
    fn storage_type(&self) -> &'static str;
}
