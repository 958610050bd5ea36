use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::storage::BlobStore;

/// In-process object store for tests and throwaway deployments
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Bytes>>,
    deleted: Mutex<Vec<String>>,
    uploads: AtomicUsize,
    deletes: AtomicUsize,
    fail_uploads: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `upload` calls
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Number of successful `delete` calls that removed an object
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .map(|o| o.contains_key(key))
            .unwrap_or(false)
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Make every following `upload` fail without storing anything
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Make every following `delete` fail until switched off again
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    fn lock_objects(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Bytes>>> {
        self.objects
            .lock()
            .map_err(|_| AppError::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, key: &str, data: Bytes, size: u64, _content_type: &str) -> Result<String> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(AppError::Storage(format!("injected upload failure for {}", key)));
        }
        if data.len() as u64 != size {
            return Err(AppError::Storage(format!(
                "Size mismatch for {}: declared {}, got {}",
                key,
                size,
                data.len()
            )));
        }
        self.lock_objects()?.insert(key.to_string(), data);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.lock_objects()?
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Object not found: {}", key)))
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String> {
        if !self.lock_objects()?.contains_key(key) {
            return Err(AppError::NotFound(format!("Object not found: {}", key)));
        }
        Ok(format!(
            "memory://{}?expires_in={}",
            urlencoding::encode(key),
            ttl.as_secs()
        ))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(AppError::Storage(format!("injected delete failure for {}", key)));
        }
        if self.lock_objects()?.remove(key).is_some() {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut deleted) = self.deleted.lock() {
                deleted.push(key.to_string());
            }
        }
        Ok(())
    }

    fn storage_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_uploads_and_deletes() {
        let store = MemoryBlobStore::new();
        store.upload("k1", Bytes::from_static(b"abc"), 3, "text/plain").await.unwrap();
        store.upload("k2", Bytes::from_static(b"def"), 3, "text/plain").await.unwrap();
        assert_eq!(store.upload_count(), 2);
        assert_eq!(store.get("k1").await.unwrap(), Bytes::from_static(b"abc"));

        store.delete("k1").await.unwrap();
        store.delete("k1").await.unwrap();
        assert_eq!(store.delete_count(), 1);
        assert_eq!(store.deleted_keys(), vec!["k1".to_string()]);
        assert!(!store.contains("k1"));
        assert!(store.contains("k2"));
    }

    #[tokio::test]
    async fn test_delete_many_reports_failures() {
        let store = MemoryBlobStore::new();
        store.upload("a", Bytes::from_static(b"1"), 1, "").await.unwrap();
        store.upload("b", Bytes::from_static(b"2"), 1, "").await.unwrap();

        store.set_fail_deletes(true);
        let err = store
            .delete_many(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(ref m) if m.contains("2 of 2")));
        assert_eq!(store.object_count(), 2);

        store.set_fail_deletes(false);
        store.delete_many(&["a".to_string(), "b".to_string()]).await.unwrap();
        assert_eq!(store.object_count(), 0);
    }
}
