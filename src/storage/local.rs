use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::BlobStore;

type HmacSha256 = Hmac<Sha256>;

/// Signs and checks expiring download links for locally stored objects
#[derive(Clone)]
pub struct UrlSigner {
    secret: String,
}

impl UrlSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    /// Hex signature over `key` and the unix expiry
    pub fn sign(&self, key: &str, expires: i64) -> String {
        hex::encode(self.mac(key, expires).finalize().into_bytes())
    }

    /// Check a signature and that the link has not expired
    pub fn verify(&self, key: &str, expires: i64, signature: &str) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        let Ok(raw) = hex::decode(signature) else {
            return false;
        };
        self.mac(key, expires).verify_slice(&raw).is_ok()
    }
}

/// Local file system object store
pub struct LocalBlobStore {
    base_path: PathBuf,
    public_url: String,
    signer: UrlSigner,
}

impl LocalBlobStore {
    pub fn new(base_path: impl Into<PathBuf>, public_url: &str, signer: UrlSigner) -> Self {
        Self {
            base_path: base_path.into(),
            public_url: public_url.trim_end_matches('/').to_string(),
            signer,
        }
    }

    /// Objects are spread over two-character prefix directories
    fn get_full_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(AppError::BadRequest(format!("Invalid storage key: {}", key)));
        }
        let prefix = key.get(..2).unwrap_or(key);
        Ok(self.base_path.join(prefix).join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, key: &str, data: Bytes, size: u64, _content_type: &str) -> Result<String> {
        if data.len() as u64 != size {
            return Err(AppError::Storage(format!(
                "Size mismatch for {}: declared {}, got {}",
                key,
                size,
                data.len()
            )));
        }

        let full_path = self.get_full_path(key)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a temp name and rename so readers never see a partial object
        let tmp_path = full_path.with_file_name(format!("{}.partial", key));
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        file.sync_all().await?;
        fs::rename(&tmp_path, &full_path).await?;

        tracing::debug!("Saved object to {:?}", full_path);
        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let full_path = self.get_full_path(key)?;

        let data = fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("Object not found: {}", key))
            } else {
                AppError::Storage(format!("Failed to read object: {}", e))
            }
        })?;

        Ok(Bytes::from(data))
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String> {
        // Reject keys we could never serve
        self.get_full_path(key)?;

        let expires = Utc::now().timestamp() + ttl.as_secs().max(1) as i64;
        let signature = self.signer.sign(key, expires);
        Ok(format!(
            "{}/api/v1/blobs/{}?expires={}&signature={}",
            self.public_url,
            urlencoding::encode(key),
            expires,
            signature
        ))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.get_full_path(key)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => {
                tracing::debug!("Deleted object {:?}", full_path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AppError::Storage(format!("Failed to delete {}: {}", key, e)));
            }
        }

        // Drop the prefix directory once it is empty
        if let Some(dir) = full_path.parent() {
            if dir != self.base_path {
                if let Ok(mut entries) = fs::read_dir(dir).await {
                    if let Ok(None) = entries.next_entry().await {
                        let _ = fs::remove_dir(dir).await;
                    }
                }
            }
        }

        Ok(())
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(dir: &std::path::Path) -> LocalBlobStore {
        LocalBlobStore::new(dir, "http://localhost:1309/", UrlSigner::new("secret"))
    }

    #[tokio::test]
    async fn test_upload_get_delete() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        let key = store
            .upload("abcdef_1234_a.txt", Bytes::from_static(b"hello"), 5, "text/plain")
            .await
            .unwrap();
        assert_eq!(key, "abcdef_1234_a.txt");
        assert!(dir.path().join("ab").join("abcdef_1234_a.txt").exists());
        assert_eq!(store.get(&key).await.unwrap(), Bytes::from_static(b"hello"));

        store.delete(&key).await.unwrap();
        assert!(matches!(store.get(&key).await, Err(AppError::NotFound(_))));
        assert!(!dir.path().join("ab").exists());

        // Deleting again is not an error
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        for key in ["../etc/passwd", "a/b", "", "..\\x"] {
            let result = store.upload(key, Bytes::from_static(b"x"), 1, "text/plain").await;
            assert!(matches!(result, Err(AppError::BadRequest(_))), "key {:?}", key);
        }
    }

    #[tokio::test]
    async fn test_size_mismatch_is_storage_error() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let result = store
            .upload("abc", Bytes::from_static(b"hello"), 4, "text/plain")
            .await;
        assert!(matches!(result, Err(AppError::Storage(_))));
    }

    #[tokio::test]
    async fn test_presigned_url_verifies() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        let url = store
            .presigned_url("abc_1_report.pdf", Duration::from_secs(900))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:1309/api/v1/blobs/abc_1_report.pdf?expires="));

        let query = url.split_once('?').unwrap().1;
        let mut expires = 0i64;
        let mut signature = String::new();
        for pair in query.split('&') {
            match pair.split_once('=').unwrap() {
                ("expires", v) => expires = v.parse().unwrap(),
                ("signature", v) => signature = v.to_string(),
                _ => {}
            }
        }

        let signer = UrlSigner::new("secret");
        assert!(signer.verify("abc_1_report.pdf", expires, &signature));
        assert!(!signer.verify("abc_2_report.pdf", expires, &signature));
        assert!(!UrlSigner::new("other").verify("abc_1_report.pdf", expires, &signature));
    }

    #[test]
    fn test_expired_signature_rejected() {
        let signer = UrlSigner::new("secret");
        let expired = Utc::now().timestamp() - 10;
        let signature = signer.sign("key", expired);
        assert!(!signer.verify("key", expired, &signature));
        assert!(!signer.verify("key", expired + 3600, "not-hex"));
    }
}
