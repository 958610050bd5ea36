//! Test environment helpers

use std::sync::Arc;
use tempfile::TempDir;

use crate::config::{Config, DatabaseConfig, StorageBackend};
use crate::db::Database;
use crate::error::Result;
use crate::models::{Blob, CreateUserRequest, File, UploadFile, User, UserRole};
use crate::services::{AuthService, BlobCatalog, FileService, HashedContent, UserService};
use crate::storage::{BlobStore, MemoryBlobStore};
use crate::AppState;

pub const TEST_JWT_SECRET: &str = "test-secret";

/// Temp-dir SQLite database plus an in-memory object store
pub struct TestEnv {
    pub config: Arc<Config>,
    pub db: Database,
    pub store: Arc<MemoryBlobStore>,
    _temp_dir: TempDir, // keeps the database alive
}

impl TestEnv {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let mut config = Config {
            database: DatabaseConfig {
                path: db_path.to_string_lossy().to_string(),
                max_connections: 8,
                busy_timeout_ms: 10_000,
            },
            ..Config::default()
        };
        config.storage.backend = StorageBackend::Memory;
        config.storage.max_upload_bytes = 1024 * 1024;
        config.jwt.secret = TEST_JWT_SECRET.to_string();

        let db = Database::new(&config.database).await.unwrap();
        db.run_migrations().await.unwrap();

        Self {
            config: Arc::new(config),
            db,
            store: Arc::new(MemoryBlobStore::new()),
            _temp_dir: temp_dir,
        }
    }

    pub fn blob_store(&self) -> Arc<dyn BlobStore> {
        self.store.clone()
    }

    pub fn state(&self) -> AppState {
        AppState {
            db: self.db.clone(),
            config: self.config.clone(),
            store: self.blob_store(),
        }
    }

    pub async fn create_user(&self, email: &str, quota: i64) -> User {
        self.create_user_with_role(email, quota, UserRole::User).await
    }

    pub async fn create_admin(&self, email: &str) -> User {
        self.create_user_with_role(email, 1 << 30, UserRole::Admin).await
    }

    async fn create_user_with_role(&self, email: &str, quota: i64, role: UserRole) -> User {
        UserService::create_user(
            &self.db,
            &self.config,
            CreateUserRequest {
                email: email.to_string(),
                name: String::new(),
                role: Some(role),
                storage_quota: Some(quota),
            },
        )
        .await
        .unwrap()
    }

    pub fn token_for(&self, user: &User) -> String {
        AuthService::issue_token(&user.id, &user.role, TEST_JWT_SECRET, 3600)
    }

    pub async fn upload(&self, owner_id: &str, filename: &str, data: &[u8]) -> Result<File> {
        self.upload_to(owner_id, None, filename, data).await
    }

    pub async fn upload_to(
        &self,
        owner_id: &str,
        folder_id: Option<&str>,
        filename: &str,
        data: &[u8],
    ) -> Result<File> {
        FileService::upload_file(
            &self.db,
            self.store.as_ref(),
            owner_id,
            UploadFile {
                filename: filename.to_string(),
                content_type: None,
                folder_id: folder_id.map(str::to_string),
                content: HashedContent::from_bytes(data.to_vec()),
            },
        )
        .await
    }

    pub async fn user(&self, user_id: &str) -> User {
        UserService::get_user(&self.db, user_id).await.unwrap()
    }

    pub async fn blob(&self, blob_id: &str) -> Option<Blob> {
        sqlx::query_as("SELECT * FROM blobs WHERE id = ?")
            .bind(blob_id)
            .fetch_optional(self.db.pool())
            .await
            .unwrap()
    }

    pub async fn blob_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM blobs")
            .fetch_one(self.db.pool())
            .await
            .unwrap()
    }

    pub async fn file_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(self.db.pool())
            .await
            .unwrap()
    }

    /// Refcounts match file counts, and every user's counters agree with
    /// the files and charged blobs they hold
    pub async fn assert_consistent(&self) {
        let mismatches = BlobCatalog::verify_refcounts(&self.db).await.unwrap();
        assert!(mismatches.is_empty(), "refcount drift: {:?}", mismatches);

        let users: Vec<User> = sqlx::query_as("SELECT * FROM users")
            .fetch_all(self.db.pool())
            .await
            .unwrap();
        for user in users {
            let raw: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM files WHERE owner_id = ?")
                .bind(&user.id)
                .fetch_one(self.db.pool())
                .await
                .unwrap();
            let charged: i64 =
                sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM blobs WHERE charged_user_id = ?")
                    .bind(&user.id)
                    .fetch_one(self.db.pool())
                    .await
                    .unwrap();
            assert_eq!(user.storage_used, raw, "raw usage of {}", user.email);
            assert_eq!(user.dedup_storage_used, charged, "dedup usage of {}", user.email);
            assert!(
                user.dedup_storage_used <= user.storage_used,
                "dedup exceeds raw for {}",
                user.email
            );
        }
    }
}
