use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{CreateUserRequest, StorageUsage, User, UserRole, UserSummary};
use crate::services::QuotaAccountant;

/// User service
pub struct UserService;

impl UserService {
    /// Provision a user with a quota ceiling
    pub async fn create_user(db: &Database, config: &Config, req: CreateUserRequest) -> Result<User> {
        let email = req.email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(AppError::BadRequest("Invalid email format".to_string()));
        }

        let quota = req.storage_quota.unwrap_or(config.quota.default_quota_bytes);
        if quota < 0 {
            return Err(AppError::BadRequest("Storage quota cannot be negative".to_string()));
        }

        let name = if req.name.trim().is_empty() {
            email.split('@').next().unwrap_or_default().to_string()
        } else {
            req.name.trim().to_string()
        };
        let role = req.role.unwrap_or(UserRole::User);
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query_as(
            r#"
            INSERT INTO users (id, email, name, role, storage_used, dedup_storage_used, storage_quota, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, 0, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&email)
        .bind(&name)
        .bind(role.as_str())
        .bind(quota)
        .bind(&now)
        .bind(&now)
        .fetch_one(db.pool())
        .await;

        match result {
            Ok(user) => {
                let user: User = user;
                tracing::info!("Created user {} ({})", user.id, user.email);
                Ok(user)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(AppError::Conflict("Email already registered".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get user by ID
    pub async fn get_user(db: &Database, user_id: &str) -> Result<User> {
        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        Ok(user)
    }

    /// Everyone except the caller, ordered by email
    pub async fn list_other_users(db: &Database, user_id: &str) -> Result<Vec<UserSummary>> {
        let users = sqlx::query_as("SELECT id, email, name FROM users WHERE id != ? ORDER BY email")
            .bind(user_id)
            .fetch_all(db.pool())
            .await?;
        Ok(users)
    }

    /// Raw usage, deduplicated usage and savings
    pub async fn get_storage_usage(db: &Database, user_id: &str) -> Result<StorageUsage> {
        QuotaAccountant::get_usage(db, user_id).await
    }
}
