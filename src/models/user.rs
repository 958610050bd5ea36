use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::User => "user",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "admin" => UserRole::Admin,
            _ => UserRole::User,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

/// User model, including the two quota counters
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    /// Sum of file sizes, as if nothing were deduplicated
    pub storage_used: i64,
    /// Sum of blob sizes charged to this user
    pub dedup_storage_used: i64,
    pub storage_quota: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn get_role(&self) -> UserRole {
        UserRole::from_str(&self.role)
    }
}

/// Public view of another user, for picking share targets
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub name: String,
}

/// Create user request (admin)
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Option<UserRole>,
    pub storage_quota: Option<i64>,
}

/// Storage usage response
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StorageUsage {
    pub storage_used_bytes: i64,
    pub deduplicated_usage_bytes: i64,
    pub storage_quota_bytes: i64,
    pub savings_bytes: i64,
    pub savings_percentage: f64,
}

/// Current authenticated user (extracted from JWT)
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub role: UserRole,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// JWT Claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub role: String,
    pub exp: usize,
    pub iat: usize,
}
