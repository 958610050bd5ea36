use axum::{extract::State, Extension, Json};

use crate::error::{ApiResponse, Result};
use crate::middleware::auth::require_admin;
use crate::models::{CreateUserRequest, CurrentUser, GlobalStorageStats, RefcountMismatch, User};
use crate::services::{BlobCatalog, UserService};
use crate::AppState;

/// Provision a user
/// POST /api/v1/admin/users
pub async fn create_user(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<ApiResponse<User>>> {
    require_admin(&current_user)?;
    let user = UserService::create_user(&state.db, &state.config, req).await?;
    Ok(Json(ApiResponse::success(user)))
}

/// Logical vs physical storage across all users
/// GET /api/v1/admin/storage
pub async fn storage_stats(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<GlobalStorageStats>>> {
    require_admin(&current_user)?;
    let stats = BlobCatalog::global_stats(&state.db).await?;
    Ok(Json(ApiResponse::success(stats)))
}

/// Blobs whose refcount drifted from their file count
/// GET /api/v1/admin/blobs/audit
pub async fn audit_refcounts(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<Vec<RefcountMismatch>>>> {
    require_admin(&current_user)?;
    let mismatches = BlobCatalog::verify_refcounts(&state.db).await?;
    if !mismatches.is_empty() {
        tracing::error!("CRITICAL: {} blob(s) with refcount drift", mismatches.len());
    }
    Ok(Json(ApiResponse::success(mismatches)))
}
