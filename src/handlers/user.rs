use axum::{extract::State, Extension, Json};

use crate::error::{ApiResponse, Result};
use crate::models::{CurrentUser, StorageUsage, UserSummary};
use crate::services::UserService;
use crate::AppState;

/// Get storage usage
/// GET /api/v1/user/storage
pub async fn get_storage_usage(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<StorageUsage>>> {
    let usage = UserService::get_storage_usage(&state.db, &current_user.id).await?;
    Ok(Json(ApiResponse::success(usage)))
}

/// Other users, for choosing whom to share with
/// GET /api/v1/users
pub async fn list_other_users(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<Vec<UserSummary>>>> {
    let users = UserService::list_other_users(&state.db, &current_user.id).await?;
    Ok(Json(ApiResponse::success(users)))
}
