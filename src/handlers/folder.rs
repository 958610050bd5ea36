use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};

use crate::error::{ApiResponse, Result};
use crate::models::{
    CreateFolderRequest, CurrentUser, Folder, FolderContents, ListContentsQuery,
    RenameFolderRequest,
};
use crate::services::FolderService;
use crate::AppState;

/// List one folder level, or the root plus files shared with the caller
/// GET /api/v1/folders/contents?folder_id=xxx
pub async fn list_contents(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Query(query): Query<ListContentsQuery>,
) -> Result<Json<ApiResponse<FolderContents>>> {
    let contents = FolderService::list_contents(&state.db, &current_user.id, &query).await?;
    Ok(Json(ApiResponse::success(contents)))
}

/// Create a folder
/// POST /api/v1/folders
pub async fn create_folder(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateFolderRequest>,
) -> Result<Json<ApiResponse<Folder>>> {
    let folder = FolderService::create_folder(&state.db, &current_user.id, req).await?;
    Ok(Json(ApiResponse::success(folder)))
}

/// GET /api/v1/folders/:id
pub async fn get_folder(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Folder>>> {
    let folder = FolderService::get_folder(&state.db, &id, &current_user.id).await?;
    Ok(Json(ApiResponse::success(folder)))
}

/// PATCH /api/v1/folders/:id
pub async fn rename_folder(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<RenameFolderRequest>,
) -> Result<Json<ApiResponse<Folder>>> {
    let folder = FolderService::rename_folder(&state.db, &id, &current_user.id, &req.name).await?;
    Ok(Json(ApiResponse::success(folder)))
}

/// Delete a folder and everything under it
/// DELETE /api/v1/folders/:id
pub async fn delete_folder(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    FolderService::delete_folder(&state.db, state.store.as_ref(), &id, &current_user.id).await?;
    Ok(Json(ApiResponse::<()>::success_message("Folder deleted")))
}
