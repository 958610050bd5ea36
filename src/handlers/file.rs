use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{multipart::Field, Multipart, Path, State},
    http::{header, StatusCode},
    response::Response,
    Extension, Json,
};
use bytes::Bytes;
use std::time::Duration;

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{
    CurrentUser, FileResponse, FileShare, FileUrlResponse, ShareFileRequest, UpdateFileRequest,
    UploadFile,
};
use crate::services::{ChunkSource, ContentHasher, FileService};
use crate::AppState;

#[async_trait]
impl<'a> ChunkSource for Field<'a> {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.chunk()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read file chunk: {}", e)))
    }
}

/// Get a specific file
/// GET /api/v1/files/:id
pub async fn get_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let file = FileService::get_file(&state.db, &id, &current_user.id).await?;
    Ok(Json(ApiResponse::success(FileResponse::for_user(
        file,
        &current_user.id,
    ))))
}

/// Upload a file
/// POST /api/v1/files/upload
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let mut content = None;
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut folder_id: Option<String> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to process multipart: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                content_type = field.content_type().map(|s| s.to_string());

                // Hash while reading so the body is only walked once
                content = Some(
                    ContentHasher::read_all(&mut field, state.config.storage.max_upload_bytes).await?,
                );
            }
            "folder_id" => {
                let text = field.text().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read folder_id: {}", e))
                })?;
                if !text.trim().is_empty() {
                    folder_id = Some(text.trim().to_string());
                }
            }
            _ => {}
        }
    }

    let content = content.ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;
    let filename = file_name.ok_or_else(|| AppError::BadRequest("No file name provided".to_string()))?;

    let file = FileService::upload_file(
        &state.db,
        state.store.as_ref(),
        &current_user.id,
        UploadFile {
            filename,
            content_type,
            folder_id,
            content,
        },
    )
    .await?;

    Ok(Json(ApiResponse::success(FileResponse::from(file))))
}

/// Download a file
/// GET /api/v1/files/:id/download
pub async fn download_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Response> {
    let (file, data) =
        FileService::download_file(&state.db, state.store.as_ref(), &id, &current_user.id).await?;

    let content_type = file
        .declared_mime
        .unwrap_or_else(|| "application/octet-stream".to_string());

    attachment_response(&file.filename, &content_type, data)
}

/// Get a presigned download URL
/// GET /api/v1/files/:id/url
pub async fn get_file_url(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileUrlResponse>>> {
    let ttl = Duration::from_secs(state.config.storage.presign_ttl_seconds);
    let url = FileService::presigned_url(
        &state.db,
        state.store.as_ref(),
        &id,
        &current_user.id,
        ttl,
    )
    .await?;
    Ok(Json(ApiResponse::success(url)))
}

/// Rename and/or move a file
/// PATCH /api/v1/files/:id
pub async fn update_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<UpdateFileRequest>,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let file = FileService::update_file(&state.db, &id, &current_user.id, req).await?;
    Ok(Json(ApiResponse::success(FileResponse::from(file))))
}

/// Delete a file
/// DELETE /api/v1/files/:id
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    FileService::delete_file(&state.db, state.store.as_ref(), &id, &current_user.id).await?;
    Ok(Json(ApiResponse::<()>::success_message("File deleted")))
}

/// List users a file is shared with
/// GET /api/v1/files/:id/shares
pub async fn list_shares(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<FileShare>>>> {
    let shares = FileService::list_shares(&state.db, &id, &current_user.id).await?;
    Ok(Json(ApiResponse::success(shares)))
}

/// Share a file with another user
/// POST /api/v1/files/:id/shares
pub async fn share_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<ShareFileRequest>,
) -> Result<Json<ApiResponse<()>>> {
    FileService::share_file(&state.db, &id, &current_user.id, &req.user_id).await?;
    Ok(Json(ApiResponse::<()>::success_message("File shared")))
}

/// Revoke a share
/// DELETE /api/v1/files/:id/shares/:user_id
pub async fn unshare_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<()>>> {
    FileService::unshare_file(&state.db, &id, &current_user.id, &user_id).await?;
    Ok(Json(ApiResponse::<()>::success_message("Share removed")))
}

/// Build a download response with a safe Content-Disposition
pub(crate) fn attachment_response(filename: &str, content_type: &str, data: bytes::Bytes) -> Result<Response> {
    let fallback_name = filename.replace(['"', '\\'], "_");
    let encoded_name = urlencoding::encode(filename);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, data.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                fallback_name, encoded_name
            ),
        )
        .body(Body::from(data))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}
