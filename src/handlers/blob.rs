use axum::{
    extract::{Path, Query, State},
    response::Response,
};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::handlers::file::attachment_response;
use crate::storage::UrlSigner;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

/// Serve an object through a presigned link
/// GET /api/v1/blobs/:key?expires=..&signature=..
pub async fn download_signed(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response> {
    let signer = UrlSigner::new(state.config.storage.presign_secret.clone());
    if !signer.verify(&key, query.expires, &query.signature) {
        return Err(AppError::Forbidden("Invalid or expired link".to_string()));
    }

    let mime_type: Option<String> =
        sqlx::query_scalar("SELECT mime_type FROM blobs WHERE storage_key = ?")
            .bind(&key)
            .fetch_optional(state.db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Object not found".to_string()))?;

    let data = state.store.get(&key).await?;
    // Keys are `{digest}_{blob id prefix}_{filename}`
    let filename = key.splitn(3, '_').nth(2).unwrap_or(&key);
    let content_type = mime_type.unwrap_or_else(|| "application/octet-stream".to_string());
    attachment_response(filename, &content_type, data)
}
