mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod storage;
#[cfg(test)]
mod test_utils;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::storage::BlobStore;

/// Room for multipart framing on top of the file itself
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub store: Arc<dyn BlobStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blobvault=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting BlobVault...");

    // Load configuration
    let config = Config::load()?;
    let config = Arc::new(config);
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Database::new(&config.database).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    let store = storage::build_blob_store(&config);

    let state = AppState {
        db,
        config: config.clone(),
        store,
    };

    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_limit = usize::try_from(state.config.storage.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    // Public routes (no auth required)
    let public_routes = Router::new().route("/blobs/:key", get(handlers::blob::download_signed));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        // User
        .route("/user/storage", get(handlers::user::get_storage_usage))
        .route("/users", get(handlers::user::list_other_users))
        // Folders
        .route("/folders", post(handlers::folder::create_folder))
        .route("/folders/contents", get(handlers::folder::list_contents))
        .route(
            "/folders/:id",
            get(handlers::folder::get_folder)
                .patch(handlers::folder::rename_folder)
                .delete(handlers::folder::delete_folder),
        )
        // Files
        .route(
            "/files/upload",
            post(handlers::file::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/files/:id",
            get(handlers::file::get_file)
                .patch(handlers::file::update_file)
                .delete(handlers::file::delete_file),
        )
        .route("/files/:id/download", get(handlers::file::download_file))
        .route("/files/:id/url", get(handlers::file::get_file_url))
        .route(
            "/files/:id/shares",
            get(handlers::file::list_shares).post(handlers::file::share_file),
        )
        .route(
            "/files/:id/shares/:user_id",
            delete(handlers::file::unshare_file),
        )
        // Admin routes
        .route("/admin/users", post(handlers::admin::create_user))
        .route("/admin/storage", get(handlers::admin::storage_stats))
        .route("/admin/blobs/audit", get(handlers::admin::audit_refcounts))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // Combine all routes under /api/v1
    Router::new()
        .nest("/api/v1", public_routes.merge(protected_routes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::test_utils::TestEnv;

    const BOUNDARY: &str = "blobvault-test-boundary";

    fn multipart_body(filename: &str, data: &[u8], folder_id: Option<&str>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some(folder_id) = folder_id {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"folder_id\"\r\n\r\n{}\r\n",
                    BOUNDARY, folder_id
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: text/plain\r\n\r\n",
                BOUNDARY, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(token: &str, filename: &str, data: &[u8]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/files/upload")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(filename, data, None)))
            .unwrap()
    }

    fn get(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let env = TestEnv::new().await;
        let app = create_router(env.state());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/v1/user/storage").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(get("/api/v1/user/storage", "not-a-jwt"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_upload_dedup_and_usage_over_http() {
        let env = TestEnv::new().await;
        let user = env.create_user("a@example.com", 1000).await;
        let token = env.token_for(&user);
        let app = create_router(env.state());

        for name in ["one.txt", "two.txt"] {
            let response = app
                .clone()
                .oneshot(upload_request(&token, name, &[b'x'; 600]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["code"], 0);
            assert_eq!(body["data"]["filename"], name);
            assert_eq!(body["data"]["size"], 600);
        }

        let response = app
            .clone()
            .oneshot(get("/api/v1/user/storage", &token))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["data"]["storage_used_bytes"], 1200);
        assert_eq!(body["data"]["deduplicated_usage_bytes"], 600);
        assert_eq!(body["data"]["savings_bytes"], 600);

        // New content past the quota
        let response = app
            .oneshot(upload_request(&token, "three.txt", &[b'y'; 500]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(env.store.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_download_and_delete_over_http() {
        let env = TestEnv::new().await;
        let user = env.create_user("a@example.com", 10_000).await;
        let token = env.token_for(&user);
        let file = env.upload(&user.id, "hello.txt", b"hello world").await.unwrap();
        let app = create_router(env.state());

        let response = app
            .clone()
            .oneshot(get(&format!("/api/v1/files/{}/download", file.id), &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.contains("hello.txt"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello world");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/files/{}", file.id))
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(get(&format!("/api/v1/files/{}", file.id), &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(env.blob_count().await, 0);
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin() {
        let env = TestEnv::new().await;
        let admin = env.create_admin("root@example.com").await;
        let user = env.create_user("a@example.com", 10_000).await;
        env.upload(&user.id, "a.txt", b"same").await.unwrap();
        env.upload(&admin.id, "b.txt", b"same").await.unwrap();
        let app = create_router(env.state());

        let response = app
            .clone()
            .oneshot(get("/api/v1/admin/storage", &env.token_for(&user)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let admin_token = env.token_for(&admin);
        let response = app
            .clone()
            .oneshot(get("/api/v1/admin/storage", &admin_token))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["data"]["logical_bytes"], 8);
        assert_eq!(body["data"]["physical_bytes"], 4);

        let response = app
            .clone()
            .oneshot(get("/api/v1/admin/blobs/audit", &admin_token))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["data"], serde_json::json!([]));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/admin/users")
                    .header(header::AUTHORIZATION, format!("Bearer {}", admin_token))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"email":"new@example.com","storage_quota":5000}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["storage_quota"], 5000);
    }

    #[tokio::test]
    async fn test_folder_routes() {
        let env = TestEnv::new().await;
        let user = env.create_user("a@example.com", 10_000).await;
        let token = env.token_for(&user);
        let app = create_router(env.state());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/folders")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"name":"docs"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let folder_id = json_body(response).await["data"]["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/files/upload")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={}", BOUNDARY),
                    )
                    .body(Body::from(multipart_body("in.txt", b"inside", Some(&folder_id))))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get(&format!("/api/v1/folders/contents?folder_id={}", folder_id), &token))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["data"]["items"][0]["filename"], "in.txt");
        assert_eq!(body["data"]["total_count"], 1);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/folders/{}", folder_id))
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(env.blob_count().await, 0);
        let u = env.user(&user.id).await;
        assert_eq!((u.storage_used, u.dedup_storage_used), (0, 0));
    }

    #[tokio::test]
    async fn test_signed_blob_link() {
        let env = TestEnv::new().await;
        let file = {
            let user = env.create_user("a@example.com", 10_000).await;
            env.upload(&user.id, "note.txt", b"signed").await.unwrap()
        };
        let blob = env.blob(&file.blob_id).await.unwrap();
        let signer = crate::storage::UrlSigner::new(env.config.storage.presign_secret.clone());
        let expires = chrono::Utc::now().timestamp() + 60;
        let app = create_router(env.state());

        let uri = format!(
            "/api/v1/blobs/{}?expires={}&signature={}",
            blob.storage_key,
            expires,
            signer.sign(&blob.storage_key, expires)
        );
        let response = app
            .clone()
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"signed");

        let tampered = format!(
            "/api/v1/blobs/{}?expires={}&signature={}",
            blob.storage_key,
            expires + 1,
            signer.sign(&blob.storage_key, expires)
        );
        let response = app
            .oneshot(Request::builder().uri(&tampered).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_shared_files_and_user_lookup_over_http() {
        let env = TestEnv::new().await;
        let alice = env.create_user("alice@example.com", 10_000).await;
        let bob = env.create_user("bob@example.com", 10_000).await;
        let file = env.upload(&alice.id, "plan.txt", b"the plan").await.unwrap();
        env.upload(&bob.id, "notes.txt", b"notes").await.unwrap();
        env.upload(&bob.id, "photo.png", b"png").await.unwrap();
        crate::services::FileService::share_file(&env.db, &file.id, &alice.id, &bob.id)
            .await
            .unwrap();
        let token = env.token_for(&bob);
        let app = create_router(env.state());

        let response = app.clone().oneshot(get("/api/v1/users", &token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["id"], alice.id);

        let response = app
            .clone()
            .oneshot(get("/api/v1/folders/contents?ownership=shared", &token))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["data"]["total_count"], 1);
        assert_eq!(body["data"]["items"][0]["filename"], "plan.txt");
        assert_eq!(body["data"]["items"][0]["user_owns_file"], false);

        let response = app
            .clone()
            .oneshot(get(
                "/api/v1/folders/contents?sort_by=size&sort_order=desc&limit=2&search=t",
                &token,
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        let names: Vec<_> = body["data"]["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["filename"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["plan.txt", "notes.txt"]);
        assert_eq!(body["data"]["total_count"], 3);

        let response = app
            .oneshot(get("/api/v1/folders/contents?sort_by=owner", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
