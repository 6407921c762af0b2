//! HTTP handlers.
//!
//! Implements:
//! - GET /health - Health check endpoint
//! - GET /api/config - Active storage backend
//! - POST /api/upload-multiple - Folder-tree upload with progress
//! - DELETE /api/files/{*path}, DELETE /api/folders/{*path}
//! - POST /api/folders - Create a folder
//! - GET /api/structure - Paginated listing
//! - GET /ws/{client_id} - Progress channel

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use bytes::Bytes;
use drive_storage_core::path::normalize_path;
use drive_storage_core::StorageBackend;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::auth::require_identity;
use crate::cache::{CachedBackend, ListingCache};
use crate::error::{ApiError, Result};
use crate::listing::{build_structure, StructurePage, StructureQuery};
use crate::progress::ProgressBroadcaster;
use crate::provision::{FolderProvisioner, FolderTemplate};
use crate::upload::{UploadFailure, UploadOrchestrator, UploadSuccess, UploadTask};
use crate::ws::ws_handler;

/// Storage description exposed by `/api/config`.
#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub storage_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Deployment settings the handlers depend on.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub intake_root: String,
    pub processed_root: String,
    pub template: FolderTemplate,
    pub storage_info: StorageInfo,
    pub api_token: Option<String>,
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Cache-aware view of the active backend
    pub storage: Arc<dyn StorageBackend>,
    pub progress: Arc<ProgressBroadcaster>,
    pub uploads: Arc<UploadOrchestrator>,
    pub storage_info: Arc<StorageInfo>,
    pub api_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        cache: Arc<ListingCache>,
        progress: Arc<ProgressBroadcaster>,
        settings: AppSettings,
    ) -> Self {
        let storage: Arc<dyn StorageBackend> = Arc::new(CachedBackend::new(backend, cache));
        let provisioner = Arc::new(FolderProvisioner::new(
            storage.clone(),
            progress.clone(),
            settings.processed_root,
            settings.template,
        ));
        let uploads = Arc::new(UploadOrchestrator::new(
            storage.clone(),
            progress.clone(),
            provisioner,
            settings.intake_root,
        ));

        Self {
            storage,
            progress,
            uploads,
            storage_info: Arc::new(settings.storage_info),
            api_token: settings.api_token.map(Arc::from),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let api = Router::new()
        .route("/config", get(config_handler))
        .route("/upload-multiple", post(upload_multiple_handler))
        .route("/files/{*path}", delete(delete_file_handler))
        .route("/folders", post(create_folder_handler))
        .route("/folders/{*path}", delete(delete_folder_handler))
        .route("/structure", get(structure_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_identity,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws/{client_id}", get(ws_handler))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    pub storage: String,
}

/// GET /health - Health check endpoint.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        storage: state.storage_info.storage_type.clone(),
    })
}

/// GET /api/config
pub async fn config_handler(State(state): State<AppState>) -> Json<StorageInfo> {
    Json(state.storage_info.as_ref().clone())
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: usize,
    pub failed: usize,
    pub results: Vec<UploadSuccess>,
    pub errors: Vec<UploadFailure>,
}

/// POST /api/upload-multiple
///
/// Multipart fields: repeated `files`, `paths` (JSON array of destination
/// folders, one per file, same order) and optional `client_id`.
pub async fn upload_multiple_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut files: Vec<(String, Bytes)> = Vec::new();
    let mut paths: Option<String> = None;
    let mut client_id: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content = field.bytes().await?;
                files.push((filename, content));
            }
            "paths" => paths = Some(field.text().await?),
            "client_id" => {
                client_id = Some(field.text().await?.trim().to_string()).filter(|id| !id.is_empty())
            }
            other => debug!("Ignoring multipart field: {}", other),
        }
    }

    if files.is_empty() {
        return Err(ApiError::Validation("No files provided".into()));
    }
    let paths = paths.ok_or_else(|| ApiError::Validation("Missing paths field".into()))?;
    let paths: Vec<String> = serde_json::from_str(&paths).map_err(|e| {
        ApiError::Validation(format!("paths must be a JSON array of strings: {}", e))
    })?;
    if paths.len() != files.len() {
        return Err(ApiError::Validation(format!(
            "Got {} files but {} paths",
            files.len(),
            paths.len()
        )));
    }

    info!(
        "Uploading {} files (client_id: {})",
        files.len(),
        client_id.as_deref().unwrap_or("none")
    );

    let tasks = files
        .into_iter()
        .zip(paths)
        .map(|((filename, content), folder)| UploadTask::new(content, folder, filename))
        .collect();

    // The provisioning hook keeps running after its handle is dropped.
    let batch = state.uploads.upload_batch(tasks, client_id).await;
    let result = batch.result;

    Ok(Json(UploadResponse {
        success: result.successes.len(),
        failed: result.failures.len(),
        results: result.successes,
        errors: result.failures,
    }))
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// DELETE /api/files/{*path}
pub async fn delete_file_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<MessageResponse>> {
    info!("Deleting file: {}", path);
    state.storage.delete_file(&path).await?;
    Ok(Json(MessageResponse {
        message: format!("File '{}' deleted successfully", path),
    }))
}

/// DELETE /api/folders/{*path}
pub async fn delete_folder_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<MessageResponse>> {
    info!("Deleting folder: {}", path);
    state.storage.delete_folder(&path).await?;
    Ok(Json(MessageResponse {
        message: format!("Folder '{}' deleted successfully", path),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    pub path: String,
}

/// POST /api/folders
pub async fn create_folder_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateFolderRequest>,
) -> Result<Json<MessageResponse>> {
    let path = normalize_path(&request.path);
    if path.is_empty() {
        return Err(ApiError::Validation("Folder path must not be empty".into()));
    }

    info!("Creating folder: {}", path);
    state.storage.create_folder(&path).await?;
    Ok(Json(MessageResponse {
        message: format!("Folder '{}' created successfully", path),
    }))
}

/// GET /api/structure
pub async fn structure_handler(
    State(state): State<AppState>,
    Query(query): Query<StructureQuery>,
) -> Result<Json<StructurePage>> {
    let listing = state.storage.list_all().await?;
    Ok(Json(build_structure(listing, &query)))
}
