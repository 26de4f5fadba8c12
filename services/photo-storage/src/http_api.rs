use crate::config::ApiConfig;
use crate::metrics_ledger::UploadMetrics;
use crate::service::{PhotoStorageService, UploadError};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PhotoStorageService>,
}

/// Query parameters for photo upload
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Photo identifier; generated server-side when absent
    pub photo_id: Option<String>,
    /// Upload a single named variant instead of the full set
    pub variant: Option<String>,
}

/// Upload response: one key per stored variant
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub business_id: String,
    pub photo_id: String,
    pub keys: HashMap<String, String>,
}

/// Query parameters for signed URL retrieval
#[derive(Debug, Deserialize)]
pub struct SignedUrlQuery {
    /// Signature lifetime in seconds; service default when absent
    pub expires_in: Option<u64>,
}

/// Signed URL response
#[derive(Debug, Serialize)]
pub struct SignedUrlResponse {
    pub key: String,
    pub url: String,
    /// URL expiration time
    pub expires_at: DateTime<Utc>,
}

/// Query parameters for a manual cleanup sweep
#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub older_than_days: Option<u32>,
}

/// Cleanup sweep response
#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// Map upload pipeline errors onto distinct response semantics: a variant
/// outside the fixed table is a bad request, undecodable bytes are an
/// unprocessable upload, and an exhausted storage retry is a bad gateway.
fn upload_error_response(e: &UploadError) -> ApiError {
    match e {
        UploadError::UnknownVariant(name) => api_error(
            StatusCode::BAD_REQUEST,
            "UNKNOWN_VARIANT",
            format!("Unknown photo variant: {name}"),
        ),
        UploadError::Processing(_) => api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "UNDECODABLE_IMAGE",
            "Uploaded bytes could not be decoded as an image",
        ),
        UploadError::Storage(_) => api_error(
            StatusCode::BAD_GATEWAY,
            "STORAGE_ERROR",
            "Photo storage backend failed",
        ),
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/businesses/:business_id/photos", post(upload_photo))
        .route(
            "/api/v1/photos/*key",
            get(get_photo_url).delete(delete_photo),
        )
        .route("/api/v1/cleanup", post(run_cleanup))
        .route("/api/v1/metrics/uploads", get(upload_metrics))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "photo-storage-service"
    }))
}

/// Upload a photo: raw image bytes in the body, variants derived and stored
/// under deterministic keys. Without a `variant` parameter all five variants
/// are stored; with one, only that variant.
#[instrument(skip(state, body), fields(business_id = %business_id, size_bytes = body.len()))]
async fn upload_photo(
    State(state): State<AppState>,
    Path(business_id): Path<String>,
    Query(params): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    if body.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "EMPTY_BODY",
            "Upload body is empty",
        ));
    }

    let photo_id = params
        .photo_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let keys = match params.variant.as_deref() {
        Some(variant) => {
            let key = state
                .service
                .upload_photo(&body, &business_id, &photo_id, Some(variant))
                .await
                .map_err(|e| {
                    error!(error = %e, business_id = %business_id, photo_id = %photo_id, "Photo upload failed");
                    upload_error_response(&e)
                })?;
            HashMap::from([(variant.to_string(), key)])
        }
        None => state
            .service
            .upload_all_variants(&body, &business_id, &photo_id)
            .await
            .map_err(|e| {
                error!(error = %e, business_id = %business_id, photo_id = %photo_id, "Photo upload failed");
                upload_error_response(&e)
            })?,
    };

    info!(
        business_id = %business_id,
        photo_id = %photo_id,
        variants = keys.len(),
        "Photo stored"
    );

    Ok(Json(UploadResponse {
        business_id,
        photo_id,
        keys,
    }))
}

/// Get a time-limited signed URL for a stored photo
#[instrument(skip(state))]
async fn get_photo_url(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<SignedUrlQuery>,
) -> Result<Json<SignedUrlResponse>, ApiError> {
    let expires_in = params.expires_in.map(Duration::from_secs);

    let url = state.service.get_url(&key, expires_in).await.map_err(|e| {
        error!(error = %e, key = %key, "Failed to sign retrieval URL");
        api_error(
            StatusCode::BAD_GATEWAY,
            "PRESIGN_ERROR",
            "Failed to generate signed URL",
        )
    })?;

    let lifetime = expires_in.unwrap_or_else(|| state.service.default_url_expiry());
    let expires_at =
        Utc::now() + chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::zero());

    Ok(Json(SignedUrlResponse {
        key,
        url,
        expires_at,
    }))
}

/// Delete a stored photo and evict it from the service caches
#[instrument(skip(state))]
async fn delete_photo(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_photo(&key).await.map_err(|e| {
        error!(error = %e, key = %key, "Failed to delete photo");
        api_error(
            StatusCode::BAD_GATEWAY,
            "DELETE_ERROR",
            "Failed to delete photo",
        )
    })?;

    Ok(StatusCode::NO_CONTENT)
}

/// Trigger a stale object sweep outside the background schedule
#[instrument(skip(state))]
async fn run_cleanup(
    State(state): State<AppState>,
    Query(params): Query<CleanupQuery>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let removed = state
        .service
        .cleanup_unused(params.older_than_days)
        .await
        .map_err(|e| {
            error!(error = %e, "Cleanup sweep failed");
            api_error(
                StatusCode::BAD_GATEWAY,
                "CLEANUP_ERROR",
                "Stale photo sweep failed",
            )
        })?;

    Ok(Json(CleanupResponse { removed }))
}

/// Dump the retained upload metrics ledger
async fn upload_metrics(
    State(state): State<AppState>,
) -> Json<HashMap<String, Vec<UploadMetrics>>> {
    Json(state.service.all_metrics())
}

/// Start the photo API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting photo API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_processor::ProcessingError;
    use anyhow::anyhow;

    #[test]
    fn test_unknown_variant_maps_to_bad_request() {
        let err = UploadError::UnknownVariant("poster".to_string());
        let (status, body) = upload_error_response(&err);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "UNKNOWN_VARIANT");
        assert!(body.error.contains("poster"));
    }

    #[test]
    fn test_undecodable_image_maps_to_unprocessable_entity() {
        let err = UploadError::Processing(ProcessingError::Decode("bad magic".to_string()));
        let (status, body) = upload_error_response(&err);
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.code, "UNDECODABLE_IMAGE");
    }

    #[test]
    fn test_storage_failure_maps_to_bad_gateway() {
        let err = UploadError::Storage(anyhow!("connection reset"));
        let (status, body) = upload_error_response(&err);
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.code, "STORAGE_ERROR");
    }
}
