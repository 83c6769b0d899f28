//! HTTP surface of the sighting service.
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State, multipart::MultipartError},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tigerhall_common::{ErrorCode, ErrorResponse, Sighting, SightingReport};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::config::BackendConfig;
use crate::module::ingest::{IngestError, SightingIngestor};
use crate::module::validator::{ValidationError, validate};

const DEFAULT_PAGE: i64 = 1;
const DEFAULT_PAGE_SIZE: i64 = 10;

/// Multipart field carrying the JSON sighting descriptor
const SIGHTING_FIELD: &str = "sightingInfo";
/// Multipart field carrying the photo
const IMAGE_FIELD: &str = "image";

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<SightingIngestor>,
    pub config: Arc<BackendConfig>,
}

impl AppState {
    pub fn new(ingestor: SightingIngestor, config: BackendConfig) -> Self {
        Self {
            ingestor: Arc::new(ingestor),
            config: Arc::new(config),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("multipart upload failed: {0}")]
    Upload(#[from] MultipartError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::Ingest(IngestError::Validation(e))
    }
}

fn internal_error() -> (StatusCode, ErrorResponse) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorResponse::new(ErrorCode::InternalError, "An internal error occurred"),
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(ErrorCode::InvalidRequest, message),
            ),
            // 413 for oversized uploads, 400 for malformed ones
            ApiError::Upload(e) => (
                e.status(),
                ErrorResponse::new(
                    ErrorCode::InvalidRequest,
                    format!("Failed to parse multipart form: {}", e.body_text()),
                ),
            ),
            ApiError::Ingest(IngestError::Validation(e)) => {
                (StatusCode::BAD_REQUEST, ErrorResponse::new(e.code, e.message))
            }
            ApiError::Ingest(IngestError::TooClose { .. }) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(
                    ErrorCode::TooCloseToPreviousSighting,
                    "New sighting is too close to the last sighting. Sightings must be at least 5 kilometers apart.",
                ),
            ),
            ApiError::Ingest(e @ IngestError::Image(_)) => {
                error!(error = %e, "Failed to process image upload");
                internal_error()
            }
            ApiError::Ingest(IngestError::Repository {
                operation,
                tiger_id,
                source,
            }) => {
                error!(operation, tiger_id, error = %format!("{:#}", source), "Repository failure");
                internal_error()
            }
            ApiError::Internal(e) => {
                error!(error = %format!("{:#}", e), "Internal server error");
                internal_error()
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Build the application router.
///
/// - `POST /sightings` (also `/sightings/create`) - multipart sighting upload
/// - `GET /sightings?tigerID=&page=&pageSize=` (also `/sightings/list`)
/// - `GET /health`, `GET /stats`
/// - `/images/*` - stored photos
pub fn router(state: AppState) -> Router {
    let image_dir = Path::new(&state.config.image_storage_path).to_path_buf();
    let upload_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/sightings", get(list_sightings).post(create_sighting))
        .route("/sightings/create", axum::routing::post(create_sighting))
        .route("/sightings/list", get(list_sightings))
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .nest_service("/images", ServeDir::new(image_dir))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "running",
        "service": "tigerhall-backend",
        "version": env!("CARGO_PKG_VERSION"),
        "notifications": state.ingestor.dispatcher().stats(),
    }))
}

/// File extension of an uploaded file name, with its leading dot.
fn upload_extension(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

async fn create_sighting(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Sighting>), ApiError> {
    let mut info: Option<String> = None;
    let mut image: Option<(Vec<u8>, String)> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            SIGHTING_FIELD => info = Some(field.text().await?),
            IMAGE_FIELD => {
                let ext = upload_extension(field.file_name());
                let bytes = field.bytes().await?;
                image = Some((bytes.to_vec(), ext));
            }
            other => debug!("Ignoring multipart field '{}'", other),
        }
    }

    let info = info.ok_or_else(|| ApiError::BadRequest(format!("Missing '{}' field", SIGHTING_FIELD)))?;
    let report: SightingReport = serde_json::from_str(&info)
        .map_err(|e| ApiError::BadRequest(format!("Invalid sighting data: {}", e)))?;

    let Some((bytes, ext)) = image else {
        // a broken descriptor is reported before the missing upload
        validate(&report)?;
        return Err(ApiError::BadRequest("Could not get uploaded file".to_string()));
    };

    let sighting = state.ingestor.ingest(&report, &bytes, &ext).await?;
    Ok((StatusCode::CREATED, Json(sighting)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListSightingsParams {
    #[serde(rename = "tigerID")]
    pub tiger_id: Option<String>,
    pub page: Option<String>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<String>,
}

/// Page request after defaulting; unparsable or out-of-range values fall back
/// to page 1 and 10 items per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
}

impl Pagination {
    pub fn from_params(page: Option<&str>, page_size: Option<&str>) -> Self {
        let page = page
            .and_then(|p| p.trim().parse::<i64>().ok())
            .filter(|&p| p >= 1)
            .unwrap_or(DEFAULT_PAGE);
        let page_size = page_size
            .and_then(|p| p.trim().parse::<i64>().ok())
            .filter(|&p| p > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        Self { page, page_size }
    }

    pub fn limit(&self) -> usize {
        self.page_size as usize
    }

    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.page_size) as usize
    }
}

async fn list_sightings(
    State(state): State<AppState>,
    Query(params): Query<ListSightingsParams>,
) -> Result<Json<Vec<Sighting>>, ApiError> {
    let tiger_id = params
        .tiger_id
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Tiger ID is required".to_string()))?;
    let tiger_id: i64 = tiger_id
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid Tiger ID".to_string()))?;

    let pagination = Pagination::from_params(params.page.as_deref(), params.page_size.as_deref());

    let sightings = state
        .ingestor
        .repository()
        .list_sightings(tiger_id, pagination.limit(), pagination.offset())
        .await?;

    Ok(Json(sightings))
}
