//! HTTP request handlers for the tile API.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /stats` - Cache counters
//! - `GET /tiles/{tile_id}` - Tile PNG by id, rendered on a miss
//! - `GET /tiles/{zoom}/{x}/{y}.png` - Tile PNG by grid coordinate
//! - `GET /rects/{tile_id}` - Rectangle and quadtree position of a tile
//! - `GET /docs/{doc_id}` - Blob ids in a document, optionally by `tag`
//! - `GET /docs/{doc_id}/{blob_id}` - Raw stored blob

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{StorageError, TileError};
use crate::storage::BlobStore;
use crate::tile::{CacheStats, TileCache, TileCoord, TileId, TileRenderer, TileResponse};

// =============================================================================
// Application State
// =============================================================================

/// Shared state passed to all handlers.
pub struct AppState<S: BlobStore, R: TileRenderer> {
    pub cache: Arc<TileCache<S, R>>,

    /// Cache-Control max-age for tiles and blobs, in seconds
    pub cache_max_age: u32,
}

impl<S: BlobStore, R: TileRenderer> AppState<S, R> {
    pub fn new(cache: Arc<TileCache<S, R>>) -> Self {
        Self {
            cache,
            cache_max_age: 3600,
        }
    }

    pub fn with_cache_max_age(cache: Arc<TileCache<S, R>>, cache_max_age: u32) -> Self {
        Self {
            cache,
            cache_max_age,
        }
    }
}

impl<S: BlobStore, R: TileRenderer> Clone for AppState<S, R> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters for coordinate tile requests.
///
/// Extracted from `/tiles/{zoom}/{x}/{filename}`, where filename is `{y}` or `{y}.png`.
/// Coordinates are signed so negative values reach validation and get a 400.
#[derive(Debug, Deserialize)]
pub struct TileCoordPathParams {
    pub zoom: u32,
    pub x: i64,
    pub filename: String,
}

impl TileCoordPathParams {
    /// Parse the Y coordinate, stripping any .png extension.
    pub fn y(&self) -> Result<i64, std::num::ParseIntError> {
        let y_str = self.filename.strip_suffix(".png").unwrap_or(&self.filename);
        y_str.parse()
    }
}

/// Query parameters for the blob listing endpoint.
#[derive(Debug, Deserialize)]
pub struct BlobListQueryParams {
    /// Only blobs carrying this tag (an ancestor tile prefix for tiles)
    #[serde(default)]
    pub tag: Option<String>,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_tile_id")
    pub error: String,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Geometry of one tile.
#[derive(Debug, Serialize)]
pub struct RectResponse {
    pub id: TileId,
    pub zoom: u32,
    pub x: i64,
    pub y: i64,

    /// `[x_min, y_min, x_max, y_max]`
    pub rect: [f64; 4],

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<TileId>,

    pub children: Vec<TileId>,

    /// Ancestor prefixes the tile is tagged with in storage
    pub ancestors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BlobListResponse {
    pub doc_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    pub blobs: Vec<String>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Map a status to a log line: 5xx at error, 404 at debug, other 4xx at warn.
fn log_error(status: StatusCode, error_type: &str, message: &str) {
    if status.is_server_error() {
        error!(
            error_type = error_type,
            status = status.as_u16(),
            "Server error: {}",
            message
        );
    } else if status == StatusCode::NOT_FOUND {
        debug!(
            error_type = error_type,
            status = status.as_u16(),
            "Resource not found: {}",
            message
        );
    } else {
        warn!(
            error_type = error_type,
            status = status.as_u16(),
            "Client error: {}",
            message
        );
    }
}

fn storage_error_parts(err: &StorageError) -> (StatusCode, &'static str) {
    match err {
        StorageError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        StorageError::Network(_) => (StatusCode::BAD_GATEWAY, "network_error"),
        StorageError::S3(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        StorageError::InvalidDocument { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "invalid_document")
        }
    }
}

impl IntoResponse for TileError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            TileError::InvalidCoordinate { .. } => {
                (StatusCode::BAD_REQUEST, "invalid_coordinate")
            }
            TileError::InvalidTileId { .. } => (StatusCode::BAD_REQUEST, "invalid_tile_id"),
            TileError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            TileError::Network(_) => (StatusCode::BAD_GATEWAY, "network_error"),
            TileError::Render { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "render_error"),
            TileError::Encode { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "encode_error"),
            TileError::Storage(err) => storage_error_parts(err),
        };
        let message = self.to_string();

        log_error(status, error_type, &message);

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

/// Wrapper so handlers can return either error type with `?`.
pub struct HandlerError(pub TileError);

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

impl From<TileError> for HandlerError {
    fn from(err: TileError) -> Self {
        HandlerError(err)
    }
}

impl From<StorageError> for HandlerError {
    fn from(err: StorageError) -> Self {
        // Keep every storage variant intact so the status reflects the backend
        HandlerError(TileError::Storage(err))
    }
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn stats_handler<S, R>(State(state): State<AppState<S, R>>) -> Json<CacheStats>
where
    S: BlobStore,
    R: TileRenderer,
{
    Json(state.cache.stats().await)
}

/// `GET /tiles/{tile_id}`
///
/// # Errors
///
/// - `400 Bad Request`: malformed tile id
/// - `502 Bad Gateway`: storage unreachable
/// - `500 Internal Server Error`: render, encode or storage failure
pub async fn tile_handler<S, R>(
    State(state): State<AppState<S, R>>,
    Path(tile_id): Path<String>,
) -> Result<Response, HandlerError>
where
    S: BlobStore + 'static,
    R: TileRenderer + 'static,
{
    let id = TileId::parse(&tile_id)?;
    let response = state.cache.get_tile(&id).await?;
    Ok(png_response(&state, response))
}

/// `GET /tiles/{zoom}/{x}/{y}.png`
pub async fn tile_coord_handler<S, R>(
    State(state): State<AppState<S, R>>,
    Path(params): Path<TileCoordPathParams>,
) -> Result<Response, HandlerError>
where
    S: BlobStore + 'static,
    R: TileRenderer + 'static,
{
    let y = params.y().map_err(|_| TileError::InvalidTileId {
        id: params.filename.clone(),
        reason: "y coordinate must be an integer",
    })?;
    let id = TileCoord::new(params.x, y, params.zoom).tile_id()?;
    let response = state.cache.get_tile(&id).await?;
    Ok(png_response(&state, response))
}

fn png_response<S: BlobStore, R: TileRenderer>(
    state: &AppState<S, R>,
    response: TileResponse,
) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CACHE_CONTROL,
                format!("public, max-age={}", state.cache_max_age),
            ),
            (
                header::HeaderName::from_static("x-tile-id"),
                response.id.to_string(),
            ),
            (
                header::HeaderName::from_static("x-tile-cache-hit"),
                response.cache_hit.to_string(),
            ),
        ],
        response.data,
    )
        .into_response()
}

/// `GET /rects/{tile_id}`
pub async fn rect_handler<S, R>(
    State(state): State<AppState<S, R>>,
    Path(tile_id): Path<String>,
) -> Result<Json<RectResponse>, HandlerError>
where
    S: BlobStore,
    R: TileRenderer,
{
    let id = TileId::parse(&tile_id)?;
    let coord = id.coord();
    let rect = state.cache.space().rect(&id);

    Ok(Json(RectResponse {
        zoom: coord.zoom,
        x: coord.x,
        y: coord.y,
        rect: rect.as_array(),
        parent: id.parent(),
        children: id.children(),
        ancestors: id.ancestors(),
        id,
    }))
}

/// `GET /docs/{doc_id}?tag=...`
pub async fn blob_list_handler<S, R>(
    State(state): State<AppState<S, R>>,
    Path(doc_id): Path<String>,
    Query(query): Query<BlobListQueryParams>,
) -> Result<Json<BlobListResponse>, HandlerError>
where
    S: BlobStore,
    R: TileRenderer,
{
    let blobs = state
        .cache
        .store()
        .list_blobs(&doc_id, query.tag.as_deref())
        .await?;

    Ok(Json(BlobListResponse {
        doc_id,
        tag: query.tag,
        blobs,
    }))
}

/// `GET /docs/{doc_id}/{blob_id}`
pub async fn blob_handler<S, R>(
    State(state): State<AppState<S, R>>,
    Path((doc_id, blob_id)): Path<(String, String)>,
) -> Result<Response, HandlerError>
where
    S: BlobStore,
    R: TileRenderer,
{
    let data = state.cache.store().get_blob(&doc_id, &blob_id).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type_for(&blob_id).to_string()),
            (
                header::CACHE_CONTROL,
                format!("public, max-age={}", state.cache_max_age),
            ),
        ],
        data,
    )
        .into_response())
}

/// MIME type from a blob id's extension.
pub fn content_type_for(blob_id: &str) -> &'static str {
    match blob_id.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

// =============================================================================
// Tests
// =============================================================================
