//! Router assembly.
//!
//! ```text
//! /health                        - Health check
//! /stats                         - Cache counters
//! /rects/{tile_id}               - Tile geometry
//! /tiles/{tile_id}               - Tile PNG, rendered on miss
//! /tiles/{zoom}/{x}/{y}.png      - Tile PNG by coordinate
//! /docs/{doc_id}                 - Blob listing, `?tag=` filters
//! /docs/{doc_id}/{blob_id}       - Raw blob (the URL image handles point at)
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    blob_handler, blob_list_handler, health_handler, rect_handler, stats_handler,
    tile_coord_handler, tile_handler, AppState,
};
use crate::storage::BlobStore;
use crate::tile::{TileCache, TileRenderer};

/// HTTP surface options.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins; `None` allows any
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: 3600,
            enable_tracing: true,
        }
    }
}

impl RouterConfig {
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

/// Build the application router over a shared tile cache.
pub fn create_router<S, R>(cache: Arc<TileCache<S, R>>, config: RouterConfig) -> Router
where
    S: BlobStore + 'static,
    R: TileRenderer + 'static,
{
    let state = AppState::with_cache_max_age(cache, config.cache_max_age);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler::<S, R>))
        .route("/rects/{tile_id}", get(rect_handler::<S, R>))
        .route("/tiles/{tile_id}", get(tile_handler::<S, R>))
        // {filename} takes both "{y}" and "{y}.png"
        .route(
            "/tiles/{zoom}/{x}/{filename}",
            get(tile_coord_handler::<S, R>),
        )
        .route("/docs/{doc_id}", get(blob_list_handler::<S, R>))
        .route("/docs/{doc_id}/{blob_id}", get(blob_handler::<S, R>))
        .with_state(state)
        .layer(build_cors_layer(config.cors_origins.as_deref()));

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn build_cors_layer(origins: Option<&[String]>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match origins {
        None => cors.allow_origin(Any),
        // Empty list: no cross-origin access
        Some([]) => cors,
        Some(origins) => {
            let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed)
        }
    }
}
