//! Shared fixtures for the integration tests.
//!
//! Tests run against the in-memory store with a renderer that fills tiles
//! with a flat colour and counts how often it is called.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use image::{Rgba, RgbaImage};
use tower::ServiceExt;
use url::Url;

use pageforest_tiles::error::{StorageError, TileError};
use pageforest_tiles::storage::{BlobOptions, BlobStore, DocAttributes, MemoryBlobStore};
use pageforest_tiles::tile::{
    RetryPolicy, TileCache, TileCacheConfig, TileId, TileRect, TileRenderer, TileSpace,
};
use pageforest_tiles::{create_router, RouterConfig};

pub const TEST_DOC: &str = "mandelbrot-tiles-test";
pub const TEST_TILE_SIZE: u32 = 16;

// =============================================================================
// Counting Renderer
// =============================================================================

/// Fills each tile with one colour and records the call.
#[derive(Clone, Default)]
pub struct CountingRenderer {
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl CountingRenderer {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TileRenderer for CountingRenderer {
    async fn render(
        &self,
        _id: &TileId,
        _rect: TileRect,
        mut surface: RgbaImage,
    ) -> Result<RgbaImage, TileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        for pixel in surface.pixels_mut() {
            *pixel = Rgba([200, 40, 40, 255]);
        }
        Ok(surface)
    }
}

// =============================================================================
// Unreliable Store
// =============================================================================

/// Wraps the memory store and fails the first `failures` calls to
/// `blob_exists` with a network error.
pub struct UnreliableStore {
    inner: MemoryBlobStore,
    failures: AtomicUsize,
}

impl UnreliableStore {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: MemoryBlobStore::default(),
            failures: AtomicUsize::new(failures),
        }
    }

    /// A store that never answers existence checks.
    pub fn unreachable() -> Self {
        Self::new(usize::MAX)
    }
}

#[async_trait]
impl BlobStore for UnreliableStore {
    fn doc_url(&self, doc_id: &str, blob_id: &str) -> Url {
        self.inner.doc_url(doc_id, blob_id)
    }

    async fn get_blob(&self, doc_id: &str, blob_id: &str) -> Result<Bytes, StorageError> {
        self.inner.get_blob(doc_id, blob_id).await
    }

    async fn blob_exists(&self, doc_id: &str, blob_id: &str) -> Result<bool, StorageError> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StorageError::Network("connection refused".to_string()));
        }
        self.inner.blob_exists(doc_id, blob_id).await
    }

    async fn put_blob(
        &self,
        doc_id: &str,
        blob_id: &str,
        data: Bytes,
        options: &BlobOptions,
    ) -> Result<(), StorageError> {
        self.inner.put_blob(doc_id, blob_id, data, options).await
    }

    async fn put_doc(&self, doc_id: &str, attributes: &DocAttributes) -> Result<(), StorageError> {
        self.inner.put_doc(doc_id, attributes).await
    }

    async fn list_blobs(
        &self,
        doc_id: &str,
        tag: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        self.inner.list_blobs(doc_id, tag).await
    }
}

// =============================================================================
// Cache and Router Builders
// =============================================================================

pub fn test_cache_config() -> TileCacheConfig {
    TileCacheConfig::new(TEST_DOC).with_space(TileSpace::new(
        TileRect::new(-2.0, -2.0, 2.0, 2.0),
        TEST_TILE_SIZE,
    ))
}

pub type MemoryCache = TileCache<Arc<MemoryBlobStore>, CountingRenderer>;

/// Cache over a fresh memory store.
pub fn memory_cache(renderer: CountingRenderer) -> (Arc<MemoryCache>, Arc<MemoryBlobStore>) {
    let store = Arc::new(MemoryBlobStore::default());
    let cache = Arc::new(TileCache::new(
        Arc::clone(&store),
        renderer,
        test_cache_config(),
    ));
    (cache, store)
}

/// Router over a fresh memory store, without tracing.
pub fn memory_router(
    config: RouterConfig,
) -> (Router, Arc<MemoryCache>, Arc<MemoryBlobStore>, CountingRenderer) {
    let renderer = CountingRenderer::default();
    let (cache, store) = memory_cache(renderer.clone());
    let router = create_router(Arc::clone(&cache), config.with_tracing(false));
    (router, cache, store, renderer)
}

/// Router over an [`UnreliableStore`].
pub fn unreliable_router(store: UnreliableStore, retry: RetryPolicy) -> Router {
    let cache = Arc::new(TileCache::new(
        store,
        CountingRenderer::default(),
        test_cache_config().with_retry(retry),
    ));
    create_router(cache, RouterConfig::default().with_tracing(false))
}

// =============================================================================
// Request Helpers
// =============================================================================

/// Response status, headers and collected body.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response body should be JSON")
    }
}

pub async fn get(router: &Router, uri: &str) -> TestResponse {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();

    TestResponse {
        status,
        headers,
        body,
    }
}

/// Dimensions of a PNG body.
pub fn png_dimensions(data: &[u8]) -> (u32, u32) {
    let image = image::load_from_memory_with_format(data, image::ImageFormat::Png)
        .expect("body should be a PNG");
    (image.width(), image.height())
}
