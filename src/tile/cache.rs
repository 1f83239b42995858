//! Tile cache with render-on-miss.
//!
//! The cache maps tile ids to entries that hold a shared image handle. A
//! handle starts out pointing at the tile's URL in the blob store; if the
//! store does not have the tile yet, the cache renders it, swaps the
//! handle's source to the rendered PNG in place, and uploads the PNG.
//!
//! # Per-tile state machine
//!
//! ```text
//!  Unchecked ──► Checking ──(exists)──────────────────► Cached
//!      ▲             │                                     ▲
//!      │             └──(missing)──► Rendering ──(upload)──┘
//!      │                                 │
//!      └────────────(any error)──────────┘
//! ```
//!
//! Each entry carries an in-flight guard, so concurrent requests for the same
//! tile run the check/render once; later callers wait and then see `Cached`.
//! The check/render itself runs on a spawned task, so a caller that gives up
//! halfway never leaves an entry in `Checking` or `Rendering`.
//! Entries are never evicted.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use image::RgbaImage;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use super::address::{TileId, TileSpace};
use super::encoder::PngTileEncoder;
use super::render::TileRenderer;
use crate::error::{StorageError, TileError};
use crate::storage::{BlobOptions, BlobStore};

// =============================================================================
// Configuration
// =============================================================================

/// Retry policy for storage calls that fail with a transient error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first (minimum 1)
    pub max_attempts: u32,

    /// Pause between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    /// One attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Settings for a [`TileCache`].
#[derive(Debug, Clone)]
pub struct TileCacheConfig {
    /// Document that owns the tile blobs
    pub doc_id: String,

    /// Root rectangle and tile size
    pub space: TileSpace,

    pub retry: RetryPolicy,
}

impl TileCacheConfig {
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            space: TileSpace::default(),
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_space(mut self, space: TileSpace) -> Self {
        self.space = space;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

// =============================================================================
// Tile State and Image Handle
// =============================================================================

/// Lifecycle state of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TileState {
    Unchecked,
    Checking,
    Rendering,
    Cached,
}

impl fmt::Display for TileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TileState::Unchecked => "unchecked",
            TileState::Checking => "checking",
            TileState::Rendering => "rendering",
            TileState::Cached => "cached",
        };
        f.write_str(name)
    }
}

/// Where an image handle currently gets its pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum TileSource {
    /// Stored blob URL
    Remote(Url),

    /// PNG rendered by this process
    Rendered(Bytes),
}

/// Shared image handle for a tile.
///
/// Callers keep the `Arc` and observe the source swap when rendering
/// completes; the cache owns the entry the handle belongs to.
#[derive(Debug)]
pub struct TileImage {
    id: TileId,
    width: u32,
    height: u32,
    source: RwLock<TileSource>,
}

impl TileImage {
    fn new(id: TileId, size: u32, url: Url) -> Self {
        Self {
            id,
            width: size,
            height: size,
            source: RwLock::new(TileSource::Remote(url)),
        }
    }

    pub fn id(&self) -> &TileId {
        &self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub async fn source(&self) -> TileSource {
        self.source.read().await.clone()
    }

    pub async fn is_rendered(&self) -> bool {
        matches!(*self.source.read().await, TileSource::Rendered(_))
    }

    async fn set_source(&self, source: TileSource) {
        *self.source.write().await = source;
    }
}

struct CacheEntry {
    image: Arc<TileImage>,
    state: RwLock<TileState>,
    exists: AtomicBool,

    /// Held for the whole check/render so only one runs per tile
    in_flight: Mutex<()>,
}

impl CacheEntry {
    async fn state(&self) -> TileState {
        *self.state.read().await
    }

    async fn set_state(&self, state: TileState) {
        debug!(tile_id = %self.image.id, state = %state, "Tile state change");
        *self.state.write().await = state;
    }
}

// =============================================================================
// Responses and Statistics
// =============================================================================

/// PNG data for a tile.
#[derive(Debug, Clone)]
pub struct TileResponse {
    pub id: TileId,

    pub data: Bytes,

    /// Whether the tile was already `Cached` before this request
    pub cache_hit: bool,
}

/// Counters for cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub existence_checks: u64,

    /// Renders that produced a surface
    pub renders: u64,
    pub uploads: u64,
}

// =============================================================================
// Tile Cache
// =============================================================================

/// Cache of tile image handles, rendering and uploading tiles the store lacks.
///
/// # Type Parameters
///
/// * `S` - Blob store holding the tile document
/// * `R` - Renderer invoked on a miss
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use pageforest_tiles::storage::MemoryBlobStore;
/// use pageforest_tiles::tile::{MandelbrotRenderer, TileCache, TileCacheConfig, TileId};
///
/// let cache = Arc::new(TileCache::new(
///     MemoryBlobStore::default(),
///     MandelbrotRenderer::new(),
///     TileCacheConfig::new("mandelbrot-v1"),
/// ));
///
/// // Returns immediately; the check/render runs in the background
/// let image = cache.get_image(&TileId::root()).await;
///
/// // Or wait for the PNG
/// let tile = cache.get_tile(&TileId::root()).await?;
/// ```
pub struct TileCache<S: BlobStore, R: TileRenderer> {
    store: S,
    renderer: R,
    encoder: PngTileEncoder,
    config: TileCacheConfig,
    entries: RwLock<HashMap<TileId, Arc<CacheEntry>>>,

    existence_checks: AtomicU64,
    renders: AtomicU64,
    uploads: AtomicU64,
}

impl<S: BlobStore, R: TileRenderer> TileCache<S, R> {
    pub fn new(store: S, renderer: R, config: TileCacheConfig) -> Self {
        Self {
            store,
            renderer,
            encoder: PngTileEncoder::new(),
            config,
            entries: RwLock::new(HashMap::new()),
            existence_checks: AtomicU64::new(0),
            renders: AtomicU64::new(0),
            uploads: AtomicU64::new(0),
        }
    }

    pub fn doc_id(&self) -> &str {
        &self.config.doc_id
    }

    pub fn space(&self) -> &TileSpace {
        &self.config.space
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Look up the entry for `id`, creating it if needed.
    ///
    /// Returns the entry and whether this call created it.
    async fn entry(&self, id: &TileId) -> (Arc<CacheEntry>, bool) {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(id) {
                return (Arc::clone(entry), false);
            }
        }

        let mut entries = self.entries.write().await;
        // Another task may have inserted between the two locks
        if let Some(entry) = entries.get(id) {
            return (Arc::clone(entry), false);
        }

        let url = self.store.doc_url(&self.config.doc_id, id.as_str());
        let entry = Arc::new(CacheEntry {
            image: Arc::new(TileImage::new(id.clone(), self.config.space.tile_size, url)),
            state: RwLock::new(TileState::Unchecked),
            exists: AtomicBool::new(false),
            in_flight: Mutex::new(()),
        });
        entries.insert(id.clone(), Arc::clone(&entry));
        (entry, true)
    }

    /// One guarded pass of the state machine. On error the entry goes back
    /// to `Unchecked`, so a later call starts over.
    async fn check_and_render_entry(
        &self,
        id: &TileId,
        entry: &CacheEntry,
    ) -> Result<TileState, TileError> {
        let _in_flight = entry.in_flight.lock().await;

        if entry.state().await == TileState::Cached {
            return Ok(TileState::Cached);
        }

        match self.run_state_machine(id, entry).await {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(tile_id = %id, error = %e, "Tile check/render failed");
                entry.set_state(TileState::Unchecked).await;
                Err(e)
            }
        }
    }

    async fn run_state_machine(
        &self,
        id: &TileId,
        entry: &CacheEntry,
    ) -> Result<TileState, TileError> {
        let doc_id = self.config.doc_id.as_str();

        entry.set_state(TileState::Checking).await;
        self.existence_checks.fetch_add(1, Ordering::Relaxed);
        let exists = self
            .with_retry("check", id, || self.store.blob_exists(doc_id, id.as_str()))
            .await?;

        if exists {
            entry.exists.store(true, Ordering::Release);
            entry.set_state(TileState::Cached).await;
            return Ok(TileState::Cached);
        }

        entry.set_state(TileState::Rendering).await;
        let rect = self.config.space.rect(id);
        let size = self.config.space.tile_size;
        let surface = self
            .renderer
            .render(id, rect, RgbaImage::new(size, size))
            .await?;
        self.renders.fetch_add(1, Ordering::Relaxed);
        let png = self.encoder.encode(&surface)?;

        entry
            .image
            .set_source(TileSource::Rendered(png.clone()))
            .await;

        let options = BlobOptions::png().with_tags(id.ancestors());
        self.with_retry("upload", id, || {
            self.store
                .put_blob(doc_id, id.as_str(), png.clone(), &options)
        })
        .await?;
        self.uploads.fetch_add(1, Ordering::Relaxed);

        info!(tile_id = %id, doc_id = doc_id, bytes = png.len(), "Rendered and stored tile");

        entry.exists.store(true, Ordering::Release);
        entry.set_state(TileState::Cached).await;
        Ok(TileState::Cached)
    }

    /// Call `op`, retrying transient storage errors per the retry policy.
    async fn with_retry<T, F, Fut>(
        &self,
        action: &str,
        id: &TileId,
        mut op: F,
    ) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let policy = self.config.retry;
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    warn!(
                        tile_id = %id,
                        action = action,
                        attempt = attempt,
                        error = %e,
                        "Transient storage error, retrying"
                    );
                    tokio::time::sleep(policy.delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Whether tile `id` is stored, without rendering it.
    pub async fn check_tile_exists(&self, id: &TileId) -> Result<bool, TileError> {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(id).cloned()
        };
        if let Some(entry) = entry {
            if entry.exists.load(Ordering::Acquire) {
                return Ok(true);
            }
        }

        self.existence_checks.fetch_add(1, Ordering::Relaxed);
        let exists = self
            .with_retry("check", id, || {
                self.store.blob_exists(&self.config.doc_id, id.as_str())
            })
            .await?;
        Ok(exists)
    }

    /// Current state of a tile, or `None` if it was never requested.
    pub async fn state(&self, id: &TileId) -> Option<TileState> {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(id).cloned()
        };
        match entry {
            Some(entry) => Some(entry.state().await),
            None => None,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len().await,
            existence_checks: self.existence_checks.load(Ordering::Relaxed),
            renders: self.renders.load(Ordering::Relaxed),
            uploads: self.uploads.load(Ordering::Relaxed),
        }
    }
}

impl<S, R> TileCache<S, R>
where
    S: BlobStore + 'static,
    R: TileRenderer + 'static,
{
    /// Start the check/render for `id` on its own task.
    ///
    /// The task owns the entry, so dropping the caller's future never leaves
    /// the entry stuck in `Checking` or `Rendering`.
    fn spawn_check(
        self: &Arc<Self>,
        id: &TileId,
        entry: Arc<CacheEntry>,
    ) -> JoinHandle<Result<TileState, TileError>> {
        let cache = Arc::clone(self);
        let id = id.clone();
        tokio::spawn(async move { cache.check_and_render_entry(&id, &entry).await })
    }

    /// Run the check/render state machine for `id` to completion.
    ///
    /// Returns `Cached` on success. On error the entry goes back to
    /// `Unchecked`, so a later call starts over. The work continues even if
    /// the returned future is dropped.
    pub async fn check_and_render(self: &Arc<Self>, id: &TileId) -> Result<TileState, TileError> {
        let (entry, _) = self.entry(id).await;

        match self.spawn_check(id, Arc::clone(&entry)).await {
            Ok(result) => result,
            Err(e) => {
                error!(tile_id = %id, error = %e, "Tile check/render task failed");
                entry.set_state(TileState::Unchecked).await;
                Err(TileError::Render {
                    tile_id: id.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Image handle for `id`, creating the entry on first request.
    ///
    /// Repeated calls return the same `Arc`. A newly created handle points at
    /// the stored blob URL while the check/render runs in the background.
    /// An entry left `Unchecked` by a failed attempt is retried here.
    pub async fn get_image(self: &Arc<Self>, id: &TileId) -> Arc<TileImage> {
        let (entry, created) = self.entry(id).await;

        if created || entry.state().await == TileState::Unchecked {
            // Detached; failures are logged by check_and_render_entry
            drop(self.spawn_check(id, Arc::clone(&entry)));
        }

        Arc::clone(&entry.image)
    }

    /// Wait for tile `id` to be stored and return its PNG.
    ///
    /// Served from memory when this cache rendered the tile, otherwise
    /// fetched from the store.
    pub async fn get_tile(self: &Arc<Self>, id: &TileId) -> Result<TileResponse, TileError> {
        let cache_hit = self.state(id).await == Some(TileState::Cached);
        self.check_and_render(id).await?;

        let (entry, _) = self.entry(id).await;
        let data = match entry.image.source().await {
            TileSource::Rendered(data) => data,
            TileSource::Remote(_) => {
                self.with_retry("fetch", id, || {
                    self.store.get_blob(&self.config.doc_id, id.as_str())
                })
                .await?
            }
        };

        Ok(TileResponse {
            id: id.clone(),
            data,
            cache_hit,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
