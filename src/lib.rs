//! # Pageforest Tiles
//!
//! Quadtree tile addressing and a render-on-miss tile cache backed by
//! document blob storage.
//!
//! A 2D space (by default `[-2, -2, 2, 2]`) is split recursively into
//! quadrants. Each tile is named by its path from the root, `"0"` followed by
//! one digit `0..=3` per level and `".png"`. Tiles are looked up in a blob
//! store first and rendered, encoded and uploaded only when missing.
//!
//! ## Modules
//!
//! - [`tile`] - addressing, the tile cache, rendering and PNG encoding
//! - [`storage`] - the [`BlobStore`] trait with memory and S3 backends
//! - [`server`] - Axum HTTP surface over the tile cache
//! - [`config`] - CLI and configuration types
//! - [`error`] - error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pageforest_tiles::{MandelbrotRenderer, MemoryBlobStore, TileCache, TileCacheConfig, TileId};
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = Arc::new(TileCache::new(
//!         MemoryBlobStore::default(),
//!         MandelbrotRenderer::new(),
//!         TileCacheConfig::new("mandelbrot-tiles-v1"),
//!     ));
//!
//!     let id = TileId::parse("0123.png").unwrap();
//!     let state = cache.check_and_render(&id).await.unwrap();
//!     println!("{} is {}", id, state);
//! }
//! ```

pub mod config;
pub mod error;
pub mod server;
pub mod storage;
pub mod tile;

pub use config::{Cli, Command, ServeConfig};
pub use error::{StorageError, TileError};
pub use server::{create_router, RouterConfig};
pub use storage::{BlobOptions, BlobStore, DocAttributes, MemoryBlobStore, S3BlobStore};
pub use tile::{
    create_tile_doc, rect_from_tile_name, tile_name, MandelbrotRenderer, PngTileEncoder,
    TileCache, TileCacheConfig, TileCoord, TileId, TileImage, TileRect, TileRenderer, TileSpace,
    TileState,
};
