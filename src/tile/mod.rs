//! Tile addressing, rendering and caching.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               TileCache                 │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ TileRenderer │  │  PNG Encoder    │  │
//! │  │ (on a miss)  │  │                 │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               BlobStore                 │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileId`], [`TileCoord`], [`TileRect`]: quadtree addressing
//! - [`TileCache`]: image handles and the per-tile check/render state machine
//! - [`TileRenderer`], [`MandelbrotRenderer`]: drawing tiles on a miss
//! - [`PngTileEncoder`]: surfaces to PNG
//! - [`create_tile_doc`]: creating the document that owns the tiles
//!
//! # Example
//!
//! ```
//! use pageforest_tiles::tile::{rect_from_tile_name, tile_name, TileRect};
//!
//! let root = TileRect::new(-2.0, -2.0, 2.0, 2.0);
//! let id = tile_name(3, 3, 2).unwrap();
//! assert_eq!(id.as_str(), "033.png");
//! assert_eq!(rect_from_tile_name(&root, &id).as_array(), [1.0, 1.0, 2.0, 2.0]);
//!
//! // Outside the 2x2 grid at zoom 1
//! assert!(tile_name(2, 0, 1).is_none());
//! ```

mod address;
mod cache;
mod doc;
mod encoder;
mod render;

pub use address::{
    rect_from_tile_name, tile_name, TileCoord, TileId, TileRect, TileSpace, DEFAULT_TILE_SIZE,
    MAX_ZOOM, TILE_SUFFIX,
};
pub use cache::{
    CacheStats, RetryPolicy, TileCache, TileCacheConfig, TileImage, TileResponse, TileSource,
    TileState,
};
pub use doc::{create_tile_doc, tile_doc_id, DEFAULT_DOC_PREFIX};
pub use encoder::{is_png, PngTileEncoder, PNG_MAGIC};
pub use render::{escape_time, MandelbrotRenderer, TileRenderer, DEFAULT_MAX_ITERATIONS};
