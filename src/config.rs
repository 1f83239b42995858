//! Command-line configuration.
//!
//! Every `serve` and storage option can also come from a `TILES_`-prefixed
//! environment variable:
//!
//! - `TILES_HOST`, `TILES_PORT` - bind address (default `0.0.0.0:3000`)
//! - `TILES_STORAGE` - `memory` or `s3` (default `memory`)
//! - `TILES_S3_BUCKET`, `TILES_S3_PREFIX`, `TILES_S3_ENDPOINT`, `TILES_S3_REGION`
//! - `TILES_PUBLIC_URL` - base URL handed out for stored blobs
//! - `TILES_DOC_PREFIX`, `TILES_DOC_VERSION`, `TILES_DOC_ID` - tile document
//! - `TILES_TILE_SIZE`, `TILES_MAX_ITERATIONS` - rendering
//! - `TILES_RETRY_ATTEMPTS`, `TILES_RETRY_DELAY_MS` - storage retries
//! - `TILES_CACHE_MAX_AGE`, `TILES_CORS_ORIGINS` - HTTP caching and CORS

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use url::Url;

use crate::tile::{
    tile_doc_id, RetryPolicy, TileRect, TileSpace, DEFAULT_DOC_PREFIX, DEFAULT_MAX_ITERATIONS,
    DEFAULT_TILE_SIZE,
};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_PUBLIC_URL: &str = "http://localhost:3000";
pub const DEFAULT_DOC_VERSION: &str = "v1";

/// HTTP cache max-age in seconds (1 day).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 86400;

/// Largest tile edge accepted, in pixels.
pub const MAX_TILE_SIZE: u32 = 4096;

// =============================================================================
// CLI
// =============================================================================

/// Pageforest tiles - quadtree tile addressing with a render-on-miss cache.
#[derive(Parser, Debug)]
#[command(name = "pageforest-tiles")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve tiles over HTTP, rendering missing ones on demand
    Serve(ServeConfig),

    /// Print the tile id for a grid coordinate
    Name(NameConfig),

    /// Print the rectangle a tile id covers
    Rect(RectConfig),

    /// Render one tile to a PNG file
    Render(RenderConfig),

    /// Create the document that owns a tile version
    CreateDoc(CreateDocConfig),
}

// =============================================================================
// Shared Options
// =============================================================================

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// In-process store; contents are lost on exit
    Memory,
    /// S3 or an S3-compatible service
    S3,
}

/// Where blobs are stored.
#[derive(Args, Debug, Clone)]
pub struct StorageConfig {
    #[arg(long, value_enum, default_value = "memory", env = "TILES_STORAGE")]
    pub storage: StorageBackend,

    /// S3 bucket (required with `--storage s3`)
    #[arg(long, env = "TILES_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Key prefix for all documents in the bucket
    #[arg(long, default_value = "", env = "TILES_S3_PREFIX")]
    pub s3_prefix: String,

    /// Custom endpoint for S3-compatible services (MinIO, etc.)
    #[arg(long, env = "TILES_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[arg(long, default_value = DEFAULT_REGION, env = "TILES_S3_REGION")]
    pub s3_region: String,

    /// Base URL for blob locations handed to clients
    #[arg(long, default_value = DEFAULT_PUBLIC_URL, env = "TILES_PUBLIC_URL")]
    pub public_url: String,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.storage == StorageBackend::S3
            && self.s3_bucket.as_deref().map_or(true, str::is_empty)
        {
            return Err(
                "S3 storage selected but no bucket given. Set --s3-bucket or TILES_S3_BUCKET"
                    .to_string(),
            );
        }
        self.public_url()?;
        Ok(())
    }

    pub fn public_url(&self) -> Result<Url, String> {
        Url::parse(&self.public_url).map_err(|e| format!("Invalid public URL: {}", e))
    }

    pub fn bucket(&self) -> &str {
        self.s3_bucket.as_deref().unwrap_or("")
    }
}

/// Which document holds the tiles.
#[derive(Args, Debug, Clone)]
pub struct DocConfig {
    #[arg(long, default_value = DEFAULT_DOC_PREFIX, env = "TILES_DOC_PREFIX")]
    pub doc_prefix: String,

    #[arg(long, default_value = DEFAULT_DOC_VERSION, env = "TILES_DOC_VERSION")]
    pub doc_version: String,

    /// Explicit document id; overrides prefix and version
    #[arg(long, env = "TILES_DOC_ID")]
    pub doc_id: Option<String>,
}

impl DocConfig {
    pub fn doc_id(&self) -> String {
        match &self.doc_id {
            Some(id) => id.clone(),
            None => tile_doc_id(&self.doc_prefix, &self.doc_version),
        }
    }
}

/// Parse `x_min,y_min,x_max,y_max`.
pub fn parse_rect(s: &str) -> Result<TileRect, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid number in rectangle: {}", e))?;

    match values.as_slice() {
        &[x_min, y_min, x_max, y_max] if x_min < x_max && y_min < y_max => {
            Ok(TileRect::new(x_min, y_min, x_max, y_max))
        }
        [_, _, _, _] => Err("rectangle must have x_min < x_max and y_min < y_max".to_string()),
        _ => Err(format!("expected 4 comma-separated values, got {}", values.len())),
    }
}

// =============================================================================
// Serve
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    #[arg(long, default_value = DEFAULT_HOST, env = "TILES_HOST")]
    pub host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "TILES_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub storage: StorageConfig,

    #[command(flatten)]
    pub doc: DocConfig,

    /// Create the tile document on startup if missing
    #[arg(long, default_value_t = false, env = "TILES_CREATE_DOC")]
    pub create_doc: bool,

    /// Tile edge length in pixels
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "TILES_TILE_SIZE")]
    pub tile_size: u32,

    /// Root rectangle as `x_min,y_min,x_max,y_max`
    #[arg(
        long,
        value_parser = parse_rect,
        allow_hyphen_values = true,
        default_value = "-2,-2,2,2",
        env = "TILES_ROOT"
    )]
    pub root: TileRect,

    /// Escape-time iteration limit for the Mandelbrot renderer
    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS, env = "TILES_MAX_ITERATIONS")]
    pub max_iterations: u32,

    /// HTTP Cache-Control max-age in seconds
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "TILES_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated); any origin if unset
    #[arg(long, env = "TILES_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Storage attempts per operation (1 disables retries)
    #[arg(long, default_value_t = 1, env = "TILES_RETRY_ATTEMPTS")]
    pub retry_attempts: u32,

    /// Pause between storage attempts, in milliseconds
    #[arg(long, default_value_t = 200, env = "TILES_RETRY_DELAY_MS")]
    pub retry_delay_ms: u64,

    /// Debug-level logging
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable per-request tracing
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;

        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(format!("tile_size must be between 1 and {}", MAX_TILE_SIZE));
        }

        if self.max_iterations == 0 {
            return Err("max_iterations must be greater than 0".to_string());
        }

        if self.retry_attempts == 0 {
            return Err("retry_attempts must be at least 1".to_string());
        }

        if self.doc.doc_id().is_empty() {
            return Err("doc_id must not be empty".to_string());
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tile_space(&self) -> TileSpace {
        TileSpace::new(self.root, self.tile_size)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        if self.retry_attempts <= 1 {
            RetryPolicy::none()
        } else {
            RetryPolicy::new(
                self.retry_attempts,
                Duration::from_millis(self.retry_delay_ms),
            )
        }
    }
}

// =============================================================================
// Addressing Commands
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct NameConfig {
    #[arg(allow_negative_numbers = true)]
    pub x: i64,

    #[arg(allow_negative_numbers = true)]
    pub y: i64,

    pub zoom: u32,
}

#[derive(Args, Debug, Clone)]
pub struct RectConfig {
    /// Tile id, e.g. `0123.png`
    pub tile_id: String,

    #[arg(
        long,
        value_parser = parse_rect,
        allow_hyphen_values = true,
        default_value = "-2,-2,2,2"
    )]
    pub root: TileRect,
}

#[derive(Args, Debug, Clone)]
pub struct RenderConfig {
    pub tile_id: String,

    /// Output PNG path; defaults to the tile id
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(
        long,
        value_parser = parse_rect,
        allow_hyphen_values = true,
        default_value = "-2,-2,2,2"
    )]
    pub root: TileRect,

    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    pub tile_size: u32,

    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
    pub max_iterations: u32,
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(format!("tile_size must be between 1 and {}", MAX_TILE_SIZE));
        }
        Ok(())
    }

    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.tile_id))
    }
}

// =============================================================================
// Create Doc
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct CreateDocConfig {
    #[command(flatten)]
    pub storage: StorageConfig,

    #[arg(long, default_value = DEFAULT_DOC_PREFIX, env = "TILES_DOC_PREFIX")]
    pub doc_prefix: String,

    #[arg(long, default_value = DEFAULT_DOC_VERSION, env = "TILES_DOC_VERSION")]
    pub doc_version: String,

    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

/// Default root used by commands that take `--root`.
pub fn root_rect() -> TileRect {
    TileSpace::default().root
}

// =============================================================================
// Tests
// =============================================================================
