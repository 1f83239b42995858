use thiserror::Error;

/// Errors returned by blob storage backends
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Blob or document does not exist
    #[error("Blob not found: {0}")]
    NotFound(String),

    /// Network or connection error talking to the store
    #[error("Network error: {0}")]
    Network(String),

    /// Error reported by S3 or an S3-compatible service
    #[error("S3 error: {0}")]
    S3(String),

    /// Document attributes could not be stored or read back
    #[error("Invalid document {doc_id}: {message}")]
    InvalidDocument { doc_id: String, message: String },
}

impl StorageError {
    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Network(_))
    }
}

/// Errors from tile addressing, rendering and caching
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Coordinate lies outside the 2^zoom grid
    #[error("Invalid tile coordinate ({x}, {y}) at zoom {zoom}")]
    InvalidCoordinate { x: i64, y: i64, zoom: u32 },

    /// String is not a well-formed tile id
    #[error("Invalid tile id '{id}': {reason}")]
    InvalidTileId { id: String, reason: &'static str },

    /// Tile blob is not present in the store
    #[error("Tile not found: {0}")]
    NotFound(String),

    /// Network failure while checking or uploading a tile
    #[error("Network error: {0}")]
    Network(String),

    /// Render callback failed
    #[error("Render failed for {tile_id}: {message}")]
    Render { tile_id: String, message: String },

    /// Surface could not be encoded
    #[error("Failed to encode tile: {message}")]
    Encode { message: String },

    /// Any other storage failure
    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for TileError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) => TileError::NotFound(path),
            StorageError::Network(msg) => TileError::Network(msg),
            other => TileError::Storage(other),
        }
    }
}
