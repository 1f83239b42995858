//! Tile document lifecycle.
//!
//! All tiles of one rendering version live as blobs under a single document.
//! The document is created once, ahead of time, by an administrative command.

use tracing::info;

use crate::error::TileError;
use crate::storage::{BlobStore, DocAttributes};

/// Prefix for tile document ids.
pub const DEFAULT_DOC_PREFIX: &str = "mandelbrot-tiles";

/// Document id for a tile version, e.g. `"mandelbrot-tiles-v2"`.
///
/// Characters other than ASCII letters and digits become `-`.
pub fn tile_doc_id(prefix: &str, version: &str) -> String {
    let version: String = version
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{}-{}", prefix, version)
}

/// Create the shared, publicly readable document for `version`'s tiles.
///
/// Returns the document id.
pub async fn create_tile_doc<S: BlobStore + ?Sized>(
    store: &S,
    prefix: &str,
    version: &str,
) -> Result<String, TileError> {
    let doc_id = tile_doc_id(prefix, version);
    let attributes = DocAttributes {
        title: format!("Tiles ({})", version),
        readers: vec!["public".to_string()],
        tags: vec!["tiles".to_string(), format!("version:{}", version)],
    };

    store.put_doc(&doc_id, &attributes).await?;
    info!(doc_id = %doc_id, version = version, "Created tile document");

    Ok(doc_id)
}
