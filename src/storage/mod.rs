//! Blob storage clients.
//!
//! Tiles are persisted as blobs under a document. The [`BlobStore`] trait is
//! the only thing the tile cache knows about storage:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               TileCache                 │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            BlobStore Trait              │
//! │  doc_url / get_blob / put_blob / put_doc│
//! └────────────────────┬────────────────────┘
//!                      │
//!          ┌───────────┴───────────┐
//!          ▼                       ▼
//! ┌─────────────────┐    ┌─────────────────────┐
//! │ MemoryBlobStore │    │    S3BlobStore      │
//! └─────────────────┘    └─────────────────────┘
//! ```

mod memory;
mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::StorageError;

pub use memory::MemoryBlobStore;
pub use s3::{create_s3_client, S3BlobStore, DOC_ATTRIBUTES_BLOB};

/// Options attached to an uploaded blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobOptions {
    /// MIME type of the payload
    pub content_type: Option<String>,

    /// Tags for listing related blobs together
    pub tags: Vec<String>,
}

impl BlobOptions {
    pub fn png() -> Self {
        Self {
            content_type: Some("image/png".to_string()),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Attributes of a document, the namespace that owns a set of blobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocAttributes {
    pub title: String,

    /// Principals allowed to read blobs (`"public"` for anyone)
    #[serde(default)]
    pub readers: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

/// A storage backend holding documents and their blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// URL at which a blob can be fetched by a client.
    fn doc_url(&self, doc_id: &str, blob_id: &str) -> Url;

    /// Fetch a blob. Missing blobs are `StorageError::NotFound`.
    async fn get_blob(&self, doc_id: &str, blob_id: &str) -> Result<Bytes, StorageError>;

    /// Check whether a blob exists.
    ///
    /// The default fetches the blob; backends with a cheaper existence check override it.
    async fn blob_exists(&self, doc_id: &str, blob_id: &str) -> Result<bool, StorageError> {
        match self.get_blob(doc_id, blob_id).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Store a blob, replacing any previous version.
    async fn put_blob(
        &self,
        doc_id: &str,
        blob_id: &str,
        data: Bytes,
        options: &BlobOptions,
    ) -> Result<(), StorageError>;

    /// Create or update a document.
    async fn put_doc(&self, doc_id: &str, attributes: &DocAttributes) -> Result<(), StorageError>;

    /// Blob ids in a document, sorted, optionally restricted to one tag.
    async fn list_blobs(
        &self,
        doc_id: &str,
        tag: Option<&str>,
    ) -> Result<Vec<String>, StorageError>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    fn doc_url(&self, doc_id: &str, blob_id: &str) -> Url {
        (**self).doc_url(doc_id, blob_id)
    }

    async fn get_blob(&self, doc_id: &str, blob_id: &str) -> Result<Bytes, StorageError> {
        (**self).get_blob(doc_id, blob_id).await
    }

    async fn blob_exists(&self, doc_id: &str, blob_id: &str) -> Result<bool, StorageError> {
        (**self).blob_exists(doc_id, blob_id).await
    }

    async fn put_blob(
        &self,
        doc_id: &str,
        blob_id: &str,
        data: Bytes,
        options: &BlobOptions,
    ) -> Result<(), StorageError> {
        (**self).put_blob(doc_id, blob_id, data, options).await
    }

    async fn put_doc(&self, doc_id: &str, attributes: &DocAttributes) -> Result<(), StorageError> {
        (**self).put_doc(doc_id, attributes).await
    }

    async fn list_blobs(
        &self,
        doc_id: &str,
        tag: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        (**self).list_blobs(doc_id, tag).await
    }
}

/// `{base}/docs/{doc_id}/{blob_id}`, with each segment percent-encoded.
///
/// This is the route the HTTP server answers for stored blobs.
pub fn blob_url(base: &Url, doc_id: &str, blob_id: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().extend(["docs", doc_id, blob_id]);
    }
    url
}
