//! In-process blob store.
//!
//! Used by tests and by `serve --storage memory` for local development.
//! Blobs live until the process exits.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use url::Url;

use super::{blob_url, BlobOptions, BlobStore, DocAttributes};
use crate::error::StorageError;

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    tags: Vec<String>,
}

#[derive(Debug, Default)]
struct MemoryDoc {
    attributes: Option<DocAttributes>,
    blobs: HashMap<String, StoredBlob>,
}

/// Blob store backed by a `HashMap`.
///
/// Uploading into a document that was never created with `put_doc` creates
/// it implicitly, without attributes.
pub struct MemoryBlobStore {
    base_url: Url,
    docs: RwLock<HashMap<String, MemoryDoc>>,
}

impl MemoryBlobStore {
    /// Create an empty store whose `doc_url`s are rooted at `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            docs: RwLock::new(HashMap::new()),
        }
    }

    /// Attributes of a document, if it was created with `put_doc`.
    pub async fn doc(&self, doc_id: &str) -> Option<DocAttributes> {
        let docs = self.docs.read().await;
        docs.get(doc_id).and_then(|d| d.attributes.clone())
    }

    /// Tags stored with a blob.
    pub async fn blob_tags(&self, doc_id: &str, blob_id: &str) -> Option<Vec<String>> {
        let docs = self.docs.read().await;
        docs.get(doc_id)
            .and_then(|d| d.blobs.get(blob_id))
            .map(|b| b.tags.clone())
    }

    /// Total number of blobs across all documents.
    pub async fn blob_count(&self) -> usize {
        let docs = self.docs.read().await;
        docs.values().map(|d| d.blobs.len()).sum()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        // Parsing a constant, well-formed URL
        Self::new(Url::parse("http://localhost:3000").expect("valid default base URL"))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn doc_url(&self, doc_id: &str, blob_id: &str) -> Url {
        blob_url(&self.base_url, doc_id, blob_id)
    }

    async fn get_blob(&self, doc_id: &str, blob_id: &str) -> Result<Bytes, StorageError> {
        let docs = self.docs.read().await;
        docs.get(doc_id)
            .and_then(|d| d.blobs.get(blob_id))
            .map(|b| b.data.clone())
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", doc_id, blob_id)))
    }

    async fn blob_exists(&self, doc_id: &str, blob_id: &str) -> Result<bool, StorageError> {
        let docs = self.docs.read().await;
        Ok(docs
            .get(doc_id)
            .is_some_and(|d| d.blobs.contains_key(blob_id)))
    }

    async fn put_blob(
        &self,
        doc_id: &str,
        blob_id: &str,
        data: Bytes,
        options: &BlobOptions,
    ) -> Result<(), StorageError> {
        let mut docs = self.docs.write().await;
        docs.entry(doc_id.to_string()).or_default().blobs.insert(
            blob_id.to_string(),
            StoredBlob {
                data,
                tags: options.tags.clone(),
            },
        );
        Ok(())
    }

    async fn put_doc(&self, doc_id: &str, attributes: &DocAttributes) -> Result<(), StorageError> {
        let mut docs = self.docs.write().await;
        docs.entry(doc_id.to_string()).or_default().attributes = Some(attributes.clone());
        Ok(())
    }

    async fn list_blobs(
        &self,
        doc_id: &str,
        tag: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        let docs = self.docs.read().await;
        let doc = docs
            .get(doc_id)
            .ok_or_else(|| StorageError::NotFound(doc_id.to_string()))?;

        let mut ids: Vec<String> = doc
            .blobs
            .iter()
            .filter(|(_, blob)| tag.map_or(true, |t| blob.tags.iter().any(|bt| bt == t)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
