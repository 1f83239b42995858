//! S3-backed blob store.
//!
//! Blobs are objects keyed `{prefix}{doc_id}/{blob_id}`. Document attributes
//! are a JSON object at `{prefix}{doc_id}/_doc.json`. Blob tags travel in the
//! `tags` object metadata entry as a comma-separated list.

use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use url::Url;

use super::{blob_url, BlobOptions, BlobStore, DocAttributes};
use crate::error::StorageError;

/// Blob id under which document attributes are stored.
pub const DOC_ATTRIBUTES_BLOB: &str = "_doc.json";

/// Metadata key carrying blob tags.
const TAGS_METADATA_KEY: &str = "tags";

/// S3 implementation of [`BlobStore`].
///
/// `doc_url` points at the tile server's `/docs/...` route rather than at the
/// bucket, so buckets can stay private.
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    prefix: String,
    public_url: Url,
}

impl S3BlobStore {
    /// Create a store over `bucket`.
    ///
    /// # Arguments
    /// * `client` - AWS S3 client to use for requests
    /// * `bucket` - Bucket holding the documents
    /// * `prefix` - Key prefix for all documents (may be empty)
    /// * `public_url` - Base URL handed out by `doc_url`
    pub fn new(client: Client, bucket: String, prefix: String, public_url: Url) -> Self {
        Self {
            client,
            bucket,
            prefix,
            public_url,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key for a blob.
    pub fn key(&self, doc_id: &str, blob_id: &str) -> String {
        format!("{}{}/{}", self.prefix, doc_id, blob_id)
    }

    fn location(&self, doc_id: &str, blob_id: &str) -> String {
        format!("s3://{}/{}", self.bucket, self.key(doc_id, blob_id))
    }
}

/// Transport-level failures that never reached S3.
fn is_network_error<E, R>(err: &SdkError<E, R>) -> bool {
    matches!(
        err,
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)
    )
}

/// Whether the stem of `blob_id` (before the first '.') equals `tag`.
fn is_tag_itself(blob_id: &str, tag: &str) -> bool {
    blob_id.split('.').next() == Some(tag)
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn doc_url(&self, doc_id: &str, blob_id: &str) -> Url {
        blob_url(&self.public_url, doc_id, blob_id)
    }

    async fn get_blob(&self, doc_id: &str, blob_id: &str) -> Result<Bytes, StorageError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(doc_id, blob_id))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(self.location(doc_id, blob_id))
                } else if is_network_error(&e) {
                    StorageError::Network(e.to_string())
                } else {
                    StorageError::S3(e.to_string())
                }
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?
            .into_bytes();

        Ok(data)
    }

    async fn blob_exists(&self, doc_id: &str, blob_id: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(doc_id, blob_id))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let is_not_found = e.as_service_error().is_some_and(|se| se.is_not_found())
                    || e.raw_response()
                        .is_some_and(|r| r.status().as_u16() == 404);

                if is_not_found {
                    Ok(false)
                } else if is_network_error(&e) {
                    Err(StorageError::Network(e.to_string()))
                } else {
                    Err(StorageError::S3(e.to_string()))
                }
            }
        }
    }

    async fn put_blob(
        &self,
        doc_id: &str,
        blob_id: &str,
        data: Bytes,
        options: &BlobOptions,
    ) -> Result<(), StorageError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(doc_id, blob_id))
            .body(ByteStream::from(data));

        if let Some(ref content_type) = options.content_type {
            request = request.content_type(content_type);
        }
        if !options.tags.is_empty() {
            request = request.metadata(TAGS_METADATA_KEY, options.tags.join(","));
        }

        request.send().await.map_err(|e| {
            if is_network_error(&e) {
                StorageError::Network(e.to_string())
            } else {
                StorageError::S3(e.to_string())
            }
        })?;

        Ok(())
    }

    async fn put_doc(&self, doc_id: &str, attributes: &DocAttributes) -> Result<(), StorageError> {
        let body =
            serde_json::to_vec(attributes).map_err(|e| StorageError::InvalidDocument {
                doc_id: doc_id.to_string(),
                message: e.to_string(),
            })?;

        let options = BlobOptions {
            content_type: Some("application/json".to_string()),
            tags: Vec::new(),
        };
        self.put_blob(doc_id, DOC_ATTRIBUTES_BLOB, Bytes::from(body), &options)
            .await
    }

    /// Lists by key prefix. S3 cannot query metadata, so a tag filter is
    /// served as the key prefix `{doc_id}/{tag}`; this matches the ancestor
    /// tags that tile uploads carry.
    async fn list_blobs(
        &self,
        doc_id: &str,
        tag: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        let doc_prefix = self.key(doc_id, "");
        let list_prefix = format!("{}{}", doc_prefix, tag.unwrap_or(""));

        let mut ids = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&list_prefix)
                .max_keys(1000);

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let result = request.send().await.map_err(|e| {
                if is_network_error(&e) {
                    StorageError::Network(e.to_string())
                } else {
                    StorageError::S3(e.to_string())
                }
            })?;

            for obj in result.contents() {
                let Some(blob_id) = obj.key().and_then(|k| k.strip_prefix(&doc_prefix)) else {
                    continue;
                };
                if blob_id == DOC_ATTRIBUTES_BLOB {
                    continue;
                }
                if tag.is_some_and(|t| is_tag_itself(blob_id, t)) {
                    continue;
                }
                ids.push(blob_id.to_string());
            }

            if result.is_truncated() == Some(true) {
                continuation_token = result.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services generally need path-style addressing
    let s3_config = if endpoint_url.is_some() {
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build()
    } else {
        aws_sdk_s3::config::Builder::from(&sdk_config).build()
    };

    Client::from_conf(s3_config)
}
