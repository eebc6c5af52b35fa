//! S3 Object Store Implementation
//!
//! Production backend built on the `object_store` crate from the Arrow
//! ecosystem. Works against AWS S3 and S3-compatible services (MinIO,
//! LocalStack) via a custom endpoint.
//!
//! `object_store` paths cannot end in `/`, so directory placeholder objects
//! are invisible to this backend.
//!
//! Large cross-bucket copies stream through a multipart upload and never hold
//! the whole object in memory. The target of such a copy gets a multipart
//! etag (`<md5>-<parts>`) that need not match the source's, so
//! `ObjectMeta::same_content` compares sizes when either side has one.

use super::{DeleteOutcome, ListPage, ObjectMeta, ObjectStore, StoreFuture};
use crate::config::S3Config;
use crate::error::{StoreError, StoreResult};
use futures::StreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore as ObjectStoreTrait, WriteMultipart};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

const PAGE_SIZE: usize = 1000;

/// Cross-bucket copies above this size stream through a multipart upload
const SINGLE_PUT_LIMIT: usize = 16 * 1024 * 1024;

/// Parts buffered or uploading at once during a streamed copy
const MAX_PARTS_IN_FLIGHT: usize = 4;

/// S3 store addressing any number of buckets
///
/// One `AmazonS3` client is built lazily per bucket and cached.
/// Credentials come from the standard `AWS_*` environment variables.
#[derive(Clone)]
pub struct S3ObjectStore {
    config: S3Config,
    clients: Arc<RwLock<HashMap<String, Arc<AmazonS3>>>>,
    page_size: usize,
}

impl S3ObjectStore {
    pub fn new(config: S3Config) -> Self {
        S3ObjectStore {
            config,
            clients: Arc::new(RwLock::new(HashMap::new())),
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn client(&self, bucket: &str) -> StoreResult<Arc<AmazonS3>> {
        if let Some(client) = self.clients.read().get(bucket) {
            return Ok(client.clone());
        }

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(&self.config.region);

        // Custom endpoint for S3-compatible services (MinIO)
        if let Some(endpoint) = &self.config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
        }

        let client = Arc::new(builder.build().map_err(|e| {
            StoreError::Other(format!("failed to create S3 client for {}: {}", bucket, e))
        })?);

        Ok(self
            .clients
            .write()
            .entry(bucket.to_string())
            .or_insert(client)
            .clone())
    }

    fn convert_meta(meta: object_store::ObjectMeta) -> ObjectMeta {
        ObjectMeta {
            key: meta.location.to_string(),
            etag: meta.e_tag,
            size: meta.size as u64,
            last_modified_ms: meta.last_modified.timestamp_millis().try_into().unwrap_or(0),
        }
    }
}

/// Convert object_store errors to StoreError
fn map_error(err: object_store::Error) -> StoreError {
    match &err {
        object_store::Error::NotFound { path, .. } => StoreError::NotFound(path.clone()),
        _ => {
            let msg = err.to_string();
            if is_permission_error(&msg) {
                StoreError::PermissionDenied(msg)
            } else if msg.contains("NoSuchBucket") {
                StoreError::BucketNotFound(msg)
            } else {
                // object_store has already exhausted its own retries by now
                StoreError::Transient(msg)
            }
        }
    }
}

fn is_permission_error(msg: &str) -> bool {
    msg.contains("AccessDenied")
        || msg.contains("403")
        || msg.contains("InvalidAccessKeyId")
        || msg.contains("SignatureDoesNotMatch")
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("region", &self.config.region)
            .field("endpoint", &self.config.endpoint)
            .finish()
    }
}

impl ObjectStore for S3ObjectStore {
    fn list_page<'a>(
        &'a self,
        bucket: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListPage> {
        Box::pin(async move {
            let client = self.client(bucket)?;

            // The token is the last key of the previous page
            let stream = match continuation_token {
                Some(token) => client.list_with_offset(None, &ObjectPath::from(token)),
                None => client.list(None),
            };
            let results: Vec<_> = stream.take(self.page_size + 1).collect().await;

            let mut objects = Vec::with_capacity(results.len());
            for result in results {
                objects.push(Self::convert_meta(result.map_err(map_error)?));
            }

            let next_token = if objects.len() > self.page_size {
                objects.truncate(self.page_size);
                objects.last().map(|m| m.key.clone())
            } else {
                None
            };
            Ok(ListPage {
                objects,
                next_token,
            })
        })
    }

    fn head<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, Option<ObjectMeta>> {
        Box::pin(async move {
            let client = self.client(bucket)?;
            match client.head(&ObjectPath::from(key)).await {
                Ok(meta) => Ok(Some(Self::convert_meta(meta))),
                Err(object_store::Error::NotFound { .. }) => Ok(None),
                Err(e) => Err(map_error(e)),
            }
        })
    }

    fn copy<'a>(
        &'a self,
        source_bucket: &'a str,
        source_key: &'a str,
        dest_bucket: &'a str,
        dest_key: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let from = ObjectPath::from(source_key);
            let to = ObjectPath::from(dest_key);
            let source = self.client(source_bucket)?;

            if source_bucket == dest_bucket {
                return source.copy(&from, &to).await.map_err(map_error);
            }

            // Cross-bucket: object_store copies only within one bucket
            let dest = self.client(dest_bucket)?;
            let object = source.get(&from).await.map_err(map_error)?;

            // A single put keeps the plain MD5 etag so the diff can compare
            // it against the source
            if object.meta.size <= SINGLE_PUT_LIMIT {
                let data = object.bytes().await.map_err(map_error)?;
                dest.put(&to, data.into()).await.map_err(map_error)?;
                return Ok(());
            }

            let upload = dest.put_multipart(&to).await.map_err(map_error)?;
            let mut writer = WriteMultipart::new(upload);
            let mut chunks = object.into_stream();
            while let Some(chunk) = chunks.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = writer.abort().await;
                        return Err(map_error(e));
                    }
                };
                if let Err(e) = writer.wait_for_capacity(MAX_PARTS_IN_FLIGHT).await {
                    let _ = writer.abort().await;
                    return Err(map_error(e));
                }
                writer.write(&chunk);
            }
            writer.finish().await.map_err(map_error)?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, DeleteOutcome> {
        Box::pin(async move {
            let client = self.client(bucket)?;
            // S3 deletes succeed for missing keys; NotFound only shows up on
            // S3-compatible services that report it
            match client.delete(&ObjectPath::from(key)).await {
                Ok(()) => Ok(DeleteOutcome::Deleted),
                Err(object_store::Error::NotFound { .. }) => Ok(DeleteOutcome::NotFound),
                Err(e) => Err(map_error(e)),
            }
        })
    }
}
