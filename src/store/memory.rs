//! In-memory object store for unit tests and deterministic simulation
//!
//! Holds any number of named buckets. Listing is paginated with start-after
//! continuation tokens, so pages stay consistent while other keys are
//! inserted or removed between calls.

use super::{content_hash, DeleteOutcome, ListPage, ObjectMeta, ObjectStore, StoreFuture};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

/// Default number of objects per listing page (matches S3)
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    etag: String,
    last_modified_ms: u64,
}

type Buckets = HashMap<String, BTreeMap<String, StoredObject>>;

/// In-memory, multi-bucket object store
///
/// Clones share the same underlying buckets.
#[derive(Debug, Clone)]
pub struct InMemoryObjectStore<C: Clock = SystemClock> {
    buckets: Arc<RwLock<Buckets>>,
    clock: C,
    page_size: usize,
    expose_etags: bool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::new())
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InMemoryObjectStore<C> {
    pub fn with_clock(clock: C) -> Self {
        InMemoryObjectStore {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            clock,
            page_size: DEFAULT_PAGE_SIZE,
            expose_etags: true,
        }
    }

    /// Set the listing page size (minimum 1)
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Hide etags from listings and heads, forcing the size/time fallback
    pub fn without_etags(mut self) -> Self {
        self.expose_etags = false;
        self
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.buckets.write().entry(bucket.to_string()).or_default();
    }

    /// Write an object, creating the bucket if needed
    pub fn put(&self, bucket: &str, key: &str, data: &[u8]) -> ObjectMeta {
        let obj = StoredObject {
            data: data.to_vec(),
            etag: content_hash(data),
            last_modified_ms: self.clock.now().as_millis(),
        };
        let meta = self.meta_of(key, &obj);
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), obj);
        meta
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets
            .read()
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|obj| obj.data.clone())
    }

    /// Remove an object directly, bypassing the store contract
    pub fn remove(&self, bucket: &str, key: &str) -> bool {
        self.buckets
            .write()
            .get_mut(bucket)
            .map(|b| b.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Sorted keys of a bucket (empty if the bucket does not exist)
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Full contents of a bucket, for assertions
    pub fn contents(&self, bucket: &str) -> BTreeMap<String, Vec<u8>> {
        self.buckets
            .read()
            .get(bucket)
            .map(|b| b.iter().map(|(k, v)| (k.clone(), v.data.clone())).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, bucket: &str) -> usize {
        self.buckets.read().get(bucket).map_or(0, |b| b.len())
    }

    pub fn is_empty(&self, bucket: &str) -> bool {
        self.len(bucket) == 0
    }

    fn meta_of(&self, key: &str, obj: &StoredObject) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            etag: self.expose_etags.then(|| obj.etag.clone()),
            size: obj.data.len() as u64,
            last_modified_ms: obj.last_modified_ms,
        }
    }
}

impl<C: Clock> ObjectStore for InMemoryObjectStore<C> {
    fn list_page<'a>(
        &'a self,
        bucket: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListPage> {
        Box::pin(async move {
            let buckets = self.buckets.read();
            let objects = buckets
                .get(bucket)
                .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;

            let start = match continuation_token {
                Some(token) => Bound::Excluded(token.to_string()),
                None => Bound::Unbounded,
            };

            // Fetch one extra entry to learn whether another page exists
            let mut page: Vec<ObjectMeta> = objects
                .range((start, Bound::Unbounded))
                .take(self.page_size + 1)
                .map(|(k, v)| self.meta_of(k, v))
                .collect();

            let next_token = if page.len() > self.page_size {
                page.truncate(self.page_size);
                page.last().map(|m| m.key.clone())
            } else {
                None
            };

            Ok(ListPage {
                objects: page,
                next_token,
            })
        })
    }

    fn head<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, Option<ObjectMeta>> {
        Box::pin(async move {
            let buckets = self.buckets.read();
            let objects = buckets
                .get(bucket)
                .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
            Ok(objects.get(key).map(|obj| self.meta_of(key, obj)))
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
            let mut buckets = self.buckets.write();
            // Copy keeps the source's etag and modification time.
            let obj = buckets
                .get(source_bucket)
                .ok_or_else(|| StoreError::BucketNotFound(source_bucket.to_string()))?
                .get(source_key)
                .cloned()
                .ok_or_else(|| {
                    StoreError::NotFound(format!("{}/{}", source_bucket, source_key))
                })?;
            buckets
                .get_mut(dest_bucket)
                .ok_or_else(|| StoreError::BucketNotFound(dest_bucket.to_string()))?
                .insert(dest_key.to_string(), obj);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, DeleteOutcome> {
        Box::pin(async move {
            let mut buckets = self.buckets.write();
            let objects = buckets
                .get_mut(bucket)
                .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
            Ok(match objects.remove(key) {
                Some(_) => DeleteOutcome::Deleted,
                None => DeleteOutcome::NotFound,
            })
        })
    }
}
