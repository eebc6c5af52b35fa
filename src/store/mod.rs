//! Object Store Abstraction
//!
//! The reconciliation engine only ever talks to buckets through the
//! [`ObjectStore`] trait. Concrete stores are constructed by the caller and
//! injected, so tests can substitute an in-memory or fault-injecting store.
//!
//! Implementations:
//! - `InMemoryObjectStore`: unit tests and DST
//! - `LocalFsObjectStore`: development, buckets are directories
//! - `SimulatedObjectStore`: fault injection wrapper around any store
//! - `S3ObjectStore`: production (feature-gated)

pub mod local_fs;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;
pub mod simulated;

pub use local_fs::LocalFsObjectStore;
pub use memory::InMemoryObjectStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;
pub use simulated::{SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats};

use crate::error::StoreResult;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Key suffix that marks a directory placeholder object
pub const DIRECTORY_MARKER: char = '/';

/// Boxed future returned by store calls
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Metadata for a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object key, unique within its bucket
    pub key: String,
    /// ETag or content hash, when the store exposes one
    pub etag: Option<String>,
    /// Size in bytes
    pub size: u64,
    /// Last modification time (Unix ms)
    pub last_modified_ms: u64,
}

impl ObjectMeta {
    pub fn is_directory_marker(&self) -> bool {
        self.key.ends_with(DIRECTORY_MARKER)
    }

    /// Content equality as far as the metadata can tell.
    ///
    /// Uses the etag when both sides have a plain one. A multipart etag
    /// depends on the part layout of the upload, not just the bytes, so when
    /// either side has one only the sizes are compared. Without etags it
    /// falls back to `(size, last_modified)`. Both fallbacks are
    /// approximations: different payloads of the same size can compare equal.
    pub fn same_content(&self, other: &ObjectMeta) -> bool {
        match (&self.etag, &other.etag) {
            (Some(a), Some(b)) if is_multipart_etag(a) || is_multipart_etag(b) => {
                self.size == other.size
            }
            (Some(a), Some(b)) => a == b,
            _ => self.size == other.size && self.last_modified_ms == other.last_modified_ms,
        }
    }
}

/// S3 multipart etags look like `"<md5>-<part count>"`
pub fn is_multipart_etag(etag: &str) -> bool {
    etag.trim_matches('"')
        .rsplit_once('-')
        .map_or(false, |(hash, parts)| {
            !hash.is_empty() && !parts.is_empty() && parts.bytes().all(|b| b.is_ascii_digit())
        })
}

/// One page of a bucket listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    /// Continuation token for the next page; `None` on the last page
    pub next_token: Option<String>,
}

/// Outcome of a delete call; a missing object is not an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Object store capability consumed by the lister and reconciler
///
/// Buckets are addressed by name on every call so one store instance can
/// serve both sides of a sync pair.
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch one page of `bucket`, starting after `continuation_token`
    fn list_page<'a>(
        &'a self,
        bucket: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListPage>;

    /// Look up one object's metadata; `None` when it does not exist
    fn head<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, Option<ObjectMeta>>;

    /// Copy an object, creating or overwriting the destination
    ///
    /// Fails with `StoreError::NotFound` when the source object is missing.
    fn copy<'a>(
        &'a self,
        source_bucket: &'a str,
        source_key: &'a str,
        dest_bucket: &'a str,
        dest_key: &'a str,
    ) -> StoreFuture<'a, ()>;

    /// Delete an object
    fn delete<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, DeleteOutcome>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<S> {
    fn list_page<'a>(
        &'a self,
        bucket: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListPage> {
        (**self).list_page(bucket, continuation_token)
    }

    fn head<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, Option<ObjectMeta>> {
        (**self).head(bucket, key)
    }

    fn copy<'a>(
        &'a self,
        source_bucket: &'a str,
        source_key: &'a str,
        dest_bucket: &'a str,
        dest_key: &'a str,
    ) -> StoreFuture<'a, ()> {
        (**self).copy(source_bucket, source_key, dest_bucket, dest_key)
    }

    fn delete<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, DeleteOutcome> {
        (**self).delete(bucket, key)
    }
}

/// Hex-encoded SHA-1 of a payload, used as the etag by local stores
pub fn content_hash(data: &[u8]) -> String {
    use sha1::{Digest, Sha1};
    hex::encode(Sha1::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(key: &str, etag: Option<&str>, size: u64, ts: u64) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            etag: etag.map(String::from),
            size,
            last_modified_ms: ts,
        }
    }

    #[test]
    fn test_same_content_prefers_etag() {
        // Same etag wins even when timestamps differ
        assert!(meta("a", Some("h1"), 3, 1).same_content(&meta("a", Some("h1"), 3, 99)));
        // Different etag loses even when size and time match
        assert!(!meta("a", Some("h1"), 3, 1).same_content(&meta("a", Some("h2"), 3, 1)));
    }

    #[test]
    fn test_same_content_falls_back_to_size_and_time() {
        assert!(meta("a", None, 3, 1).same_content(&meta("a", Some("h1"), 3, 1)));
        assert!(!meta("a", None, 3, 1).same_content(&meta("a", None, 4, 1)));
        assert!(!meta("a", None, 3, 1).same_content(&meta("a", None, 3, 2)));
    }

    #[test]
    fn test_multipart_etag_compares_size() {
        let source = meta("big.bin", Some("\"9b2cf535f27731c974343645a3985328-3\""), 20, 1);
        let copied = meta("big.bin", Some("\"e1a7d3b4c0f26b8a2e5d9c7f3a1b4e60-2\""), 20, 50);
        let truncated = meta("big.bin", Some("\"e1a7d3b4c0f26b8a2e5d9c7f3a1b4e60-2\""), 19, 50);
        let plain = meta("big.bin", Some("\"9b2cf535f27731c974343645a3985328\""), 20, 50);

        assert!(source.same_content(&copied));
        assert!(!source.same_content(&truncated));
        assert!(plain.same_content(&source));
    }

    #[test]
    fn test_multipart_etag_detection() {
        assert!(is_multipart_etag("\"9b2cf535f27731c974343645a3985328-3\""));
        assert!(is_multipart_etag("abc-12"));
        assert!(!is_multipart_etag("\"9b2cf535f27731c974343645a3985328\""));
        assert!(!is_multipart_etag(&content_hash(b"x")));
        assert!(!is_multipart_etag("abc-"));
        assert!(!is_multipart_etag("abc-v2"));
    }

    #[test]
    fn test_directory_marker() {
        assert!(meta("photos/", None, 0, 0).is_directory_marker());
        assert!(!meta("photos/a.jpg", None, 0, 0).is_directory_marker());
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(
            content_hash(b"hello"),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
        assert_ne!(content_hash(b"hello"), content_hash(b"hello!"));
    }
}
