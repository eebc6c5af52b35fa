//! Local filesystem object store for development and testing
//!
//! Each bucket is a directory under `base_path`; object keys are relative
//! paths inside it. Regular files are listed as objects and empty directories
//! as `dir/` markers. The etag of a file is the SHA-1 of its contents, so
//! copied files compare equal regardless of mtime.

use super::{content_hash, DeleteOutcome, ListPage, ObjectMeta, ObjectStore, StoreFuture};
use crate::error::{StoreError, StoreResult};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

const PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    base_path: PathBuf,
    page_size: usize,
}

impl LocalFsObjectStore {
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsObjectStore {
            base_path,
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Create the directory backing `bucket`
    pub fn create_bucket(&self, bucket: &str) -> StoreResult<()> {
        std::fs::create_dir_all(self.bucket_path(bucket)?)?;
        Ok(())
    }

    fn bucket_path(&self, bucket: &str) -> StoreResult<PathBuf> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
            return Err(StoreError::Other(format!("invalid bucket name {:?}", bucket)));
        }
        Ok(self.base_path.join(bucket))
    }

    /// Resolve a key inside its bucket, refusing keys that escape it
    fn object_path(&self, bucket: &str, key: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(StoreError::Other(format!("invalid object key {:?}", key)));
        }
        Ok(self.bucket_path(bucket)?.join(relative))
    }

    fn existing_bucket(&self, bucket: &str) -> StoreResult<PathBuf> {
        let path = self.bucket_path(bucket)?;
        if path.is_dir() {
            Ok(path)
        } else {
            Err(StoreError::BucketNotFound(bucket.to_string()))
        }
    }

    async fn file_meta(key: String, path: &Path) -> StoreResult<ObjectMeta> {
        let metadata = tokio::fs::metadata(path).await?;
        let last_modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        if metadata.is_dir() {
            return Ok(ObjectMeta {
                key,
                etag: None,
                size: 0,
                last_modified_ms,
            });
        }

        let data = tokio::fs::read(path).await?;
        Ok(ObjectMeta {
            key,
            etag: Some(content_hash(&data)),
            size: metadata.len(),
            last_modified_ms,
        })
    }
}

/// One page worth of keys, gathered by a depth-first walk in key order
///
/// Siblings are visited sorted by their key (directories as `name/`), which
/// makes the walk yield keys in lexicographic order. Subtrees that sort
/// entirely at or before `after` are skipped, and the walk stops once
/// `limit` keys are collected. Empty directories yield a `name/` marker.
struct PageWalk {
    after: Option<String>,
    limit: usize,
    keys: Vec<String>,
}

impl PageWalk {
    fn collect(root: &Path, after: Option<String>, limit: usize) -> std::io::Result<Vec<String>> {
        let mut walk = PageWalk {
            after,
            limit,
            keys: Vec::with_capacity(limit),
        };
        walk.visit(root, "")?;
        Ok(walk.keys)
    }

    fn is_after_token(&self, key: &str) -> bool {
        self.after.as_deref().map_or(true, |t| key > t)
    }

    /// Returns false once the page is full
    fn visit(&mut self, dir: &Path, prefix: &str) -> std::io::Result<bool> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if path.is_dir() {
                entries.push((format!("{}{}/", prefix, name), path, true));
            } else if path.is_file() {
                entries.push((format!("{}{}", prefix, name), path, false));
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (key, path, is_dir) in entries {
            if self.keys.len() >= self.limit {
                return Ok(false);
            }
            if !is_dir {
                if self.is_after_token(&key) {
                    self.keys.push(key);
                }
                continue;
            }

            let behind_token = self
                .after
                .as_deref()
                .map_or(false, |t| t >= key.as_str() && !t.starts_with(key.as_str()));
            if behind_token {
                continue;
            }
            if std::fs::read_dir(&path)?.next().is_none() {
                if self.is_after_token(&key) {
                    self.keys.push(key);
                }
            } else if !self.visit(&path, &key)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl ObjectStore for LocalFsObjectStore {
    fn list_page<'a>(
        &'a self,
        bucket: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListPage> {
        Box::pin(async move {
            let root = self.existing_bucket(bucket)?;

            let walk_root = root.clone();
            let after = continuation_token.map(str::to_string);
            let limit = self.page_size + 1;
            let remaining =
                tokio::task::spawn_blocking(move || PageWalk::collect(&walk_root, after, limit))
                    .await
                    .map_err(|e| StoreError::Other(format!("listing task failed: {}", e)))??;
            let has_more = remaining.len() > self.page_size;

            let mut objects = Vec::with_capacity(remaining.len().min(self.page_size));
            for key in remaining.into_iter().take(self.page_size) {
                let path = root.join(&key);
                match Self::file_meta(key, &path).await {
                    Ok(meta) => objects.push(meta),
                    // Deleted between the walk and the stat
                    Err(StoreError::NotFound(_)) => continue,
                    Err(e) => return Err(e),
                }
            }

            let next_token = if has_more {
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
            self.existing_bucket(bucket)?;
            let path = self.object_path(bucket, key)?;
            match Self::file_meta(key.to_string(), &path).await {
                Ok(meta) if meta.is_directory_marker() == path.is_dir() => Ok(Some(meta)),
                Ok(_) => Ok(None),
                Err(StoreError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
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
            self.existing_bucket(source_bucket)?;
            self.existing_bucket(dest_bucket)?;
            let from = self.object_path(source_bucket, source_key)?;
            let to = self.object_path(dest_bucket, dest_key)?;

            if source_key.ends_with(super::DIRECTORY_MARKER) {
                if !from.is_dir() {
                    return Err(StoreError::NotFound(format!(
                        "{}/{}",
                        source_bucket, source_key
                    )));
                }
                tokio::fs::create_dir_all(&to).await?;
                return Ok(());
            }

            if let Some(parent) = to.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            match tokio::fs::copy(&from, &to).await {
                Ok(_) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound && !from.exists() => Err(
                    StoreError::NotFound(format!("{}/{}", source_bucket, source_key)),
                ),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, DeleteOutcome> {
        Box::pin(async move {
            self.existing_bucket(bucket)?;
            let path = self.object_path(bucket, key)?;
            let result = if key.ends_with(super::DIRECTORY_MARKER) {
                tokio::fs::remove_dir(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => Ok(DeleteOutcome::Deleted),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(DeleteOutcome::NotFound),
                Err(e) => Err(e.into()),
            }
        })
    }
}
