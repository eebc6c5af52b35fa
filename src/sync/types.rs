//! Core data model shared by the lister, diff engine and reconciler

use crate::error::PartialApplyFailure;
use crate::store::{ObjectMeta, DIRECTORY_MARKER};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Opaque object identifier, unique within a bucket
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(key: impl Into<String>) -> Self {
        ObjectKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Keys ending in `/` are directory placeholders
    pub fn is_directory_marker(&self) -> bool {
        self.0.ends_with(DIRECTORY_MARKER)
    }
}

impl From<&str> for ObjectKey {
    fn from(s: &str) -> Self {
        ObjectKey(s.to_string())
    }
}

impl From<String> for ObjectKey {
    fn from(s: String) -> Self {
        ObjectKey(s)
    }
}

impl Borrow<str> for ObjectKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Complete, point-in-time listing of one bucket
///
/// Built by the lister and never modified after it is handed to the diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    bucket: String,
    objects: BTreeMap<ObjectKey, ObjectMeta>,
}

impl Snapshot {
    pub fn new(bucket: impl Into<String>) -> Self {
        Snapshot {
            bucket: bucket.into(),
            objects: BTreeMap::new(),
        }
    }

    /// Build a snapshot from metadata records; later duplicates win
    pub fn from_objects(
        bucket: impl Into<String>,
        objects: impl IntoIterator<Item = ObjectMeta>,
    ) -> Self {
        let mut snapshot = Snapshot::new(bucket);
        for meta in objects {
            snapshot.insert(meta);
        }
        snapshot
    }

    /// Insert a record, replacing and returning any earlier one for the key
    pub(crate) fn insert(&mut self, meta: ObjectMeta) -> Option<ObjectMeta> {
        self.objects.insert(ObjectKey::new(meta.key.clone()), meta)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn get(&self, key: &str) -> Option<&ObjectMeta> {
        self.objects.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Keys in lexicographic order
    pub fn keys(&self) -> impl Iterator<Item = &ObjectKey> {
        self.objects.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectKey, &ObjectMeta)> {
        self.objects.iter()
    }

    /// Keys split into regular files and directory markers
    pub fn partition_keys(&self) -> (Vec<&str>, Vec<&str>) {
        let (directories, files): (Vec<&ObjectKey>, Vec<&ObjectKey>) =
            self.keys().partition(|k| k.is_directory_marker());
        (
            files.into_iter().map(ObjectKey::as_str).collect(),
            directories.into_iter().map(ObjectKey::as_str).collect(),
        )
    }

    pub fn directory_count(&self) -> usize {
        self.objects
            .keys()
            .filter(|k| k.is_directory_marker())
            .count()
    }

    pub fn file_count(&self) -> usize {
        self.len() - self.directory_count()
    }
}

/// Operations needed to make a target match its source
///
/// The three key sets are pairwise disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffPlan {
    pub source_bucket: String,
    pub target_bucket: String,
    /// Keys present only in the source
    pub to_copy: BTreeSet<ObjectKey>,
    /// Keys present in both with different content
    pub to_update: BTreeSet<ObjectKey>,
    /// Keys present only in the target
    pub to_delete_candidates: BTreeSet<ObjectKey>,
    /// Source metadata for every key in `to_copy` and `to_update`
    pub source_meta: HashMap<ObjectKey, ObjectMeta>,
}

impl DiffPlan {
    /// True when the target already matches the source
    pub fn is_empty(&self) -> bool {
        self.to_copy.is_empty() && self.to_update.is_empty() && self.to_delete_candidates.is_empty()
    }

    /// Copies and updates; deletes are excluded because the policy may skip them
    pub fn transfer_count(&self) -> usize {
        self.to_copy.len() + self.to_update.len()
    }
}

/// Whether target-only objects are removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletionPolicy {
    /// Never delete from the target
    #[default]
    KeepAll,
    /// Delete target objects whose source counterpart is gone
    DeleteIfSourceDeleted,
}

impl DeletionPolicy {
    pub fn allows_delete(&self) -> bool {
        matches!(self, DeletionPolicy::DeleteIfSourceDeleted)
    }
}

impl fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletionPolicy::KeepAll => write!(f, "KEEP_ALL"),
            DeletionPolicy::DeleteIfSourceDeleted => write!(f, "DELETE_IF_SOURCE_DELETED"),
        }
    }
}

impl FromStr for DeletionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "KEEP_ALL" => Ok(DeletionPolicy::KeepAll),
            "DELETE_IF_SOURCE_DELETED" => Ok(DeletionPolicy::DeleteIfSourceDeleted),
            other => Err(format!(
                "unknown deletion rule {:?} (expected KEEP_ALL or DELETE_IF_SOURCE_DELETED)",
                other
            )),
        }
    }
}

/// Kind of change applied for one plan item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Copy,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Copy => write!(f, "copy"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// A plan item that still failed once its retries were exhausted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub key: ObjectKey,
    pub operation: Operation,
    pub reason: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::PartiallyFailed => write!(f, "partially_failed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome counts of one reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub copied: u64,
    pub updated: u64,
    pub deleted: u64,
    /// Target-only keys found by the diff, applied or not
    pub delete_candidates: u64,
    /// Items that turned out to be unnecessary (source vanished after listing)
    pub skipped: u64,
    /// Items never attempted because the run was cancelled
    pub not_started: u64,
    pub cancelled: bool,
    pub failed: Vec<FailedItem>,
    pub status: RunStatus,
}

impl RunSummary {
    /// Summary of a run that never got past listing
    pub fn listing_failed() -> Self {
        RunSummary {
            status: RunStatus::Failed,
            ..Default::default()
        }
    }

    /// Items that were applied or found unnecessary
    pub fn completed(&self) -> u64 {
        self.copied + self.updated + self.deleted + self.skipped
    }

    /// Derive `status` from the counts
    ///
    /// A cancelled run is never `Succeeded`, even when every item was already
    /// in flight: it is `PartiallyFailed` when it got anything done and
    /// `Failed` when it did not.
    pub(crate) fn finish(&mut self) {
        self.status = if self.cancelled {
            if self.completed() > 0 || !self.failed.is_empty() {
                RunStatus::PartiallyFailed
            } else {
                RunStatus::Failed
            }
        } else if self.failed.is_empty() {
            RunStatus::Succeeded
        } else {
            RunStatus::PartiallyFailed
        };
    }

    /// Turn item failures into an error value
    pub fn check(&self) -> Result<(), PartialApplyFailure> {
        if self.failed.is_empty() {
            Ok(())
        } else {
            Err(PartialApplyFailure {
                failed: self.failed.clone(),
            })
        }
    }
}
