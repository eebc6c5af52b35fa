//! Reconciler: list both buckets, diff, apply
//!
//! ## Run state machine
//!
//! ```text
//! Idle → Listing → Diffing → Applying → Completed
//!           ↓
//!         Failed
//! ```
//!
//! Listing failures abort the run before anything is written. Once applying
//! starts the run always completes, with per-item failures collected in the
//! summary rather than raised.

use super::diff::diff;
use super::lister::Lister;
use super::report::{RunReport, SnapshotStats};
use super::retry::{RetryError, RetryPolicy};
use super::types::{DeletionPolicy, DiffPlan, FailedItem, ObjectKey, Operation, RunSummary};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::store::ObjectStore;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Level};
use uuid::Uuid;

/// Default apply worker pool size
pub const DEFAULT_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Idle,
    Listing,
    Diffing,
    Applying,
    Completed,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Maximum store operations in flight during apply
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Small pool and millisecond backoff for tests
    pub fn test() -> Self {
        ReconcilerConfig {
            concurrency: 4,
            retry: RetryPolicy::test(),
        }
    }
}

/// Result of one plan item
enum ItemOutcome {
    Applied(Operation),
    /// Nothing to do any more, e.g. the source vanished after listing
    Skipped,
    NotStarted,
    Failed(FailedItem),
}

pub struct Reconciler<S: ObjectStore, C: Clock = SystemClock> {
    store: Arc<S>,
    lister: Lister<S>,
    config: ReconcilerConfig,
    clock: C,
}

impl<S: ObjectStore> Reconciler<S> {
    pub fn new(store: Arc<S>, config: ReconcilerConfig) -> Self {
        Self::with_clock(store, config, SystemClock::new())
    }
}

impl<S: ObjectStore, C: Clock> Reconciler<S, C> {
    pub fn with_clock(store: Arc<S>, config: ReconcilerConfig, clock: C) -> Self {
        Reconciler {
            lister: Lister::new(store.clone(), config.retry),
            store,
            config,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn lister(&self) -> &Lister<S> {
        &self.lister
    }

    /// Reconcile `target` against `source` once
    pub async fn run(
        &self,
        source: &str,
        target: &str,
        policy: DeletionPolicy,
        cancel: &CancellationToken,
    ) -> RunSummary {
        self.run_with_report(source, target, policy, cancel)
            .await
            .summary
    }

    /// Reconcile once and return the full run record
    ///
    /// The report is also emitted through `tracing` before returning.
    pub async fn run_with_report(
        &self,
        source: &str,
        target: &str,
        policy: DeletionPolicy,
        cancel: &CancellationToken,
    ) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, source, target);
        let report = self
            .execute(run_id, source, target, policy, cancel)
            .instrument(span)
            .await;
        report.emit();
        report
    }

    async fn execute(
        &self,
        run_id: Uuid,
        source: &str,
        target: &str,
        policy: DeletionPolicy,
        cancel: &CancellationToken,
    ) -> RunReport {
        let started_at = self.clock.now();
        let mut phase = RunPhase::Idle;
        let mut report = RunReport {
            run_id,
            source_bucket: source.to_string(),
            target_bucket: target.to_string(),
            policy,
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            source: None,
            target: None,
            summary: RunSummary::default(),
            error: None,
            final_phase: phase,
        };

        transition(&mut phase, RunPhase::Listing);
        let (source_listing, target_listing) = tokio::join!(
            self.lister.list(source, cancel),
            self.lister.list(target, cancel)
        );
        report.source = source_listing.as_ref().ok().map(SnapshotStats::from);
        report.target = target_listing.as_ref().ok().map(SnapshotStats::from);

        let (source_snapshot, target_snapshot) = match (source_listing, target_listing) {
            (Ok(s), Ok(t)) => (s, t),
            (Err(e), _) | (_, Err(e)) => {
                warn!(bucket = e.bucket(), error = %e, "Listing failed, aborting run");
                transition(&mut phase, RunPhase::Failed);
                report.error = Some(e.to_string());
                report.summary = RunSummary::listing_failed();
                report.summary.cancelled = cancel.is_cancelled();
                return self.finish(report, phase);
            }
        };

        info!(
            source_files = source_snapshot.file_count(),
            source_directories = source_snapshot.directory_count(),
            target_files = target_snapshot.file_count(),
            target_directories = target_snapshot.directory_count(),
            "Bucket contents before sync"
        );
        if tracing::enabled!(Level::DEBUG) {
            let (source_files, source_directories) = source_snapshot.partition_keys();
            let (target_files, target_directories) = target_snapshot.partition_keys();
            debug!(
                ?source_files,
                ?source_directories,
                ?target_files,
                ?target_directories,
                "Bucket keys before sync"
            );
        }

        transition(&mut phase, RunPhase::Diffing);
        let plan = diff(&source_snapshot, &target_snapshot);
        drop(source_snapshot);
        drop(target_snapshot);
        info!(
            to_copy = plan.to_copy.len(),
            to_update = plan.to_update.len(),
            delete_candidates = plan.to_delete_candidates.len(),
            %policy,
            "Computed sync plan"
        );

        transition(&mut phase, RunPhase::Applying);
        report.summary = self.apply(&plan, policy, cancel).await;

        transition(&mut phase, RunPhase::Completed);
        self.finish(report, phase)
    }

    fn finish(&self, mut report: RunReport, phase: RunPhase) -> RunReport {
        report.finished_at = self.clock.now();
        report.duration_ms = report
            .finished_at
            .duration_since(report.started_at)
            .as_millis() as u64;
        report.final_phase = phase;
        report
    }

    /// Apply a plan under `policy`
    ///
    /// Items run on a pool of `concurrency` workers, each with its own retry
    /// budget. No item is started once `cancel` fires; items already in
    /// flight finish.
    pub async fn apply(
        &self,
        plan: &DiffPlan,
        policy: DeletionPolicy,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let mut items: Vec<(ObjectKey, Operation)> = plan
            .to_copy
            .iter()
            .map(|k| (k.clone(), Operation::Copy))
            .chain(plan.to_update.iter().map(|k| (k.clone(), Operation::Update)))
            .collect();

        if policy.allows_delete() {
            items.extend(
                plan.to_delete_candidates
                    .iter()
                    .map(|k| (k.clone(), Operation::Delete)),
            );
        } else if !plan.to_delete_candidates.is_empty() {
            info!(
                count = plan.to_delete_candidates.len(),
                "Keeping target-only objects"
            );
        }

        let initial = RunSummary {
            delete_candidates: plan.to_delete_candidates.len() as u64,
            ..Default::default()
        };

        let mut summary = futures::stream::iter(items)
            .map(|(key, op)| self.apply_item(plan, key, op, cancel))
            .buffer_unordered(self.config.concurrency.max(1))
            .fold(initial, |mut summary, outcome| async move {
                match outcome {
                    ItemOutcome::Applied(Operation::Copy) => summary.copied += 1,
                    ItemOutcome::Applied(Operation::Update) => summary.updated += 1,
                    ItemOutcome::Applied(Operation::Delete) => summary.deleted += 1,
                    ItemOutcome::Skipped => summary.skipped += 1,
                    ItemOutcome::NotStarted => summary.not_started += 1,
                    ItemOutcome::Failed(item) => summary.failed.push(item),
                }
                summary
            })
            .await;

        summary.failed.sort_by(|a, b| a.key.cmp(&b.key));
        summary.cancelled = cancel.is_cancelled();
        summary.finish();
        summary
    }

    async fn apply_item(
        &self,
        plan: &DiffPlan,
        key: ObjectKey,
        op: Operation,
        cancel: &CancellationToken,
    ) -> ItemOutcome {
        if cancel.is_cancelled() {
            return ItemOutcome::NotStarted;
        }

        let result = match op {
            Operation::Copy | Operation::Update => self.transfer(plan, &key, cancel).await,
            Operation::Delete => self.remove(plan, &key, cancel).await,
        };

        match result {
            Ok(true) => {
                debug!(key = %key, operation = %op, "Applied");
                ItemOutcome::Applied(op)
            }
            Ok(false) => {
                debug!(key = %key, operation = %op, "Source vanished, skipped");
                ItemOutcome::Skipped
            }
            Err(e) => {
                warn!(
                    key = %key,
                    operation = %op,
                    attempts = e.attempts,
                    error = %e.error,
                    "Item failed"
                );
                let reason = if e.cancelled {
                    format!("cancelled while retrying: {}", e.error)
                } else {
                    e.error.to_string()
                };
                ItemOutcome::Failed(FailedItem {
                    key,
                    operation: op,
                    reason,
                    attempts: e.attempts,
                })
            }
        }
    }

    /// Copy one key to the target; `Ok(false)` when the source is gone
    ///
    /// Before each retry the target is checked: an earlier attempt may have
    /// landed even though its acknowledgement was lost.
    async fn transfer(
        &self,
        plan: &DiffPlan,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<bool, RetryError> {
        let store = &self.store;
        let retry = &self.config.retry;
        let source_bucket = plan.source_bucket.as_str();
        let target_bucket = plan.target_bucket.as_str();
        let expected = plan.source_meta.get(key.as_str());
        let key = key.as_str();

        retry
            .retry("copy", cancel, move |attempt| async move {
                if let (true, Some(expected)) = (attempt > 1, expected) {
                    match retry.timed(store.head(target_bucket, key)).await {
                        Ok(Some(current)) if expected.same_content(&current) => {
                            debug!(key, attempt, "Earlier copy attempt already landed");
                            return Ok(true);
                        }
                        Ok(_) => {}
                        Err(e) => return Err(e),
                    }
                }
                match retry
                    .timed(store.copy(source_bucket, key, target_bucket, key))
                    .await
                {
                    Ok(()) => Ok(true),
                    Err(StoreError::NotFound(_)) => Ok(false),
                    Err(e) => Err(e),
                }
            })
            .await
    }

    /// Delete one key from the target; an already-missing key counts as deleted
    async fn remove(
        &self,
        plan: &DiffPlan,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<bool, RetryError> {
        let store = &self.store;
        let retry = &self.config.retry;
        let target_bucket = plan.target_bucket.as_str();
        let key = key.as_str();

        retry
            .retry("delete", cancel, move |_| async move {
                retry
                    .timed(store.delete(target_bucket, key))
                    .await
                    .map(|_| true)
            })
            .await
    }
}

fn transition(phase: &mut RunPhase, next: RunPhase) {
    debug!(from = %phase, to = %next, "Run phase");
    *phase = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SimulatedRng;
    use crate::store::{InMemoryObjectStore, SimulatedObjectStore, SimulatedStoreConfig};
    use crate::sync::RunStatus;

    fn buckets() -> InMemoryObjectStore {
        let store = InMemoryObjectStore::new().with_page_size(2);
        store.create_bucket("src");
        store.create_bucket("dst");
        store
    }

    #[tokio::test]
    async fn test_run_copies_updates_and_keeps() {
        let store = buckets();
        store.put("src", "a.txt", b"a");
        store.put("src", "b.txt", b"new");
        store.put("dst", "b.txt", b"old");
        store.put("dst", "c.txt", b"c");

        let reconciler = Reconciler::new(Arc::new(store.clone()), ReconcilerConfig::test());
        let report = reconciler
            .run_with_report("src", "dst", DeletionPolicy::KeepAll, &CancellationToken::new())
            .await;

        let summary = &report.summary;
        assert_eq!(summary.status, RunStatus::Succeeded);
        assert_eq!((summary.copied, summary.updated, summary.deleted), (1, 1, 0));
        assert_eq!(summary.delete_candidates, 1);
        assert_eq!(report.final_phase, RunPhase::Completed);
        assert_eq!(report.source.unwrap().objects, 2);
        assert_eq!(store.get("dst", "b.txt").unwrap(), b"new");
        assert!(store.get("dst", "c.txt").is_some());
    }

    #[tokio::test]
    async fn test_delete_policy_removes_target_only() {
        let store = buckets();
        store.put("src", "a.txt", b"a");
        store.put("dst", "stale.txt", b"x");

        let reconciler = Reconciler::new(Arc::new(store.clone()), ReconcilerConfig::test());
        let summary = reconciler
            .run("src", "dst", DeletionPolicy::DeleteIfSourceDeleted, &CancellationToken::new())
            .await;

        assert_eq!(summary.deleted, 1);
        assert_eq!(store.keys("dst"), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_listing_failure_fails_run() {
        let store = buckets();
        store.put("src", "a.txt", b"a");

        let reconciler = Reconciler::new(Arc::new(store.clone()), ReconcilerConfig::test());
        let report = reconciler
            .run_with_report("src", "missing", DeletionPolicy::KeepAll, &CancellationToken::new())
            .await;

        assert_eq!(report.summary.status, RunStatus::Failed);
        assert_eq!(report.final_phase, RunPhase::Failed);
        assert!(report.error.unwrap().contains("missing"));
        assert!(report.target.is_none());
        assert!(report.source.is_some());
    }

    #[tokio::test]
    async fn test_lost_ack_verified_by_head() {
        let store = buckets();
        store.put("src", "a.txt", b"payload");

        let mut config = SimulatedStoreConfig::no_faults();
        config.copy_lost_ack_prob = 1.0;
        let sim = SimulatedObjectStore::new(store.clone(), SimulatedRng::new(5), config);
        let reconciler = Reconciler::new(Arc::new(sim), ReconcilerConfig::test());

        let summary = reconciler
            .run("src", "dst", DeletionPolicy::KeepAll, &CancellationToken::new())
            .await;

        assert_eq!(summary.status, RunStatus::Succeeded);
        assert_eq!(summary.copied, 1);
        assert_eq!(reconciler.store().stats().copy_attempts, 1);
    }

    #[tokio::test]
    async fn test_vanished_source_is_skipped() {
        let store = buckets();
        store.put("src", "a.txt", b"a");
        let source = crate::sync::Snapshot::from_objects("src", vec![meta("ghost.txt")]);
        let target = crate::sync::Snapshot::new("dst");
        let plan = diff(&source, &target);

        let reconciler = Reconciler::new(Arc::new(store), ReconcilerConfig::test());
        let summary = reconciler
            .apply(&plan, DeletionPolicy::KeepAll, &CancellationToken::new())
            .await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.copied, 0);
        assert_eq!(summary.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_cancelled_before_apply_starts_nothing() {
        let store = buckets();
        store.put("src", "a.txt", b"a");
        store.put("src", "b.txt", b"b");
        let reconciler = Reconciler::new(Arc::new(store.clone()), ReconcilerConfig::test());

        let cancel = CancellationToken::new();
        let plan = {
            let lister = reconciler.lister();
            let s = lister.list("src", &cancel).await.unwrap();
            let t = lister.list("dst", &cancel).await.unwrap();
            diff(&s, &t)
        };
        cancel.cancel();

        let summary = reconciler.apply(&plan, DeletionPolicy::KeepAll, &cancel).await;
        assert_eq!(summary.not_started, 2);
        assert!(summary.cancelled);
        assert_eq!(summary.status, RunStatus::Failed);
        assert!(store.is_empty("dst"));
    }

    fn meta(key: &str) -> crate::store::ObjectMeta {
        crate::store::ObjectMeta {
            key: key.to_string(),
            etag: Some("h".to_string()),
            size: 1,
            last_modified_ms: 0,
        }
    }
}
