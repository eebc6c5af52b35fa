//! Bucket Reconciliation Engine
//!
//! Keeps a target bucket consistent with a source bucket, one direction per
//! run:
//!
//! ```text
//! Scheduler ──tick──▶ Reconciler::run(source, target, policy)
//!                        │
//!                        ├─ Lister(source) ┐ concurrently
//!                        ├─ Lister(target) ┘
//!                        ├─ diff(source, target) → DiffPlan
//!                        └─ apply(plan, policy)  → RunSummary
//! ```
//!
//! Every run rebuilds its snapshots from live state, so an item that failed
//! in one run simply reappears in the next run's plan.

pub mod diff;
pub mod dst;
pub mod lister;
pub mod reconciler;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod types;

pub use diff::diff;
pub use dst::{run_dst_batch, summarize_batch, SyncDSTConfig, SyncDSTHarness, SyncDSTResult};
pub use lister::Lister;
pub use reconciler::{Reconciler, ReconcilerConfig, RunPhase, DEFAULT_CONCURRENCY};
pub use report::{RunReport, SnapshotStats};
pub use retry::{RetryError, RetryPolicy};
pub use scheduler::{
    OverlapPolicy, PairGuard, PairRegistry, Scheduler, SchedulerConfig, SchedulerStats,
    SyncPair, TickOutcome,
};
pub use types::{
    DeletionPolicy, DiffPlan, FailedItem, ObjectKey, Operation, RunStatus, RunSummary, Snapshot,
};
