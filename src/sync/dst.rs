//! Deterministic Simulation Testing for bucket reconciliation
//!
//! Shadow-state harness that enables:
//! - Deterministic random workloads (external writes between runs)
//! - Fault injection at the object store layer
//! - Invariant checking after every run
//! - Seed-based reproducibility for debugging
//!
//! ## Design (FoundationDB-style DST)
//!
//! ```text
//! for seed in 0..N {
//!     let mut harness = SyncDSTHarness::new(SyncDSTConfig::chaos(seed));
//!     harness.run(rounds).await;           // mutate, reconcile, check
//!     harness.check_invariants().await;    // fault-free convergence run
//! }
//! ```
//!
//! Each round mutates the buckets directly, builds a fresh fault-injecting
//! store (optionally with a listing outage or a forbidden key), runs one
//! reconciliation and compares the outcome against a plan computed from the
//! unfaulted store.

use super::diff::diff;
use super::lister::Lister;
use super::reconciler::{Reconciler, ReconcilerConfig, RunPhase};
use super::report::RunReport;
use super::retry::RetryPolicy;
use super::types::{DeletionPolicy, DiffPlan, RunStatus};
use crate::clock::SimulatedClock;
use crate::io::{Rng, SimulatedRng};
use crate::store::{
    InMemoryObjectStore, SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const SOURCE_BUCKET: &str = "dst-source";
pub const TARGET_BUCKET: &str = "dst-target";

type SimStore = SimulatedObjectStore<InMemoryObjectStore<SimulatedClock>, SimulatedRng>;

/// Configuration for sync DST
#[derive(Debug, Clone)]
pub struct SyncDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Object store fault configuration
    pub store_config: SimulatedStoreConfig,
    pub reconciler: ReconcilerConfig,
    /// Fixed deletion policy; drawn from the seed when `None`
    pub policy: Option<DeletionPolicy>,
    /// Number of distinct keys the workload draws from
    pub key_space: u64,
    /// Objects written to each bucket before the first round
    pub initial_objects: usize,
    /// Upper bound of external mutations between runs
    pub max_mutations_per_round: u64,
    /// Listing page size of the underlying store
    pub page_size: usize,
    /// Probability that a round's store breaks one bucket listing
    pub listing_outage_prob: f64,
    /// Probability that a round's store forbids access to one source key
    pub permission_fault_prob: f64,
}

impl Default for SyncDSTConfig {
    fn default() -> Self {
        SyncDSTConfig {
            seed: 0,
            store_config: SimulatedStoreConfig::default(),
            reconciler: ReconcilerConfig {
                concurrency: 4,
                retry: RetryPolicy {
                    max_attempts: 4,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(8),
                    call_timeout: Duration::from_secs(1),
                },
            },
            policy: None,
            key_space: 60,
            initial_objects: 30,
            max_mutations_per_round: 10,
            page_size: 7,
            listing_outage_prob: 0.05,
            permission_fault_prob: 0.05,
        }
    }
}

impl SyncDSTConfig {
    pub fn new(seed: u64) -> Self {
        SyncDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no fault injection
    pub fn calm(seed: u64) -> Self {
        SyncDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::no_faults(),
            listing_outage_prob: 0.0,
            permission_fault_prob: 0.0,
            ..Default::default()
        }
    }

    /// Moderate fault injection
    pub fn moderate(seed: u64) -> Self {
        let mut store_config = SimulatedStoreConfig::default();
        store_config.latency_range_us = (0, 200);
        SyncDSTConfig {
            seed,
            store_config,
            ..Default::default()
        }
    }

    /// Chaos mode - aggressive fault injection
    pub fn chaos(seed: u64) -> Self {
        let mut store_config = SimulatedStoreConfig::high_chaos();
        store_config.latency_range_us = (0, 500);
        SyncDSTConfig {
            seed,
            store_config,
            listing_outage_prob: 0.15,
            permission_fault_prob: 0.15,
            ..Default::default()
        }
    }
}

/// Result of a DST run
#[derive(Debug, Clone)]
pub struct SyncDSTResult {
    pub seed: u64,
    pub policy: DeletionPolicy,
    pub rounds: u64,
    pub mutations: u64,
    pub runs_succeeded: u64,
    pub runs_partially_failed: u64,
    pub runs_failed: u64,
    pub copied: u64,
    pub updated: u64,
    pub deleted: u64,
    pub failed_items: u64,
    /// Store fault statistics, summed over every round
    pub store_stats: SimulatedStoreStats,
    /// Invariant violations found
    pub invariant_violations: Vec<String>,
}

impl SyncDSTResult {
    pub fn new(seed: u64, policy: DeletionPolicy) -> Self {
        SyncDSTResult {
            seed,
            policy,
            rounds: 0,
            mutations: 0,
            runs_succeeded: 0,
            runs_partially_failed: 0,
            runs_failed: 0,
            copied: 0,
            updated: 0,
            deleted: 0,
            failed_items: 0,
            store_stats: SimulatedStoreStats::default(),
            invariant_violations: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn total_runs(&self) -> u64 {
        self.runs_succeeded + self.runs_partially_failed + self.runs_failed
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {} ({}): {} rounds, {} mutations, runs ok/partial/failed {}/{}/{}, \
             copied {}, updated {}, deleted {}, failed items {}, injected faults {}, violations {}",
            self.seed,
            self.policy,
            self.rounds,
            self.mutations,
            self.runs_succeeded,
            self.runs_partially_failed,
            self.runs_failed,
            self.copied,
            self.updated,
            self.deleted,
            self.failed_items,
            self.store_stats.total_failures(),
            self.invariant_violations.len()
        )
    }

    fn record(&mut self, report: &RunReport) {
        let s = &report.summary;
        match s.status {
            RunStatus::Succeeded => self.runs_succeeded += 1,
            RunStatus::PartiallyFailed => self.runs_partially_failed += 1,
            RunStatus::Failed => self.runs_failed += 1,
        }
        self.copied += s.copied;
        self.updated += s.updated;
        self.deleted += s.deleted;
        self.failed_items += s.failed.len() as u64;
    }
}

/// Bucket contents before a run, for comparison afterwards
struct PreRunState {
    source: BTreeMap<String, Vec<u8>>,
    target: BTreeMap<String, Vec<u8>>,
    plan: DiffPlan,
}

pub struct SyncDSTHarness {
    config: SyncDSTConfig,
    rng: SimulatedRng,
    clock: SimulatedClock,
    store: InMemoryObjectStore<SimulatedClock>,
    policy: DeletionPolicy,
    result: SyncDSTResult,
    write_counter: u64,
}

impl SyncDSTHarness {
    pub fn new(config: SyncDSTConfig) -> Self {
        let mut rng = SimulatedRng::new(config.seed);
        let policy = config.policy.unwrap_or_else(|| {
            if rng.gen_bool(0.5) {
                DeletionPolicy::KeepAll
            } else {
                DeletionPolicy::DeleteIfSourceDeleted
            }
        });

        let clock = SimulatedClock::new(1_700_000_000_000);
        let store = InMemoryObjectStore::with_clock(clock.clone()).with_page_size(config.page_size);
        store.create_bucket(SOURCE_BUCKET);
        store.create_bucket(TARGET_BUCKET);

        let mut harness = SyncDSTHarness {
            result: SyncDSTResult::new(config.seed, policy),
            config,
            rng,
            clock,
            store,
            policy,
            write_counter: 0,
        };
        harness.seed_buckets();
        harness
    }

    pub fn policy(&self) -> DeletionPolicy {
        self.policy
    }

    /// Underlying unfaulted store
    pub fn store(&self) -> &InMemoryObjectStore<SimulatedClock> {
        &self.store
    }

    fn random_key(&mut self) -> String {
        let n = self.rng.gen_range(0, self.config.key_space);
        // A few keys are directory placeholders
        if n % 13 == 0 {
            format!("dir_{:03}/", n)
        } else {
            format!("obj_{:03}.dat", n)
        }
    }

    fn next_payload(&mut self) -> Vec<u8> {
        self.write_counter += 1;
        format!("payload-{}-{}", self.config.seed, self.write_counter).into_bytes()
    }

    /// Populate both buckets with overlapping, partly divergent content
    fn seed_buckets(&mut self) {
        for _ in 0..self.config.initial_objects {
            let key = self.random_key();
            let data = self.next_payload();
            self.store.put(SOURCE_BUCKET, &key, &data);

            match self.rng.gen_range(0, 4) {
                // Identical copy already in the target
                0 | 1 => {
                    self.store.put(TARGET_BUCKET, &key, &data);
                }
                // Stale copy in the target
                2 => {
                    let stale = self.next_payload();
                    self.store.put(TARGET_BUCKET, &key, &stale);
                }
                _ => {}
            }
        }
        // Target-only objects
        for _ in 0..self.config.initial_objects / 4 {
            let key = format!("orphan_{:03}.dat", self.rng.gen_range(0, 1_000));
            let data = self.next_payload();
            self.store.put(TARGET_BUCKET, &key, &data);
        }
    }

    /// External writes that happen between runs
    fn mutate(&mut self) {
        let count = self.rng.gen_range(1, self.config.max_mutations_per_round + 1);
        for _ in 0..count {
            self.clock.advance_ms(1);
            let roll = self.rng.gen_range(0, 100);
            let key = self.random_key();
            if roll < 55 {
                let data = self.next_payload();
                self.store.put(SOURCE_BUCKET, &key, &data);
            } else if roll < 75 {
                self.store.remove(SOURCE_BUCKET, &key);
            } else if roll < 90 {
                let data = self.next_payload();
                self.store.put(TARGET_BUCKET, &key, &data);
            } else {
                self.store.remove(TARGET_BUCKET, &key);
            }
            self.result.mutations += 1;
        }
    }

    /// Plan computed directly from the unfaulted store
    async fn expected_plan(&self) -> Result<DiffPlan, String> {
        let lister = Lister::new(Arc::new(self.store.clone()), RetryPolicy::test());
        let cancel = CancellationToken::new();
        let source = lister
            .list(SOURCE_BUCKET, &cancel)
            .await
            .map_err(|e| e.to_string())?;
        let target = lister
            .list(TARGET_BUCKET, &cancel)
            .await
            .map_err(|e| e.to_string())?;
        Ok(diff(&source, &target))
    }

    fn faulted_store(&mut self) -> Arc<SimStore> {
        let mut store_config = self.config.store_config.clone();

        if self.rng.gen_bool(self.config.listing_outage_prob) {
            let bucket = if self.rng.gen_bool(0.5) {
                SOURCE_BUCKET
            } else {
                TARGET_BUCKET
            };
            let after_pages = self.rng.gen_range(0, 4) as usize;
            store_config = store_config.with_broken_listing(bucket, after_pages);
        }

        if self.rng.gen_bool(self.config.permission_fault_prob) {
            let keys = self.store.keys(SOURCE_BUCKET);
            if !keys.is_empty() {
                let idx = self.rng.gen_range(0, keys.len() as u64) as usize;
                store_config = store_config.with_permission_denied(keys[idx].clone());
            }
        }

        Arc::new(SimulatedObjectStore::new(
            self.store.clone(),
            self.rng.fork(),
            store_config,
        ))
    }

    async fn reconcile(&mut self, store: Arc<SimStore>) -> Option<(RunReport, PreRunState)> {
        let plan = match self.expected_plan().await {
            Ok(plan) => plan,
            Err(e) => {
                self.result
                    .invariant_violations
                    .push(format!("Unfaulted listing failed: {}", e));
                return None;
            }
        };
        let before = PreRunState {
            source: self.store.contents(SOURCE_BUCKET),
            target: self.store.contents(TARGET_BUCKET),
            plan,
        };

        let reconciler = Reconciler::new(store.clone(), self.config.reconciler);
        let report = reconciler
            .run_with_report(
                SOURCE_BUCKET,
                TARGET_BUCKET,
                self.policy,
                &CancellationToken::new(),
            )
            .await;

        self.result.store_stats.merge(&store.stats());
        self.result.record(&report);
        self.check_run(&report, &before, &store.stats()).await;
        Some((report, before))
    }

    /// Run the workload for a number of mutate-then-reconcile rounds
    pub async fn run(&mut self, rounds: usize) {
        for _ in 0..rounds {
            self.clock.advance_ms(1_000);
            self.mutate();
            let store = self.faulted_store();
            self.reconcile(store).await;
            self.result.rounds += 1;
        }
    }

    async fn check_run(&mut self, report: &RunReport, before: &PreRunState, stats: &SimulatedStoreStats) {
        let round = self.result.rounds;
        let s = &report.summary;
        let mut violations = Vec::new();

        // Invariant 1: the source bucket is never mutated by a run
        if self.store.contents(SOURCE_BUCKET) != before.source {
            violations.push(format!("Round {}: source bucket changed during run", round));
        }
        if stats.mutations_of(SOURCE_BUCKET) > 0 {
            violations.push(format!(
                "Round {}: {} write calls against the source bucket",
                round,
                stats.mutations_of(SOURCE_BUCKET)
            ));
        }

        let target_after = self.store.contents(TARGET_BUCKET);

        // Invariant 2: a run that failed while listing leaves the target untouched
        if report.final_phase == RunPhase::Failed {
            if s.status != RunStatus::Failed {
                violations.push(format!(
                    "Round {}: listing failed but status is {}",
                    round, s.status
                ));
            }
            if target_after != before.target || stats.mutations_of(TARGET_BUCKET) > 0 {
                violations.push(format!(
                    "Round {}: target modified by a run that failed during listing",
                    round
                ));
            }
        }

        // Invariant 3: KeepAll never deletes
        if self.policy == DeletionPolicy::KeepAll {
            if s.deleted != 0 {
                violations.push(format!("Round {}: KeepAll deleted {} objects", round, s.deleted));
            }
            for key in &before.plan.to_delete_candidates {
                if !target_after.contains_key(key.as_str()) {
                    violations.push(format!(
                        "Round {}: KeepAll lost target-only object {}",
                        round, key
                    ));
                }
            }
        }

        if report.final_phase == RunPhase::Completed {
            // Invariant 4: every planned item is accounted for exactly once
            let planned = before.plan.transfer_count() as u64
                + if self.policy.allows_delete() {
                    before.plan.to_delete_candidates.len() as u64
                } else {
                    0
                };
            let accounted = s.copied
                + s.updated
                + s.deleted
                + s.skipped
                + s.not_started
                + s.failed.len() as u64;
            if planned != accounted {
                violations.push(format!(
                    "Round {}: planned {} items but summary accounts for {}",
                    round, planned, accounted
                ));
            }
            if s.delete_candidates != before.plan.to_delete_candidates.len() as u64 {
                violations.push(format!(
                    "Round {}: {} delete candidates reported, {} expected",
                    round,
                    s.delete_candidates,
                    before.plan.to_delete_candidates.len()
                ));
            }

            // A clean run leaves nothing to transfer
            if s.status == RunStatus::Succeeded {
                if let Err(v) = self.check_converged(&format!("Round {}", round)).await {
                    violations.push(v);
                }
            }
        }

        self.result.invariant_violations.extend(violations);
    }

    /// Re-diff from the unfaulted store and check nothing is left to do
    async fn check_converged(&self, context: &str) -> Result<(), String> {
        let plan = self.expected_plan().await?;
        if !plan.to_copy.is_empty() || !plan.to_update.is_empty() {
            return Err(format!(
                "{}: re-diff still has {} copies and {} updates",
                context,
                plan.to_copy.len(),
                plan.to_update.len()
            ));
        }
        if self.policy.allows_delete() && !plan.to_delete_candidates.is_empty() {
            return Err(format!(
                "{}: re-diff still has {} delete candidates",
                context,
                plan.to_delete_candidates.len()
            ));
        }
        Ok(())
    }

    /// Final fault-free run, then convergence check (invariant 5)
    pub async fn check_invariants(&mut self) {
        self.clock.advance_ms(1_000);
        let store = Arc::new(SimulatedObjectStore::new(
            self.store.clone(),
            self.rng.fork(),
            SimulatedStoreConfig::no_faults(),
        ));

        if let Some((report, _)) = self.reconcile(store).await {
            if report.summary.status != RunStatus::Succeeded {
                self.result.invariant_violations.push(format!(
                    "Final fault-free run ended {}: {:?}",
                    report.summary.status, report.summary.failed
                ));
            }
        }

        if let Err(v) = self.check_converged("Final").await {
            self.result.invariant_violations.push(v);
        }
    }

    pub fn result(&self) -> &SyncDSTResult {
        &self.result
    }

    pub fn into_result(self) -> SyncDSTResult {
        self.result
    }
}

/// Run a batch of DST tests with different seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    rounds_per_run: usize,
    config_fn: impl Fn(u64) -> SyncDSTConfig,
) -> Vec<SyncDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = SyncDSTHarness::new(config_fn(seed));
        harness.run(rounds_per_run).await;
        harness.check_invariants().await;
        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[SyncDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_runs: u64 = results.iter().map(|r| r.total_runs()).sum();
    let failed_runs: u64 = results.iter().map(|r| r.runs_failed).sum();
    let partial_runs: u64 = results.iter().map(|r| r.runs_partially_failed).sum();
    let faults: u64 = results.iter().map(|r| r.store_stats.total_failures()).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} runs ({} partially failed, {} failed), {} injected faults",
        passed, total, total_runs, partial_runs, failed_runs, faults
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
        if let Some(first) = results.iter().find(|r| !r.is_success()) {
            summary.push_str(&format!("\nFirst violation: {}", first.invariant_violations[0]));
        }
    }

    summary
}
