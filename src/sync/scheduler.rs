//! Periodic trigger for reconciliation runs
//!
//! The scheduler ticks on a fixed interval and runs one reconciliation per
//! configured pair per tick. Runs for the same ordered (source, target)
//! pair never overlap: every run first claims its pair in a process-wide
//! [`PairRegistry`], and a trigger that finds the pair busy is skipped.
//!
//! Shutdown is cooperative. Cancelling the shutdown token stops new ticks and
//! cancels the active run's child token, so in-flight store calls finish but
//! nothing new starts.

use super::reconciler::Reconciler;
use super::report::RunReport;
use super::types::{DeletionPolicy, RunStatus};
use crate::clock::{Clock, SystemClock};
use crate::store::ObjectStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default interval between runs
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// What to do with ticks that fire while a run is still going
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Drop missed ticks and wait for the next scheduled one
    #[default]
    Skip,
    /// Run missed ticks once the active run finishes
    Queue,
}

impl OverlapPolicy {
    pub fn missed_tick_behavior(&self) -> MissedTickBehavior {
        match self {
            OverlapPolicy::Skip => MissedTickBehavior::Skip,
            OverlapPolicy::Queue => MissedTickBehavior::Delay,
        }
    }
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(OverlapPolicy::Skip),
            "queue" => Ok(OverlapPolicy::Queue),
            other => Err(format!("unknown overlap policy {:?} (expected skip or queue)", other)),
        }
    }
}

/// An ordered (source, target) bucket pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncPair {
    pub source: String,
    pub target: String,
}

impl SyncPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        SyncPair {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn reversed(&self) -> Self {
        SyncPair {
            source: self.target.clone(),
            target: self.source.clone(),
        }
    }
}

impl fmt::Display for SyncPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

/// Tracks which pairs have a run in progress
#[derive(Debug, Default)]
pub struct PairRegistry {
    active: Mutex<HashSet<SyncPair>>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<PairRegistry>> = OnceLock::new();

impl PairRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every scheduler in this process
    pub fn global() -> Arc<PairRegistry> {
        GLOBAL_REGISTRY
            .get_or_init(|| Arc::new(PairRegistry::new()))
            .clone()
    }

    /// Claim `pair`; `None` if a run for it is already active
    pub fn try_acquire(self: &Arc<Self>, pair: &SyncPair) -> Option<PairGuard> {
        if !self.active.lock().insert(pair.clone()) {
            return None;
        }
        Some(PairGuard {
            registry: self.clone(),
            pair: pair.clone(),
        })
    }

    pub fn is_active(&self, pair: &SyncPair) -> bool {
        self.active.lock().contains(pair)
    }
}

/// Releases its pair on drop
#[derive(Debug)]
pub struct PairGuard {
    registry: Arc<PairRegistry>,
    pair: SyncPair,
}

impl PairGuard {
    pub fn pair(&self) -> &SyncPair {
        &self.pair
    }
}

impl Drop for PairGuard {
    fn drop(&mut self) {
        self.registry.active.lock().remove(&self.pair);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub pair: SyncPair,
    pub policy: DeletionPolicy,
    pub interval: Duration,
    pub overlap: OverlapPolicy,
    /// Also run target -> source after source -> target on every tick
    pub bidirectional: bool,
    /// Cancel a run that takes longer than this
    pub run_timeout: Option<Duration>,
}

impl SchedulerConfig {
    pub fn new(pair: SyncPair) -> Self {
        SchedulerConfig {
            pair,
            policy: DeletionPolicy::default(),
            interval: DEFAULT_INTERVAL,
            overlap: OverlapPolicy::default(),
            bidirectional: false,
            run_timeout: None,
        }
    }

    /// Pairs run on each tick, in order
    pub fn pairs(&self) -> Vec<SyncPair> {
        if self.bidirectional {
            vec![self.pair.clone(), self.pair.reversed()]
        } else {
            vec![self.pair.clone()]
        }
    }
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    Ran(Box<RunReport>),
    /// Another run for the pair was still active
    Skipped(SyncPair),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub runs: u64,
    pub skipped: u64,
    pub failed_runs: u64,
    pub partially_failed_runs: u64,
}

impl SchedulerStats {
    fn record(&mut self, outcome: &TickOutcome) {
        match outcome {
            TickOutcome::Skipped(_) => self.skipped += 1,
            TickOutcome::Ran(report) => {
                self.runs += 1;
                match report.status() {
                    RunStatus::Failed => self.failed_runs += 1,
                    RunStatus::PartiallyFailed => self.partially_failed_runs += 1,
                    RunStatus::Succeeded => {}
                }
            }
        }
    }
}

pub struct Scheduler<S: ObjectStore, C: Clock = SystemClock> {
    reconciler: Arc<Reconciler<S, C>>,
    config: SchedulerConfig,
    registry: Arc<PairRegistry>,
}

impl<S: ObjectStore, C: Clock> Scheduler<S, C> {
    pub fn new(reconciler: Arc<Reconciler<S, C>>, config: SchedulerConfig) -> Self {
        Self::with_registry(reconciler, config, PairRegistry::global())
    }

    pub fn with_registry(
        reconciler: Arc<Reconciler<S, C>>,
        config: SchedulerConfig,
        registry: Arc<PairRegistry>,
    ) -> Self {
        Scheduler {
            reconciler,
            config,
            registry,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PairRegistry> {
        &self.registry
    }

    /// Run every configured pair once, sequentially
    pub async fn tick(&self, shutdown: &CancellationToken) -> Vec<TickOutcome> {
        let mut outcomes = Vec::new();
        for pair in self.config.pairs() {
            if shutdown.is_cancelled() {
                break;
            }
            outcomes.push(self.trigger(&pair, shutdown).await);
        }
        outcomes
    }

    /// Run one pair now unless a run for it is already active
    pub async fn trigger(&self, pair: &SyncPair, shutdown: &CancellationToken) -> TickOutcome {
        let Some(_guard) = self.registry.try_acquire(pair) else {
            info!(pair = %pair, "Previous run still active, skipping trigger");
            return TickOutcome::Skipped(pair.clone());
        };

        let run_cancel = shutdown.child_token();
        let run = self.reconciler.run_with_report(
            &pair.source,
            &pair.target,
            self.config.policy,
            &run_cancel,
        );

        let report = match self.config.run_timeout {
            None => run.await,
            Some(limit) => {
                tokio::pin!(run);
                tokio::select! {
                    report = &mut run => report,
                    _ = tokio::time::sleep(limit) => {
                        warn!(
                            pair = %pair,
                            timeout_ms = limit.as_millis() as u64,
                            "Run exceeded its timeout, cancelling"
                        );
                        run_cancel.cancel();
                        run.await
                    }
                }
            }
        };
        TickOutcome::Ran(Box::new(report))
    }

    /// Tick until `shutdown` is cancelled
    ///
    /// The first tick fires immediately.
    pub async fn run(&self, shutdown: CancellationToken) -> SchedulerStats {
        let mut stats = SchedulerStats::default();
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(self.config.overlap.missed_tick_behavior());

        info!(
            pair = %self.config.pair,
            interval_secs = self.config.interval.as_secs_f64(),
            policy = %self.config.policy,
            bidirectional = self.config.bidirectional,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            stats.ticks += 1;
            for outcome in self.tick(&shutdown).await {
                stats.record(&outcome);
            }
        }

        info!(
            ticks = stats.ticks,
            runs = stats.runs,
            skipped = stats.skipped,
            "Scheduler stopped"
        );
        stats
    }

    /// Run the scheduler on its own task
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<SchedulerStats> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_rejects_second_claim() {
        let registry = Arc::new(PairRegistry::new());
        let pair = SyncPair::new("a", "b");

        let guard = registry.try_acquire(&pair).unwrap();
        assert!(registry.try_acquire(&pair).is_none());
        assert!(registry.is_active(&pair));

        // Reverse direction is a different pair
        assert!(registry.try_acquire(&pair.reversed()).is_some());

        drop(guard);
        assert!(!registry.is_active(&pair));
        assert!(registry.try_acquire(&pair).is_some());
    }

    #[test]
    fn test_global_registry_is_shared() {
        assert!(Arc::ptr_eq(&PairRegistry::global(), &PairRegistry::global()));
    }

    #[test]
    fn test_overlap_policy() {
        assert_eq!("queue".parse::<OverlapPolicy>().unwrap(), OverlapPolicy::Queue);
        assert_eq!("SKIP".parse::<OverlapPolicy>().unwrap(), OverlapPolicy::Skip);
        assert!("later".parse::<OverlapPolicy>().is_err());
        assert_eq!(OverlapPolicy::Queue.missed_tick_behavior(), MissedTickBehavior::Delay);
    }

    #[test]
    fn test_bidirectional_pairs() {
        let mut config = SchedulerConfig::new(SyncPair::new("a", "b"));
        assert_eq!(config.pairs().len(), 1);
        config.bidirectional = true;
        assert_eq!(
            config.pairs(),
            vec![SyncPair::new("a", "b"), SyncPair::new("b", "a")]
        );
        assert_eq!(config.pairs()[1].to_string(), "b -> a");
    }
}
