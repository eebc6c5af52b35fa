//! Simulated Object Store with Fault Injection
//!
//! DST wrapper that injects faults in front of any other store. Every fault
//! decision is drawn from a seeded [`Rng`], so a failing simulation replays
//! exactly from its seed (FoundationDB-style).

use super::{DeleteOutcome, ListPage, ObjectMeta, ObjectStore, StoreFuture};
use crate::error::StoreError;
use crate::io::Rng;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Timeout reported by injected timeout faults
const SIMULATED_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of a LIST page failing transiently
    pub list_fail_prob: f64,
    /// Probability of HEAD failing transiently
    pub head_fail_prob: f64,
    /// Probability of COPY failing transiently before it is applied
    pub copy_fail_prob: f64,
    /// Probability of COPY being applied but its acknowledgement lost
    pub copy_lost_ack_prob: f64,
    /// Probability of DELETE failing transiently
    pub delete_fail_prob: f64,
    /// Probability of any call timing out
    pub timeout_prob: f64,
    /// Keys whose head, copy and delete always fail with PermissionDenied
    pub permission_denied_keys: HashSet<String>,
    /// Bucket whose listing breaks permanently partway through
    pub broken_listing: Option<BrokenListing>,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

/// A listing outage: every page of `bucket` from `after_pages` onwards fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenListing {
    pub bucket: String,
    pub after_pages: usize,
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            list_fail_prob: 0.02,           // 2%
            head_fail_prob: 0.01,           // 1%
            copy_fail_prob: 0.02,           // 2%
            copy_lost_ack_prob: 0.01,       // 1%
            delete_fail_prob: 0.02,         // 2%
            timeout_prob: 0.005,            // 0.5%
            permission_denied_keys: HashSet::new(),
            broken_listing: None,
            latency_range_us: (0, 1_000), // up to 1ms
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            list_fail_prob: 0.10,
            head_fail_prob: 0.10,
            copy_fail_prob: 0.15,
            copy_lost_ack_prob: 0.05,
            delete_fail_prob: 0.15,
            timeout_prob: 0.05,
            permission_denied_keys: HashSet::new(),
            broken_listing: None,
            latency_range_us: (0, 5_000),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            list_fail_prob: 0.0,
            head_fail_prob: 0.0,
            copy_fail_prob: 0.0,
            copy_lost_ack_prob: 0.0,
            delete_fail_prob: 0.0,
            timeout_prob: 0.0,
            permission_denied_keys: HashSet::new(),
            broken_listing: None,
            latency_range_us: (0, 0),
        }
    }

    pub fn with_permission_denied(mut self, key: impl Into<String>) -> Self {
        self.permission_denied_keys.insert(key.into());
        self
    }

    pub fn with_broken_listing(mut self, bucket: impl Into<String>, after_pages: usize) -> Self {
        self.broken_listing = Some(BrokenListing {
            bucket: bucket.into(),
            after_pages,
        });
        self
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub list_attempts: u64,
    pub list_failures: u64,
    pub head_attempts: u64,
    pub head_failures: u64,
    pub copy_attempts: u64,
    pub copy_failures: u64,
    pub copy_lost_acks: u64,
    pub delete_attempts: u64,
    pub delete_failures: u64,
    pub timeouts: u64,
    pub permission_denials: u64,
    /// Copy and delete calls, per destination bucket, that reached the inner store
    pub mutations: HashMap<String, u64>,
}

impl SimulatedStoreStats {
    pub fn mutations_of(&self, bucket: &str) -> u64 {
        self.mutations.get(bucket).copied().unwrap_or(0)
    }

    /// Fold another store's counters into these
    pub fn merge(&mut self, other: &SimulatedStoreStats) {
        self.list_attempts += other.list_attempts;
        self.list_failures += other.list_failures;
        self.head_attempts += other.head_attempts;
        self.head_failures += other.head_failures;
        self.copy_attempts += other.copy_attempts;
        self.copy_failures += other.copy_failures;
        self.copy_lost_acks += other.copy_lost_acks;
        self.delete_attempts += other.delete_attempts;
        self.delete_failures += other.delete_failures;
        self.timeouts += other.timeouts;
        self.permission_denials += other.permission_denials;
        for (bucket, count) in &other.mutations {
            *self.mutations.entry(bucket.clone()).or_insert(0) += count;
        }
    }

    pub fn total_failures(&self) -> u64 {
        self.list_failures
            + self.head_failures
            + self.copy_failures
            + self.copy_lost_acks
            + self.delete_failures
            + self.timeouts
            + self.permission_denials
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    List,
    Head,
    Copy,
    Delete,
}

struct SimulatedStoreInner<R: Rng> {
    rng: R,
    stats: SimulatedStoreStats,
    faults_enabled: bool,
    /// Pages served per bucket since the last traversal started
    pages_served: HashMap<String, usize>,
}

/// Simulated object store that wraps another store and injects faults
pub struct SimulatedObjectStore<S: ObjectStore, R: Rng> {
    inner_store: S,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner<R>>>,
}

impl<S: ObjectStore + Clone, R: Rng> Clone for SimulatedObjectStore<S, R> {
    fn clone(&self) -> Self {
        SimulatedObjectStore {
            inner_store: self.inner_store.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
        }
    }
}

impl<S: ObjectStore, R: Rng> SimulatedObjectStore<S, R> {
    pub fn new(inner_store: S, rng: R, config: SimulatedStoreConfig) -> Self {
        SimulatedObjectStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng,
                stats: SimulatedStoreStats::default(),
                faults_enabled: true,
                pages_served: HashMap::new(),
            })),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    pub fn config(&self) -> &SimulatedStoreConfig {
        &self.config
    }

    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// Turn every fault (random or configured) on or off
    pub fn set_faults_enabled(&self, enabled: bool) {
        self.state.lock().faults_enabled = enabled;
    }

    /// Roll for a random fault on `op`, updating stats
    fn roll_fault(&self, op: Op) -> Option<StoreError> {
        let mut s = self.state.lock();
        match op {
            Op::List => s.stats.list_attempts += 1,
            Op::Head => s.stats.head_attempts += 1,
            Op::Copy => s.stats.copy_attempts += 1,
            Op::Delete => s.stats.delete_attempts += 1,
        }
        if !s.faults_enabled {
            return None;
        }

        if s.rng.gen_bool(self.config.timeout_prob) {
            s.stats.timeouts += 1;
            return Some(StoreError::Timeout(SIMULATED_TIMEOUT));
        }

        let prob = match op {
            Op::List => self.config.list_fail_prob,
            Op::Head => self.config.head_fail_prob,
            Op::Copy => self.config.copy_fail_prob,
            Op::Delete => self.config.delete_fail_prob,
        };
        if s.rng.gen_bool(prob) {
            match op {
                Op::List => s.stats.list_failures += 1,
                Op::Head => s.stats.head_failures += 1,
                Op::Copy => s.stats.copy_failures += 1,
                Op::Delete => s.stats.delete_failures += 1,
            }
            return Some(StoreError::Transient(format!("simulated {:?} failure", op)));
        }
        None
    }

    fn check_permission(&self, key: &str) -> Option<StoreError> {
        let mut s = self.state.lock();
        if s.faults_enabled && self.config.permission_denied_keys.contains(key) {
            s.stats.permission_denials += 1;
            return Some(StoreError::PermissionDenied(format!("simulated: {}", key)));
        }
        None
    }

    /// Page index of this listing call, or an outage error for broken buckets
    fn check_listing(&self, bucket: &str, continuation_token: Option<&str>) -> Option<StoreError> {
        let mut s = self.state.lock();
        if continuation_token.is_none() {
            s.pages_served.insert(bucket.to_string(), 0);
        }
        let page = s.pages_served.get(bucket).copied().unwrap_or(0);

        match &self.config.broken_listing {
            Some(broken) if s.faults_enabled && broken.bucket == bucket && page >= broken.after_pages => {
                s.stats.list_failures += 1;
                Some(StoreError::Transient(format!(
                    "simulated listing outage on {} page {}",
                    bucket, page
                )))
            }
            _ => None,
        }
    }

    fn record_page(&self, bucket: &str) {
        *self.state.lock().pages_served.entry(bucket.to_string()).or_insert(0) += 1;
    }

    fn record_mutation(&self, bucket: &str) {
        *self
            .state
            .lock()
            .stats
            .mutations
            .entry(bucket.to_string())
            .or_insert(0) += 1;
    }

    fn roll_lost_ack(&self) -> bool {
        let mut s = self.state.lock();
        if s.faults_enabled && s.rng.gen_bool(self.config.copy_lost_ack_prob) {
            s.stats.copy_lost_acks += 1;
            return true;
        }
        false
    }

    async fn simulate_latency(&self) {
        let (min, max) = self.config.latency_range_us;
        if max == 0 {
            return;
        }
        let us = self.state.lock().rng.gen_range(min, max);
        if us > 0 {
            tokio::time::sleep(Duration::from_micros(us)).await;
        }
    }
}

impl<S: ObjectStore, R: Rng> ObjectStore for SimulatedObjectStore<S, R> {
    fn list_page<'a>(
        &'a self,
        bucket: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListPage> {
        Box::pin(async move {
            self.simulate_latency().await;
            if let Some(e) = self.roll_fault(Op::List) {
                return Err(e);
            }
            if let Some(e) = self.check_listing(bucket, continuation_token) {
                return Err(e);
            }
            let page = self.inner_store.list_page(bucket, continuation_token).await?;
            self.record_page(bucket);
            Ok(page)
        })
    }

    fn head<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, Option<ObjectMeta>> {
        Box::pin(async move {
            self.simulate_latency().await;
            if let Some(e) = self.check_permission(key).or_else(|| self.roll_fault(Op::Head)) {
                return Err(e);
            }
            self.inner_store.head(bucket, key).await
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
            self.simulate_latency().await;
            if let Some(e) = self
                .check_permission(source_key)
                .or_else(|| self.roll_fault(Op::Copy))
            {
                return Err(e);
            }

            self.record_mutation(dest_bucket);
            self.inner_store
                .copy(source_bucket, source_key, dest_bucket, dest_key)
                .await?;

            // The copy landed, but the caller never hears about it
            if self.roll_lost_ack() {
                return Err(StoreError::Transient("simulated lost copy ack".to_string()));
            }
            Ok(())
        })
    }

    fn delete<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, DeleteOutcome> {
        Box::pin(async move {
            self.simulate_latency().await;
            if let Some(e) = self.check_permission(key).or_else(|| self.roll_fault(Op::Delete)) {
                return Err(e);
            }
            self.record_mutation(bucket);
            self.inner_store.delete(bucket, key).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SimulatedRng;
    use crate::store::InMemoryObjectStore;

    fn seeded_store() -> InMemoryObjectStore {
        let store = InMemoryObjectStore::new().with_page_size(2);
        for i in 0..5 {
            store.put("src", &format!("k{}", i), b"x");
        }
        store.create_bucket("dst");
        store
    }

    #[tokio::test]
    async fn test_no_faults_passthrough() {
        let store = SimulatedObjectStore::new(
            seeded_store(),
            SimulatedRng::new(42),
            SimulatedStoreConfig::no_faults(),
        );

        for i in 0..5 {
            let key = format!("k{}", i);
            store.copy("src", &key, "dst", &key).await.unwrap();
        }
        assert_eq!(store.inner().len("dst"), 5);

        let stats = store.stats();
        assert_eq!(stats.copy_attempts, 5);
        assert_eq!(stats.total_failures(), 0);
        assert_eq!(stats.mutations_of("dst"), 5);
        assert_eq!(stats.mutations_of("src"), 0);
    }

    #[tokio::test]
    async fn test_faults_are_deterministic() {
        async fn run(seed: u64) -> (Vec<bool>, SimulatedStoreStats) {
            let store = SimulatedObjectStore::new(
                seeded_store(),
                SimulatedRng::new(seed),
                SimulatedStoreConfig::high_chaos(),
            );
            let mut outcomes = Vec::new();
            for i in 0..50 {
                let key = format!("k{}", i % 5);
                outcomes.push(store.copy("src", &key, "dst", &key).await.is_ok());
            }
            (outcomes, store.stats())
        }

        let (a, stats_a) = run(7).await;
        let (b, stats_b) = run(7).await;
        assert_eq!(a, b);
        assert_eq!(stats_a, stats_b);
    }

    #[tokio::test]
    async fn test_permission_denied_keys() {
        let store = SimulatedObjectStore::new(
            seeded_store(),
            SimulatedRng::new(1),
            SimulatedStoreConfig::no_faults().with_permission_denied("k1"),
        );

        let err = store.copy("src", "k1", "dst", "k1").await.unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));
        assert!(store.copy("src", "k2", "dst", "k2").await.is_ok());
        assert_eq!(store.stats().permission_denials, 1);

        store.set_faults_enabled(false);
        assert!(store.copy("src", "k1", "dst", "k1").await.is_ok());
    }

    #[tokio::test]
    async fn test_broken_listing_fails_mid_pagination() {
        let store = SimulatedObjectStore::new(
            seeded_store(),
            SimulatedRng::new(1),
            SimulatedStoreConfig::no_faults().with_broken_listing("src", 1),
        );

        let first = store.list_page("src", None).await.unwrap();
        let token = first.next_token.unwrap();
        let err = store.list_page("src", Some(&token)).await.unwrap_err();
        assert!(err.is_transient());
        // Still broken on retry
        assert!(store.list_page("src", Some(&token)).await.is_err());
        // A fresh traversal gets its first page again
        assert!(store.list_page("src", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_lost_ack_still_applies_copy() {
        let mut config = SimulatedStoreConfig::no_faults();
        config.copy_lost_ack_prob = 1.0;
        let store = SimulatedObjectStore::new(seeded_store(), SimulatedRng::new(3), config);

        let err = store.copy("src", "k0", "dst", "k0").await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.inner().get("dst", "k0").is_some());
        assert_eq!(store.stats().copy_lost_acks, 1);
    }
}
