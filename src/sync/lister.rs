//! Lister: drives store pagination into a complete bucket snapshot
//!
//! A listing either covers the whole bucket or fails. A partial snapshot
//! would make the diff copy too little or delete too much, so no error here
//! is ever swallowed.

use super::retry::RetryPolicy;
use super::types::Snapshot;
use crate::error::ListingError;
use crate::store::ObjectStore;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct Lister<S: ObjectStore> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: ObjectStore> Clone for Lister<S> {
    fn clone(&self) -> Self {
        Lister {
            store: self.store.clone(),
            retry: self.retry,
        }
    }
}

impl<S: ObjectStore> Lister<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Lister { store, retry }
    }

    /// Enumerate every object in `bucket`
    ///
    /// Each page is retried on transient errors. Permission errors and
    /// exhausted retries fail the whole listing, as does a continuation
    /// token the store hands out twice.
    pub async fn list(
        &self,
        bucket: &str,
        cancel: &CancellationToken,
    ) -> Result<Snapshot, ListingError> {
        let mut snapshot = Snapshot::new(bucket);
        let mut seen_tokens: HashSet<String> = HashSet::new();
        let mut token: Option<String> = None;
        let mut page = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(ListingError::Cancelled {
                    bucket: bucket.to_string(),
                    pages: page,
                });
            }

            let store = &self.store;
            let retry = &self.retry;
            let current = token.as_deref();
            let result = self
                .retry
                .retry("list_page", cancel, move |_| {
                    retry.timed(store.list_page(bucket, current))
                })
                .await;

            let list_page = match result {
                Ok(p) => p,
                Err(e) if e.cancelled => {
                    return Err(ListingError::Cancelled {
                        bucket: bucket.to_string(),
                        pages: page,
                    });
                }
                Err(e) if e.error.is_transient() => {
                    return Err(ListingError::RetriesExhausted {
                        bucket: bucket.to_string(),
                        page,
                        attempts: e.attempts,
                        source: e.error,
                    });
                }
                Err(e) => {
                    return Err(ListingError::Fatal {
                        bucket: bucket.to_string(),
                        page,
                        source: e.error,
                    });
                }
            };

            let count = list_page.objects.len();
            for meta in list_page.objects {
                snapshot.insert(meta);
            }
            debug!(bucket, page, objects = count, total = snapshot.len(), "Listed page");
            page += 1;

            match list_page.next_token {
                Some(next) => {
                    if !seen_tokens.insert(next.clone()) {
                        return Err(ListingError::CursorLoop {
                            bucket: bucket.to_string(),
                            token: next,
                        });
                    }
                    token = Some(next);
                }
                None => break,
            }
        }

        debug!(bucket, pages = page, objects = snapshot.len(), "Listing complete");
        Ok(snapshot)
    }
}
