//! Deduplication filter (spec C1 / §4.1).
//!
//! Rejects articles whose content fingerprint was seen within the TTL
//! window. Fails *open* (accepts) when the fast store is unreachable,
//! since duplicates downstream are tolerable but data loss is not.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use caster_fingerprint::fingerprint;
use caster_store::FastStore;
use tracing::warn;

/// Fast-store key for the dedup fingerprint set (spec §6.2).
pub const FINGERPRINTS_KEY: &str = "reviewer:fingerprints";

/// Default dedup TTL: 30 days, per spec §4.1.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(2_592_000);

/// Outcome of [`DedupFilter::accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    Accepted,
    Duplicate,
}

/// The dedup gate in front of the review router.
pub struct DedupFilter<'a> {
    store: &'a dyn FastStore,
    ttl: Duration,
    bypassed: AtomicU64,
}

impl<'a> DedupFilter<'a> {
    pub fn new(store: &'a dyn FastStore, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            bypassed: AtomicU64::new(0),
        }
    }

    pub fn with_default_ttl(store: &'a dyn FastStore) -> Self {
        Self::new(store, DEFAULT_DEDUP_TTL)
    }

    /// Compute the fingerprint and attempt a conditional insert. Fails open
    /// (accepts, increments [`Self::bypassed_count`]) if the store errors,
    /// per spec §4.1 Failure policy.
    pub fn accept(&self, title: &str, body: &str) -> DedupOutcome {
        let fp = fingerprint(title, body);
        match self.store.set_add_if_absent(FINGERPRINTS_KEY, &fp, self.ttl) {
            Ok(true) => DedupOutcome::Accepted,
            Ok(false) => DedupOutcome::Duplicate,
            Err(err) => {
                warn!(error = %err, "dedup store unreachable, failing open");
                self.bypassed.fetch_add(1, Ordering::Relaxed);
                DedupOutcome::Accepted
            }
        }
    }

    /// Count of articles accepted because the dedup store was unreachable
    /// (the `dedup_bypassed` counter of spec §4.1).
    pub fn bypassed_count(&self) -> u64 {
        self.bypassed.load(Ordering::Relaxed)
    }
}
