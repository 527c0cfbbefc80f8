//! Transaction lifecycle counters shared by every transaction of a client
//!
//! # Memory Ordering
//!
//! The counters use Relaxed ordering. They are observational only and do not
//! synchronize any other memory operations, so approximate counts under
//! concurrency are acceptable. `fetch_add`/`fetch_update` still guarantee no
//! torn reads or writes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live lifecycle counters
#[derive(Debug, Default)]
pub struct ClientMetrics {
    active_count: AtomicU64,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_discarded: AtomicU64,
    total_failed: AtomicU64,
}

impl ClientMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transaction start
    pub fn record_start(&self) {
        self.active_count.fetch_add(1, Ordering::Relaxed);
        self.total_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful commit
    pub fn record_commit(&self) {
        self.finish_one();
        self.total_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a discard of an active transaction
    pub fn record_discard(&self) {
        self.finish_one();
        self.total_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transaction ending without committing
    pub fn record_failure(&self) {
        self.finish_one();
        self.total_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn finish_one(&self) {
        // Saturating decrement to prevent underflow
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
    }

    /// Snapshot of the current counters
    pub fn snapshot(&self) -> TransactionMetrics {
        let started = self.total_started.load(Ordering::Relaxed);
        let committed = self.total_committed.load(Ordering::Relaxed);

        TransactionMetrics {
            active_count: self.active_count.load(Ordering::Relaxed),
            total_started: started,
            total_committed: committed,
            total_discarded: self.total_discarded.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            commit_rate: if started > 0 {
                committed as f64 / started as f64
            } else {
                0.0
            },
        }
    }
}

/// Transaction metrics
///
/// Provides statistics about transaction lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionMetrics {
    /// Number of currently active transactions
    pub active_count: u64,
    /// Total number of transactions started
    pub total_started: u64,
    /// Total number of transactions committed
    pub total_committed: u64,
    /// Total number of transactions discarded by the caller
    pub total_discarded: u64,
    /// Total number of transactions that failed (conflict or fault)
    pub total_failed: u64,
    /// Commit success rate (committed / started)
    pub commit_rate: f64,
}

impl TransactionMetrics {
    /// Total transactions that reached a terminal state
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_discarded + self.total_failed
    }

    /// Failure rate (failed / started)
    pub fn failure_rate(&self) -> f64 {
        if self.total_started > 0 {
            self.total_failed as f64 / self.total_started as f64
        } else {
            0.0
        }
    }
}
