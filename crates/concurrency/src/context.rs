//! Per-transaction state
//!
//! `TxnCore` is the state every component operates on: lifecycle state,
//! start timestamp, flags, the mutation buffer and the hash of the last
//! response context. It is exclusively owned by one transaction handle;
//! components borrow it mutably for the duration of a call.
//!
//! State transitions happen only through the `mark_*` methods, which also
//! keep the client's lifecycle counters in step.

use crate::buffer::MutationBuffer;
use crate::metrics::ClientMetrics;
use lattice_core::{Error, Request, Result, Timestamp, TxnContext, TxnState};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;

/// State of one client transaction
#[derive(Debug)]
pub struct TxnCore {
    state: TxnState,
    start_ts: Timestamp,
    commit_ts: Timestamp,
    best_effort: bool,
    // start ts was issued for a best-effort read and may be shared
    shared_snapshot: bool,
    read_only: bool,
    buffer: MutationBuffer,
    hash: String,
    metrics: Arc<ClientMetrics>,
}

impl TxnCore {
    /// Create an active transaction and count it as started
    ///
    /// `start_ts` may be unassigned; the first response then assigns it.
    pub fn new(
        start_ts: Timestamp,
        read_only: bool,
        best_effort: bool,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        metrics.record_start();
        Self {
            state: TxnState::Active,
            start_ts,
            commit_ts: Timestamp::UNASSIGNED,
            best_effort,
            shared_snapshot: best_effort && start_ts.is_assigned(),
            read_only,
            buffer: MutationBuffer::new(),
            hash: String::new(),
            metrics,
        }
    }

    // === Accessors ===

    /// Current lifecycle state
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Start timestamp, unassigned until the oracle or first response sets it
    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    /// Commit timestamp, assigned once committed through the cluster
    pub fn commit_ts(&self) -> Timestamp {
        self.commit_ts
    }

    /// Whether reads skip waiting for in-flight commits
    pub fn is_best_effort(&self) -> bool {
        self.best_effort
    }

    /// Whether the transaction was created read-only
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether the transaction still accepts operations
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    /// The mutation buffer
    pub fn buffer(&self) -> &MutationBuffer {
        &self.buffer
    }

    /// Touched conflict keys
    pub fn touched_keys(&self) -> &BTreeSet<String> {
        self.buffer.keys()
    }

    /// Number of staged mutations
    pub fn pending_mutations(&self) -> usize {
        self.buffer.len()
    }

    /// The linearization token as it stands
    pub fn context(&self) -> TxnContext {
        let mut context = TxnContext::from_sets(
            self.start_ts,
            &self.hash,
            self.buffer.keys(),
            self.buffer.predicates(),
        );
        context.commit_ts = self.commit_ts;
        context
    }

    // === Guards ===

    /// Check that the transaction can accept operations
    ///
    /// # Errors
    /// Returns `ActiveStateRequired` if the transaction is terminal.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::not_active(self.state))
        }
    }

    /// Check that the transaction can write
    ///
    /// # Errors
    /// - `ActiveStateRequired` if terminal
    /// - `ReadOnly` on a read-only transaction
    /// - `BestEffortWithMutations` while best-effort reads are enabled, or
    ///   once the start timestamp was issued for a best-effort read
    pub fn ensure_writable(&self, operation: &'static str) -> Result<()> {
        self.ensure_active()?;
        if self.read_only {
            return Err(Error::ReadOnly { operation });
        }
        if self.best_effort || self.shared_snapshot {
            return Err(Error::BestEffortWithMutations);
        }
        Ok(())
    }

    /// Toggle best-effort reads
    ///
    /// # Errors
    /// - `ActiveStateRequired` if terminal
    /// - `BestEffortWithMutations` when enabling with mutations staged
    pub fn set_best_effort(&mut self, best_effort: bool) -> Result<()> {
        self.ensure_active()?;
        if best_effort && !self.buffer.is_empty() {
            return Err(Error::BestEffortWithMutations);
        }
        self.best_effort = best_effort;
        Ok(())
    }

    // === Requests ===

    /// Build a request carrying the current context and flags
    pub fn request(&self, query: &str, vars: HashMap<String, String>) -> Request {
        Request {
            start_ts: self.start_ts,
            query: query.to_string(),
            vars,
            mutations: Vec::new(),
            commit_now: false,
            read_only: self.read_only,
            best_effort: self.best_effort,
            hash: self.hash.clone(),
        }
    }

    /// Stage a mutation in the buffer
    pub(crate) fn stage(&mut self, mutation: lattice_core::Mutation) {
        self.buffer.stage(mutation);
    }

    /// Merge a response context into the transaction
    ///
    /// Assigns the start timestamp on first contact. A context carrying a
    /// different assigned start timestamp fails the transaction.
    ///
    /// # Errors
    /// Returns `Cluster` on a start timestamp mismatch.
    pub fn merge_context(&mut self, context: &TxnContext) -> Result<()> {
        if context.start_ts.is_assigned() {
            if !self.start_ts.is_assigned() {
                self.start_ts = context.start_ts;
                self.shared_snapshot = self.best_effort;
            } else if self.start_ts != context.start_ts {
                let reason = format!(
                    "start timestamp mismatch: transaction has {}, response carries {}",
                    self.start_ts, context.start_ts
                );
                self.mark_failed(&reason);
                return Err(Error::cluster(reason));
            }
        }
        if !context.hash.is_empty() {
            self.hash = context.hash.clone();
        }
        self.buffer.merge_context(&context.keys, &context.preds);
        Ok(())
    }

    // === State transitions ===

    /// Transition `Active` → `Committed`
    ///
    /// Flushes the buffer and records the commit timestamp if one is known.
    /// No-op if already terminal.
    pub fn mark_committed(&mut self, commit_ts: Timestamp) {
        if !self.is_active() {
            return;
        }
        self.state = TxnState::Committed;
        self.commit_ts = commit_ts;
        self.buffer.flush();
        self.metrics.record_commit();
    }

    /// Transition `Active` → `Failed`
    ///
    /// No-op if already terminal.
    pub fn mark_failed(&mut self, reason: &str) {
        if !self.is_active() {
            return;
        }
        self.state = TxnState::Failed;
        self.metrics.record_failure();
        warn!(
            target: "lattice::txn",
            start_ts = %self.start_ts,
            keys = self.buffer.keys().len(),
            reason,
            "Transaction failed"
        );
    }

    /// Transition `Active` → `Discarded`
    ///
    /// Returns `false` if the transaction was already terminal.
    pub fn mark_discarded(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.state = TxnState::Discarded;
        self.metrics.record_discard();
        true
    }
}
