//! Transaction handle
//!
//! `Transaction` is what applications hold. It owns the transaction state
//! and shares the transport, configuration and counters of the client that
//! created it. Every operation takes `&mut self`, so operations on one
//! handle are ordered by the borrow checker; separate handles are fully
//! independent.
//!
//! # Example
//!
//! ```ignore
//! let mut txn = client.new_transaction();
//! txn.mutate(Mutation::set_nquads("<0x1> <name> \"Alice\" .")).await?;
//! let resp = txn.query("<0x1> <name>").await?;
//! txn.commit().await?;
//! ```

use crate::context::TxnCore;
use crate::coordinator::Coordinator;
use crate::query::QueryExecutor;
use lattice_core::{
    AssignedKeys, ClientConfig, Error, Mutation, Response, Result, Timestamp, Transport, TxnContext,
    TxnState,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;

/// A client transaction
pub struct Transaction {
    core: TxnCore,
    transport: Arc<dyn Transport>,
    config: Arc<ClientConfig>,
}

impl Transaction {
    pub(crate) fn new(core: TxnCore, transport: Arc<dyn Transport>, config: Arc<ClientConfig>) -> Self {
        Self {
            core,
            transport,
            config,
        }
    }

    /// Run a query at the transaction's snapshot
    pub async fn query(&mut self, query: &str) -> Result<Response> {
        self.query_with_vars(query, HashMap::new()).await
    }

    /// Run a query with variables
    pub async fn query_with_vars(
        &mut self,
        query: &str,
        vars: HashMap<String, String>,
    ) -> Result<Response> {
        let executor = QueryExecutor::new(self.transport.as_ref(), self.config.request_timeout());
        executor.query(&mut self.core, query, vars).await
    }

    /// Send a mutation
    ///
    /// A mutation with `commit_now` set commits the transaction in the same
    /// round trip; afterwards [`commit`](Self::commit) fails with
    /// `ActiveStateRequired`.
    pub async fn mutate(&mut self, mutation: Mutation) -> Result<AssignedKeys> {
        let coordinator = Coordinator::new(self.transport.as_ref(), &self.config);
        coordinator.mutate(&mut self.core, mutation).await
    }

    /// Send a query and mutations in one round trip
    pub async fn do_request(
        &mut self,
        query: &str,
        vars: HashMap<String, String>,
        mutations: Vec<Mutation>,
        commit_now: bool,
    ) -> Result<Response> {
        let coordinator = Coordinator::new(self.transport.as_ref(), &self.config);
        coordinator
            .do_request(&mut self.core, query, vars, mutations, commit_now)
            .await
    }

    /// Commit the transaction
    pub async fn commit(&mut self) -> Result<()> {
        let coordinator = Coordinator::new(self.transport.as_ref(), &self.config);
        coordinator.commit(&mut self.core).await
    }

    /// Discard the transaction
    ///
    /// Never fails and may be called any number of times in any state.
    pub async fn discard(&mut self) {
        let coordinator = Coordinator::new(self.transport.as_ref(), &self.config);
        coordinator.discard(&mut self.core).await
    }

    /// Close out one unit of work
    ///
    /// A successful outcome commits the transaction if it is still Active
    /// and passes through if a commit-now mutation already committed it.
    /// The transaction is discarded afterwards in every case.
    ///
    /// # Errors
    /// The error from `outcome`, the commit error, or `ActiveStateRequired`
    /// if the work left the transaction Failed or Discarded.
    pub async fn finish<T>(&mut self, outcome: Result<T>) -> Result<T> {
        let result = match outcome {
            Ok(value) => match self.state() {
                TxnState::Active => self.commit().await.map(|()| value),
                TxnState::Committed => Ok(value),
                state => Err(Error::not_active(state)),
            },
            Err(err) => Err(err),
        };
        self.discard().await;
        result
    }

    /// Toggle best-effort reads
    ///
    /// Only allowed while nothing has been staged.
    pub fn set_best_effort(&mut self, best_effort: bool) -> Result<()> {
        self.core.set_best_effort(best_effort)
    }

    /// Current lifecycle state
    pub fn state(&self) -> TxnState {
        self.core.state()
    }

    /// Start timestamp, unassigned until the first response on a lazy start
    pub fn start_ts(&self) -> Timestamp {
        self.core.start_ts()
    }

    /// The current linearization token
    pub fn context(&self) -> TxnContext {
        self.core.context()
    }

    /// Whether best-effort reads are enabled
    pub fn is_best_effort(&self) -> bool {
        self.core.is_best_effort()
    }

    /// Whether the transaction is read-only
    pub fn is_read_only(&self) -> bool {
        self.core.is_read_only()
    }

    /// Touched conflict keys
    pub fn touched_keys(&self) -> &BTreeSet<String> {
        self.core.touched_keys()
    }

    /// Number of mutations sent so far
    pub fn pending_mutations(&self) -> usize {
        self.core.pending_mutations()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.core.state())
            .field("start_ts", &self.core.start_ts())
            .field("read_only", &self.core.is_read_only())
            .field("best_effort", &self.core.is_best_effort())
            .field("pending_mutations", &self.core.pending_mutations())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let pending = self.core.pending_mutations();
        if self.core.mark_discarded() && pending > 0 {
            warn!(
                target: "lattice::txn",
                start_ts = %self.core.start_ts(),
                pending,
                "Active transaction dropped with staged mutations; call discard() to release server state"
            );
        }
    }
}
