//! Blocking facade over the async client
//!
//! Each blocking [`Client`] owns a private current-thread tokio runtime and
//! blocks on it for every call. Do not use these types from inside an async
//! context: blocking on a runtime from within another runtime panics.

use lattice_concurrency as engine;
use lattice_core::{
    AssignedKeys, ClientConfig, Error, Mutation, Response, Result, RetryConfig, Timestamp,
    Transport, TxnContext, TxnState,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

/// Blocking transaction factory
#[derive(Clone)]
pub struct Client {
    inner: engine::Client,
    runtime: Arc<Runtime>,
}

impl Client {
    /// Create a blocking client over a transport
    ///
    /// # Errors
    /// Returns `Error::Config` if the runtime cannot be started.
    pub fn new<T: Transport + 'static>(transport: T, config: ClientConfig) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::config(format!("failed to start client runtime: {}", e)))?;
        Ok(Self {
            inner: engine::Client::new(transport, config),
            runtime: Arc::new(runtime),
        })
    }

    /// The async client this facade delegates to
    pub fn inner(&self) -> &engine::Client {
        &self.inner
    }

    /// New read-write transaction, start timestamp assigned lazily
    pub fn new_transaction(&self) -> Transaction {
        self.wrap(self.inner.new_transaction())
    }

    /// New read-only transaction, start timestamp assigned lazily
    pub fn new_read_only_transaction(&self) -> Transaction {
        self.wrap(self.inner.new_read_only_transaction())
    }

    /// Begin a transaction under the configured start policy
    pub fn begin(&self, best_effort: bool) -> Result<Transaction> {
        let txn = self.runtime.block_on(self.inner.begin(best_effort))?;
        Ok(self.wrap(txn))
    }

    /// Begin a transaction with explicit options
    pub fn begin_with(&self, options: engine::TxnOptions) -> Result<Transaction> {
        let txn = self.runtime.block_on(self.inner.begin_with(options))?;
        Ok(self.wrap(txn))
    }

    /// Run logic in a transaction, retrying on conflict
    ///
    /// Mirrors [`engine::Client::run_with_retry`] with a synchronous closure.
    /// Each attempt is closed out by [`engine::Transaction::finish`] and the
    /// backoff comes from [`engine::retry_delay`], as in the async loop.
    pub fn run_with_retry<T, F>(&self, retry: &RetryConfig, mut f: F) -> Result<T>
    where
        F: FnMut(&mut Transaction) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            let mut txn = self.begin(false)?;
            let result = f(&mut txn);
            match self.runtime.block_on(txn.inner.finish(result)) {
                Err(err) => match engine::retry_delay(retry, attempt, &err) {
                    Some(delay) => {
                        std::thread::sleep(delay);
                        attempt += 1;
                    }
                    None => return Err(err),
                },
                ok => return ok,
            }
        }
    }

    /// Snapshot of the lifecycle counters
    pub fn metrics(&self) -> engine::TransactionMetrics {
        self.inner.metrics()
    }

    fn wrap(&self, inner: engine::Transaction) -> Transaction {
        Transaction {
            inner,
            runtime: Arc::clone(&self.runtime),
        }
    }
}

/// Blocking transaction handle
///
/// Dropping the handle discards the transaction.
pub struct Transaction {
    inner: engine::Transaction,
    runtime: Arc<Runtime>,
}

impl Transaction {
    /// Run a query at the transaction's snapshot
    pub fn query(&mut self, query: &str) -> Result<Response> {
        self.runtime.block_on(self.inner.query(query))
    }

    /// Run a query with variables
    pub fn query_with_vars(&mut self, query: &str, vars: HashMap<String, String>) -> Result<Response> {
        self.runtime.block_on(self.inner.query_with_vars(query, vars))
    }

    /// Send a mutation
    pub fn mutate(&mut self, mutation: Mutation) -> Result<AssignedKeys> {
        self.runtime.block_on(self.inner.mutate(mutation))
    }

    /// Send a query and mutations in one round trip
    pub fn do_request(
        &mut self,
        query: &str,
        vars: HashMap<String, String>,
        mutations: Vec<Mutation>,
        commit_now: bool,
    ) -> Result<Response> {
        self.runtime
            .block_on(self.inner.do_request(query, vars, mutations, commit_now))
    }

    /// Commit the transaction
    pub fn commit(&mut self) -> Result<()> {
        self.runtime.block_on(self.inner.commit())
    }

    /// Discard the transaction; never fails
    pub fn discard(&mut self) {
        self.runtime.block_on(self.inner.discard())
    }

    /// Toggle best-effort reads
    pub fn set_best_effort(&mut self, best_effort: bool) -> Result<()> {
        self.inner.set_best_effort(best_effort)
    }

    /// Current lifecycle state
    pub fn state(&self) -> TxnState {
        self.inner.state()
    }

    /// Start timestamp
    pub fn start_ts(&self) -> Timestamp {
        self.inner.start_ts()
    }

    /// The current linearization token
    pub fn context(&self) -> TxnContext {
        self.inner.context()
    }

    /// Whether best-effort reads are enabled
    pub fn is_best_effort(&self) -> bool {
        self.inner.is_best_effort()
    }

    /// Whether the transaction is read-only
    pub fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    /// Number of mutations sent so far
    pub fn pending_mutations(&self) -> usize {
        self.inner.pending_mutations()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.inner.state() == TxnState::Active {
            self.runtime.block_on(self.inner.discard());
        }
    }
}
