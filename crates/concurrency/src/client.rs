//! Client: transaction factory over one transport
//!
//! A `Client` is cheap to clone. All clones share the transport, the
//! configuration and the lifecycle counters, and nothing else: transactions
//! created from it never share mutable state with each other.

use crate::context::TxnCore;
use crate::metrics::{ClientMetrics, TransactionMetrics};
use crate::oracle::TimestampOracle;
use crate::transaction::Transaction;
use lattice_core::{
    ClientConfig, Error, Result, RetryConfig, StartTimestampPolicy, Timestamp, Transport,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Boxed future returned by a retried transaction closure
pub type TxnFuture<'t, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 't>>;

/// Options for starting a transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnOptions {
    /// Reject mutations and commits
    pub read_only: bool,
    /// Read without waiting for in-flight commits
    pub best_effort: bool,
    /// Override the configured start timestamp policy
    pub start_timestamp: Option<StartTimestampPolicy>,
}

impl TxnOptions {
    /// Default options: read-write, configured start policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only transaction
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Set best-effort reads
    pub fn with_best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = best_effort;
        self
    }

    /// Set the start timestamp policy for this transaction only
    pub fn with_start_timestamp(mut self, policy: StartTimestampPolicy) -> Self {
        self.start_timestamp = Some(policy);
        self
    }
}

/// Entry point for creating transactions
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    config: Arc<ClientConfig>,
    metrics: Arc<ClientMetrics>,
}

impl Client {
    /// Create a client over a transport
    pub fn new<T: Transport + 'static>(transport: T, config: ClientConfig) -> Self {
        Self::from_arc(Arc::new(transport), config)
    }

    /// Create a client over a shared transport
    pub fn from_arc(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            transport,
            config: Arc::new(config),
            metrics: Arc::new(ClientMetrics::new()),
        }
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// New read-write transaction, start timestamp assigned lazily
    pub fn new_transaction(&self) -> Transaction {
        self.lazy(TxnOptions::new())
    }

    /// New read-only transaction, start timestamp assigned lazily
    pub fn new_read_only_transaction(&self) -> Transaction {
        self.lazy(TxnOptions::read_only())
    }

    /// Begin a read-write transaction under the configured start policy
    ///
    /// With the default eager policy the snapshot is fixed here, so a
    /// conflicting commit between `begin` and this transaction's first
    /// mutation is detected at commit.
    ///
    /// # Errors
    /// With the eager policy, any oracle failure (`Unavailable`, `Cluster`,
    /// `Transport`).
    pub async fn begin(&self, best_effort: bool) -> Result<Transaction> {
        self.begin_with(TxnOptions::new().with_best_effort(best_effort))
            .await
    }

    /// Begin a transaction with explicit options
    ///
    /// # Errors
    /// With the eager policy, any oracle failure.
    pub async fn begin_with(&self, options: TxnOptions) -> Result<Transaction> {
        let policy = options
            .start_timestamp
            .unwrap_or(self.config.start_timestamp);
        let start_ts = match policy {
            StartTimestampPolicy::Lazy => Timestamp::UNASSIGNED,
            StartTimestampPolicy::Eager => {
                TimestampOracle::new(self.transport.as_ref(), self.config.request_timeout())
                    .begin(options.best_effort, options.read_only)
                    .await?
            }
        };
        Ok(self.build(start_ts, options))
    }

    fn lazy(&self, options: TxnOptions) -> Transaction {
        self.build(Timestamp::UNASSIGNED, options)
    }

    fn build(&self, start_ts: Timestamp, options: TxnOptions) -> Transaction {
        debug!(
            target: "lattice::txn",
            start_ts = %start_ts,
            read_only = options.read_only,
            best_effort = options.best_effort,
            "Transaction started"
        );
        let core = TxnCore::new(
            start_ts,
            options.read_only,
            options.best_effort,
            Arc::clone(&self.metrics),
        );
        Transaction::new(core, Arc::clone(&self.transport), Arc::clone(&self.config))
    }

    /// Run logic in a transaction, retrying on conflict
    ///
    /// Every attempt gets a fresh transaction; `f` must not commit or
    /// discard it, except through a commit-now mutation. The transaction is
    /// committed after `f` succeeds. Only `Conflict` errors, from `f` or from
    /// the commit, trigger another attempt. A commit is never re-sent for
    /// the same transaction.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let uid = client
    ///     .run_with_retry(&RetryConfig::default(), |txn| {
    ///         Box::pin(async move {
    ///             let resp = txn.mutate(Mutation::set_nquads("_:a <name> \"A\" .")).await?;
    ///             Ok(resp.uids.get("a").cloned())
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn run_with_retry<T, F>(&self, retry: &RetryConfig, mut f: F) -> Result<T>
    where
        F: for<'t> FnMut(&'t mut Transaction) -> TxnFuture<'t, T>,
    {
        let mut attempt = 0;
        loop {
            let mut txn = self.begin(false).await?;
            let result = f(&mut txn).await;
            match txn.finish(result).await {
                Err(err) => match retry_delay(retry, attempt, &err) {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(err),
                },
                ok => return ok,
            }
        }
    }

    /// Snapshot of the lifecycle counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

/// Backoff before the next attempt of a retried transaction
///
/// Returns `None` when `err` is not retryable or `attempt` has used up
/// `retry.max_retries`. Shared by the async and blocking retry loops.
pub fn retry_delay(retry: &RetryConfig, attempt: usize, err: &Error) -> Option<Duration> {
    if !err.is_retryable() || attempt >= retry.max_retries {
        return None;
    }
    debug!(
        target: "lattice::txn",
        attempt,
        error = %err,
        "Retrying transaction after conflict"
    );
    Some(retry.calculate_delay(attempt))
}
