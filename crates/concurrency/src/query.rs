//! Query executor
//!
//! Issues reads at the transaction's snapshot. A failed read leaves the
//! transaction untouched and may simply be issued again; it is never retried
//! here.

use crate::context::TxnCore;
use lattice_core::fault;
use lattice_core::{Error, Response, Result, Transport};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Sends queries on behalf of one transaction
pub struct QueryExecutor<'a> {
    transport: &'a dyn Transport,
    deadline: Option<Duration>,
}

impl<'a> QueryExecutor<'a> {
    /// Executor over a transport, with an optional per-call deadline
    pub fn new(transport: &'a dyn Transport, deadline: Option<Duration>) -> Self {
        Self {
            transport,
            deadline,
        }
    }

    /// Run a query and merge the response context into the transaction
    ///
    /// The response is returned as the cluster sent it.
    ///
    /// # Errors
    /// - `ActiveStateRequired` if the transaction is terminal
    /// - `BestEffortWithMutations` if best-effort is set with mutations staged
    /// - `Transport`/`Unavailable`/`Cluster` from the cluster
    pub async fn query(
        &self,
        core: &mut TxnCore,
        query: &str,
        vars: HashMap<String, String>,
    ) -> Result<Response> {
        core.ensure_active()?;
        if core.is_best_effort() && !core.buffer().is_empty() {
            return Err(Error::BestEffortWithMutations);
        }

        let request = core.request(query, vars);
        debug!(
            target: "lattice::txn",
            start_ts = %request.start_ts,
            best_effort = request.best_effort,
            read_only = request.read_only,
            "Query"
        );

        let response = fault::call("query", self.deadline, self.transport.query(request)).await?;
        if let Some(context) = &response.txn {
            core.merge_context(context)?;
        }
        Ok(response)
    }
}
