//! Commit/discard coordinator
//!
//! Drives the transaction state machine across mutate, commit and discard:
//!
//! ```text
//! Active ──commit / commit-now ok──────────▶ Committed
//!   │ ───conflict / in-doubt / mismatch───▶ Failed
//!   └────discard──────────────────────────▶ Discarded
//! ```
//!
//! # In-doubt calls
//!
//! A commit (or a commit-now mutation) whose reply never arrives has an
//! unknown outcome. Every such call arms an [`InDoubt`] guard before the
//! round trip. If the call errors or its future is dropped mid-flight, the
//! guard leaves the transaction `Failed`. Orphaned server-side state is left
//! to the cluster's garbage collection.

use crate::context::TxnCore;
use lattice_core::fault;
use lattice_core::{
    AssignedKeys, ClientConfig, CommitDecision, Error, Mutation, Response, Result, Transport,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Marks the transaction failed unless disarmed
///
/// Lives across the await point of a committing round trip, so dropping
/// the surrounding future resolves the transaction as failed.
struct InDoubt<'c> {
    core: &'c mut TxnCore,
    operation: &'static str,
    armed: bool,
}

impl<'c> InDoubt<'c> {
    fn arm(core: &'c mut TxnCore, operation: &'static str) -> Self {
        Self {
            core,
            operation,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InDoubt<'_> {
    fn drop(&mut self) {
        if self.armed {
            let reason = format!("{} cancelled before the outcome was known", self.operation);
            self.core.mark_failed(&reason);
        }
    }
}

/// Runs the mutating and terminating operations of one transaction
pub struct Coordinator<'a> {
    transport: &'a dyn Transport,
    config: &'a ClientConfig,
}

impl<'a> Coordinator<'a> {
    /// Coordinator over a transport and the client's deadlines
    pub fn new(transport: &'a dyn Transport, config: &'a ClientConfig) -> Self {
        Self { transport, config }
    }

    /// Send one mutation
    ///
    /// See [`do_request`](Self::do_request) for the state rules.
    pub async fn mutate(&self, core: &mut TxnCore, mutation: Mutation) -> Result<AssignedKeys> {
        let commit_now = mutation.commit_now;
        let response = self
            .do_request(core, "", HashMap::new(), vec![mutation], commit_now)
            .await?;
        Ok(AssignedKeys::from(response))
    }

    /// Send a query together with mutations in one round trip (upsert)
    ///
    /// The request commits in the same round trip when `commit_now` is set
    /// or any mutation asks for it.
    ///
    /// State after the call:
    /// - success: `Active`, or `Committed` for a commit-now request
    /// - `Conflict`: `Failed`
    /// - transport fault: `Active`, or `Failed` for a commit-now request
    ///
    /// # Errors
    /// - `ActiveStateRequired`, `ReadOnly`, `BestEffortWithMutations` before
    ///   anything is sent
    /// - `InvalidRequest` for an empty mutation list or an empty mutation
    /// - any translated transport fault
    pub async fn do_request(
        &self,
        core: &mut TxnCore,
        query: &str,
        vars: HashMap<String, String>,
        mutations: Vec<Mutation>,
        commit_now: bool,
    ) -> Result<Response> {
        core.ensure_writable("mutate")?;
        if mutations.is_empty() {
            return Err(Error::invalid_request("request carries no mutations"));
        }
        if mutations.iter().any(Mutation::is_empty) {
            return Err(Error::invalid_request(
                "mutation has neither a set nor a delete payload",
            ));
        }

        let commit_now = commit_now || mutations.iter().any(|m| m.commit_now);
        let mut request = core.request(query, vars);
        request.commit_now = commit_now;
        for mutation in &mutations {
            core.stage(mutation.clone());
        }
        request.mutations = mutations;

        debug!(
            target: "lattice::txn",
            start_ts = %request.start_ts,
            mutations = request.mutations.len(),
            commit_now,
            "Mutate"
        );

        let deadline = if commit_now {
            self.config.commit_timeout()
        } else {
            self.config.request_timeout()
        };

        if !commit_now {
            return match fault::call("mutate", deadline, self.transport.mutate(request)).await {
                Ok(response) => {
                    if let Some(context) = &response.txn {
                        core.merge_context(context)?;
                    }
                    Ok(response)
                }
                Err(err) => {
                    if err.is_conflict() {
                        core.mark_failed("mutation aborted by the cluster");
                    }
                    Err(err)
                }
            };
        }

        let mut guard = InDoubt::arm(core, "commit-now mutation");
        let outcome = fault::call("mutate", deadline, self.transport.mutate(request)).await;
        guard.disarm();
        let core = &mut *guard.core;

        match outcome {
            Ok(response) => {
                match &response.txn {
                    Some(context) => {
                        core.merge_context(context)?;
                        core.mark_committed(context.commit_ts);
                    }
                    None => core.mark_committed(lattice_core::Timestamp::UNASSIGNED),
                }
                info!(
                    target: "lattice::txn",
                    start_ts = %core.start_ts(),
                    commit_ts = %core.commit_ts(),
                    "Transaction committed with mutation"
                );
                Ok(response)
            }
            Err(err) => {
                core.mark_failed(&err.to_string());
                Err(err)
            }
        }
    }

    /// Commit the transaction
    ///
    /// With nothing staged the commit is local: an empty key set cannot
    /// conflict. Otherwise the conflict checker decides.
    ///
    /// # Errors
    /// - `ActiveStateRequired` if not active (never silently ignored)
    /// - `ReadOnly` on a read-only transaction
    /// - `Conflict` if the checker rejects the commit; the transaction is
    ///   `Failed` and is never retried here
    /// - any translated transport fault; the transaction is `Failed`
    pub async fn commit(&self, core: &mut TxnCore) -> Result<()> {
        core.ensure_active()?;
        if core.is_read_only() {
            return Err(Error::ReadOnly {
                operation: "commit",
            });
        }

        if core.buffer().is_empty() {
            core.mark_committed(lattice_core::Timestamp::UNASSIGNED);
            debug!(
                target: "lattice::txn",
                start_ts = %core.start_ts(),
                "Transaction committed locally, nothing staged"
            );
            return Ok(());
        }

        let context = core.context();
        let keys = context.keys.len();
        let mut guard = InDoubt::arm(core, "commit");
        let outcome = fault::call(
            "commit",
            self.config.commit_timeout(),
            self.transport.commit(context),
        )
        .await;
        guard.disarm();
        let core = &mut *guard.core;

        match outcome {
            Ok(CommitDecision::Committed { commit_ts }) => {
                core.mark_committed(commit_ts);
                info!(
                    target: "lattice::txn",
                    start_ts = %core.start_ts(),
                    commit_ts = %commit_ts,
                    keys,
                    "Transaction committed"
                );
                Ok(())
            }
            Ok(CommitDecision::Conflict { reason }) => {
                core.mark_failed(&reason);
                Err(Error::conflict(reason))
            }
            Err(err) => {
                core.mark_failed(&err.to_string());
                Err(err)
            }
        }
    }

    /// Discard the transaction
    ///
    /// Never fails. Terminal transactions are left alone. The state becomes
    /// `Discarded` before the cluster is notified, so a cancelled discard is
    /// still effective; notification failures are logged and swallowed.
    pub async fn discard(&self, core: &mut TxnCore) {
        let had_mutations = !core.buffer().is_empty();
        if !core.mark_discarded() {
            return;
        }
        if !had_mutations {
            debug!(
                target: "lattice::txn",
                start_ts = %core.start_ts(),
                "Transaction discarded locally"
            );
            return;
        }

        let mut context = core.context();
        context.aborted = true;
        let result = fault::call(
            "discard",
            Some(self.config.discard_timeout()),
            self.transport.discard(context),
        )
        .await;
        match result {
            Ok(()) => debug!(
                target: "lattice::txn",
                start_ts = %core.start_ts(),
                "Transaction discarded"
            ),
            Err(err) => warn!(
                target: "lattice::txn",
                start_ts = %core.start_ts(),
                error = %err,
                "Discard notification failed; server state left to garbage collection"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ClientMetrics;
    use async_trait::async_trait;
    use lattice_core::{
        BeginRequest, BeginResponse, Request, RpcStatus, Timestamp, TxnContext, TxnState,
    };
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    /// Transport with scripted commit and discard outcomes
    #[derive(Default)]
    struct Scripted {
        commit: Mutex<Option<std::result::Result<CommitDecision, RpcStatus>>>,
        discard_fails: bool,
        commit_delay: Option<Duration>,
        discards: Mutex<Vec<TxnContext>>,
        commits: Mutex<Vec<TxnContext>>,
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn begin(&self, _: BeginRequest) -> std::result::Result<BeginResponse, RpcStatus> {
            Ok(BeginResponse {
                start_ts: Timestamp::new(1),
            })
        }
        async fn query(&self, _: Request) -> std::result::Result<Response, RpcStatus> {
            Ok(Response::default())
        }
        async fn mutate(&self, request: Request) -> std::result::Result<Response, RpcStatus> {
            let mut context = TxnContext::with_start_ts(Timestamp::new(10));
            if request.commit_now {
                context.commit_ts = Timestamp::new(11);
            }
            Ok(Response {
                txn: Some(context),
                ..Default::default()
            })
        }
        async fn commit(&self, context: TxnContext) -> std::result::Result<CommitDecision, RpcStatus> {
            if let Some(delay) = self.commit_delay {
                tokio::time::sleep(delay).await;
            }
            self.commits.lock().push(context);
            self.commit
                .lock()
                .take()
                .unwrap_or(Ok(CommitDecision::Committed {
                    commit_ts: Timestamp::new(20),
                }))
        }
        async fn discard(&self, context: TxnContext) -> std::result::Result<(), RpcStatus> {
            self.discards.lock().push(context);
            if self.discard_fails {
                Err(RpcStatus::unavailable("gone"))
            } else {
                Ok(())
            }
        }
    }

    fn core() -> TxnCore {
        TxnCore::new(Timestamp::new(10), false, false, Arc::new(ClientMetrics::new()))
    }

    fn name_mutation() -> Mutation {
        Mutation::set_nquads("<0x1> <name> \"Alice\" .")
    }

    #[tokio::test]
    async fn test_commit_nothing_staged_is_local() {
        let transport = Scripted::default();
        let config = ClientConfig::default();
        let mut core = core();
        Coordinator::new(&transport, &config)
            .commit(&mut core)
            .await
            .unwrap();
        assert_eq!(core.state(), TxnState::Committed);
        assert!(transport.commits.lock().is_empty());
    }

    #[tokio::test]
    async fn test_commit_sends_touched_keys() {
        let transport = Scripted::default();
        let config = ClientConfig::default();
        let coordinator = Coordinator::new(&transport, &config);
        let mut core = core();
        coordinator.mutate(&mut core, name_mutation()).await.unwrap();
        coordinator.commit(&mut core).await.unwrap();

        assert_eq!(core.state(), TxnState::Committed);
        assert_eq!(core.commit_ts(), Timestamp::new(20));
        assert_eq!(core.buffer().unflushed(), 0);
        let commits = transport.commits.lock();
        assert_eq!(commits[0].keys, vec!["0x1|name"]);
        assert_eq!(commits[0].start_ts, Timestamp::new(10));
    }

    #[tokio::test]
    async fn test_conflict_decision_fails_transaction() {
        let transport = Scripted {
            commit: Mutex::new(Some(Ok(CommitDecision::Conflict {
                reason: "0x1|name written at 15".into(),
            }))),
            ..Default::default()
        };
        let config = ClientConfig::default();
        let coordinator = Coordinator::new(&transport, &config);
        let mut core = core();
        coordinator.mutate(&mut core, name_mutation()).await.unwrap();

        let err = coordinator.commit(&mut core).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(core.state(), TxnState::Failed);

        let err = coordinator.commit(&mut core).await.unwrap_err();
        assert!(matches!(err, Error::ActiveStateRequired { .. }));
    }

    #[tokio::test]
    async fn test_aborted_status_on_commit_is_conflict() {
        let transport = Scripted {
            commit: Mutex::new(Some(Err(RpcStatus::aborted("txn aborted")))),
            ..Default::default()
        };
        let config = ClientConfig::default();
        let coordinator = Coordinator::new(&transport, &config);
        let mut core = core();
        coordinator.mutate(&mut core, name_mutation()).await.unwrap();
        assert!(coordinator.commit(&mut core).await.unwrap_err().is_conflict());
        assert_eq!(core.state(), TxnState::Failed);
    }

    #[tokio::test]
    async fn test_commit_deadline_leaves_failed() {
        let transport = Scripted {
            commit_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let config = ClientConfig::default().with_commit_timeout_ms(20);
        let coordinator = Coordinator::new(&transport, &config);
        let mut core = core();
        coordinator.mutate(&mut core, name_mutation()).await.unwrap();

        let err = coordinator.commit(&mut core).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(core.state(), TxnState::Failed);
    }

    #[tokio::test]
    async fn test_dropped_commit_leaves_failed() {
        let transport = Scripted {
            commit_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let config = ClientConfig::default();
        let coordinator = Coordinator::new(&transport, &config);
        let mut core = core();
        coordinator.mutate(&mut core, name_mutation()).await.unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), coordinator.commit(&mut core)).await;
        assert!(cancelled.is_err());
        assert_eq!(core.state(), TxnState::Failed);
    }

    #[tokio::test]
    async fn test_commit_now_mutation_commits() {
        let transport = Scripted::default();
        let config = ClientConfig::default();
        let coordinator = Coordinator::new(&transport, &config);
        let mut core = core();
        coordinator
            .mutate(&mut core, name_mutation().with_commit_now(true))
            .await
            .unwrap();
        assert_eq!(core.state(), TxnState::Committed);
        assert_eq!(core.commit_ts(), Timestamp::new(11));
        assert!(transport.commits.lock().is_empty());

        // discard after auto-commit is a no-op
        coordinator.discard(&mut core).await;
        assert_eq!(core.state(), TxnState::Committed);
        assert!(transport.discards.lock().is_empty());
    }

    #[tokio::test]
    async fn test_empty_mutation_list_rejected() {
        let transport = Scripted::default();
        let config = ClientConfig::default();
        let mut core = core();
        let err = Coordinator::new(&transport, &config)
            .do_request(&mut core, "", HashMap::new(), Vec::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
        assert!(core.is_active());
        assert!(core.buffer().is_empty());
    }

    #[tokio::test]
    async fn test_discard_sends_aborted_context() {
        let transport = Scripted::default();
        let config = ClientConfig::default();
        let coordinator = Coordinator::new(&transport, &config);
        let mut core = core();
        coordinator.mutate(&mut core, name_mutation()).await.unwrap();
        coordinator.discard(&mut core).await;
        coordinator.discard(&mut core).await;

        assert_eq!(core.state(), TxnState::Discarded);
        let discards = transport.discards.lock();
        assert_eq!(discards.len(), 1);
        assert!(discards[0].aborted);
        assert_eq!(discards[0].keys, vec!["0x1|name"]);
    }

    #[tokio::test]
    async fn test_discard_failure_is_swallowed() {
        let transport = Scripted {
            discard_fails: true,
            ..Default::default()
        };
        let config = ClientConfig::default();
        let coordinator = Coordinator::new(&transport, &config);
        let mut core = core();
        coordinator.mutate(&mut core, name_mutation()).await.unwrap();
        coordinator.discard(&mut core).await;
        assert_eq!(core.state(), TxnState::Discarded);
    }

    #[tokio::test]
    async fn test_discard_without_mutations_is_local() {
        let transport = Scripted::default();
        let config = ClientConfig::default();
        let mut core = core();
        Coordinator::new(&transport, &config)
            .discard(&mut core)
            .await;
        assert_eq!(core.state(), TxnState::Discarded);
        assert!(transport.discards.lock().is_empty());
    }
}
