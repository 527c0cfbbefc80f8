//! In-process MVCC cluster
//!
//! `MemoryCluster` answers the full [`Transport`] surface from memory:
//! - a logical timestamp oracle (one `AtomicU64` for start and commit
//!   timestamps)
//! - a versioned store with snapshot reads
//! - per-transaction pending writes, visible only to their own transaction
//! - best-effort reads at the latest commit timestamp, never at a live
//!   writer's start timestamp
//! - first-committer-wins validation at commit
//! - blank-node uid assignment (`0x1`, `0x2`, ...)
//!
//! # Query form
//!
//! Queries are `<subject>` or `<subject> <predicate>`. A subject may be a
//! `$variable` resolved from the request variables. Results are JSON
//! objects: `{"uid": "0x1", "name": "Alice", "friend": {"uid": "0x2"}}`.
//!
//! Test hooks: a [`FaultInjector`], per-operation call counters and a log of
//! every query and mutate request.
//!
//! The state lock is never held across an await point.

use crate::fault::{before_call, FaultInjector, FaultType, Operation};
use crate::store::{VersionedStore, Write, WriteOp};
use crate::validation::validate_keys;
use async_trait::async_trait;
use lattice_core::{
    is_blank_node, BeginRequest, BeginResponse, CommitDecision, ObjectValue, Request, Response,
    RpcStatus, Timestamp, Transport, Triple, TxnContext,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const CLUSTER_HASH: &str = "memory-cluster";

/// A query or mutate request as the cluster received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// Query or Mutate
    pub operation: Operation,
    /// Start timestamp carried by the request
    pub start_ts: Timestamp,
    /// Best-effort flag carried by the request
    pub best_effort: bool,
    /// Read-only flag carried by the request
    pub read_only: bool,
    /// Commit-now flag carried by the request
    pub commit_now: bool,
    /// Number of mutations in the request
    pub mutations: usize,
}

#[derive(Debug, Default)]
struct PendingTxn {
    writes: Vec<Write>,
    keys: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct ClusterState {
    store: VersionedStore,
    pending: HashMap<u64, PendingTxn>,
    // latest commit timestamp
    watermark: u64,
    // timestamps handed out for best-effort reads; never writable
    shared_reads: BTreeSet<u64>,
    next_uid: u64,
}

impl ClusterState {
    fn allocate_uid(&mut self) -> String {
        self.next_uid += 1;
        format!("0x{:x}", self.next_uid)
    }

    /// Values of a cell as seen by the transaction at `start_ts`
    fn read(&self, subject: &str, predicate: &str, start_ts: u64) -> Vec<ObjectValue> {
        let mut values = self.store.read(subject, predicate, start_ts);
        if let Some(pending) = self.pending.get(&start_ts) {
            for write in pending
                .writes
                .iter()
                .filter(|w| w.triple.subject == subject && w.triple.predicate == predicate)
            {
                write.apply_to(&mut values);
            }
        }
        values
    }

    fn predicates_of(&self, subject: &str, start_ts: u64) -> BTreeSet<String> {
        let mut predicates: BTreeSet<String> =
            self.store.predicates_of(subject, start_ts).into_iter().collect();
        if let Some(pending) = self.pending.get(&start_ts) {
            predicates.extend(
                pending
                    .writes
                    .iter()
                    .filter(|w| w.triple.subject == subject)
                    .map(|w| w.triple.predicate.clone()),
            );
        }
        predicates.retain(|p| !self.read(subject, p, start_ts).is_empty());
        predicates
    }
}

/// In-memory cluster implementing [`Transport`]
#[derive(Debug, Default)]
pub struct MemoryCluster {
    oracle: AtomicU64,
    state: Mutex<ClusterState>,
    faults: FaultInjector,
    calls: [AtomicU64; 5],
    log: Mutex<Vec<RequestRecord>>,
}

impl MemoryCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// The fault injector consulted on every call
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Number of calls received for one operation, faulted calls included
    pub fn calls(&self, operation: Operation) -> u64 {
        self.calls[operation.index()].load(Ordering::Relaxed)
    }

    /// Number of calls received across all operations
    pub fn total_calls(&self) -> u64 {
        Operation::ALL.iter().map(|op| self.calls(*op)).sum()
    }

    /// Every query and mutate request received, oldest first
    pub fn requests(&self) -> Vec<RequestRecord> {
        self.log.lock().clone()
    }

    /// Latest timestamp issued by the oracle
    pub fn current_ts(&self) -> Timestamp {
        Timestamp::new(self.oracle.load(Ordering::SeqCst))
    }

    /// Number of transactions holding pending writes
    pub fn pending_transactions(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Latest committed values of a cell
    pub fn committed_values(&self, subject: &str, predicate: &str) -> Vec<ObjectValue> {
        self.state.lock().store.read(subject, predicate, u64::MAX)
    }

    fn next_ts(&self) -> u64 {
        self.oracle.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record_call(&self, operation: Operation) {
        self.calls[operation.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn log_request(&self, operation: Operation, request: &Request) {
        self.log.lock().push(RequestRecord {
            operation,
            start_ts: request.start_ts,
            best_effort: request.best_effort,
            read_only: request.read_only,
            commit_now: request.commit_now,
            mutations: request.mutations.len(),
        });
    }

    /// Start timestamp for a request that arrives without one
    ///
    /// Best-effort reads get the latest commit timestamp instead of a new
    /// one. Commit timestamps are never used as a start timestamp, so a
    /// best-effort reader cannot land on a live writer's pending state.
    fn start_ts_for(&self, requested: Timestamp, best_effort: bool) -> u64 {
        if requested.is_assigned() {
            return requested.as_u64();
        }
        if !best_effort {
            return self.next_ts();
        }
        let mut state = self.state.lock();
        let ts = if state.watermark > 0 {
            state.watermark
        } else {
            self.next_ts()
        };
        state.shared_reads.insert(ts);
        ts
    }

    fn context(&self, start_ts: u64) -> TxnContext {
        TxnContext {
            start_ts: Timestamp::new(start_ts),
            hash: CLUSTER_HASH.to_string(),
            ..Default::default()
        }
    }

    /// Validate and apply a transaction under the state lock
    fn commit_locked(
        &self,
        state: &mut ClusterState,
        start_ts: u64,
        extra_keys: &[String],
    ) -> CommitDecision {
        let pending = state.pending.remove(&start_ts).unwrap_or_default();
        let mut keys = pending.keys;
        keys.extend(extra_keys.iter().cloned());

        let validation = validate_keys(&state.store, start_ts, &keys);
        if !validation.is_valid() {
            debug!(start_ts, conflicts = validation.conflict_count(), "Commit rejected");
            return CommitDecision::Conflict {
                reason: validation.reason(),
            };
        }

        // allocated under the lock so readers never see a gap
        let commit_ts = self.next_ts();
        state.store.apply(commit_ts, &pending.writes, &keys);
        state.watermark = commit_ts;
        debug!(start_ts, commit_ts, keys = keys.len(), "Commit applied");
        CommitDecision::Committed {
            commit_ts: Timestamp::new(commit_ts),
        }
    }

    fn run_query(
        &self,
        state: &ClusterState,
        query: &str,
        vars: &HashMap<String, String>,
        start_ts: u64,
    ) -> Result<Vec<u8>, RpcStatus> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(b"{}".to_vec());
        }
        let terms: Vec<&str> = query.split_whitespace().collect();
        let (subject, predicate) = match terms.as_slice() {
            [subject] => (resolve_term(subject, vars)?, None),
            [subject, predicate] => (
                resolve_term(subject, vars)?,
                Some(resolve_term(predicate, vars)?),
            ),
            _ => {
                return Err(RpcStatus::invalid_argument(format!(
                    "unsupported query '{}': expected '<subject>' or '<subject> <predicate>'",
                    query
                )))
            }
        };

        let mut object = Map::new();
        object.insert("uid".to_string(), Value::String(subject.clone()));
        let predicates = match predicate {
            Some(p) => vec![p],
            None => state.predicates_of(&subject, start_ts).into_iter().collect(),
        };
        for predicate in predicates {
            let values = state.read(&subject, &predicate, start_ts);
            if let Some(rendered) = render_values(&values) {
                object.insert(predicate, rendered);
            }
        }
        serde_json::to_vec(&Value::Object(object))
            .map_err(|e| RpcStatus::internal(format!("failed to encode result: {}", e)))
    }

    /// Resolve blank nodes and stage a request's writes
    ///
    /// Returns the request's keys, predicates and blank-node uids.
    fn stage_mutations(
        &self,
        state: &mut ClusterState,
        start_ts: u64,
        request: &Request,
    ) -> Result<(BTreeSet<String>, BTreeSet<String>, HashMap<String, String>), RpcStatus> {
        let mut writes = Vec::new();
        for mutation in &request.mutations {
            if mutation.cond.is_some() {
                return Err(RpcStatus::invalid_argument(
                    "conditional mutations are not supported",
                ));
            }
            let invalid = |e: lattice_core::Error| RpcStatus::invalid_argument(e.to_string());
            for triple in mutation.set_triples().map_err(invalid)? {
                writes.push((WriteOp::Set, triple));
            }
            for triple in mutation.delete_triples().map_err(invalid)? {
                writes.push((WriteOp::Delete, triple));
            }
        }

        let mut uids: HashMap<String, String> = HashMap::new();
        let mut resolve = |state: &mut ClusterState, node: &str| -> String {
            if !is_blank_node(node) {
                return node.to_string();
            }
            let name = node.trim_start_matches("_:").to_string();
            uids.entry(name).or_insert_with(|| state.allocate_uid()).clone()
        };

        let mut resolved = Vec::with_capacity(writes.len());
        for (op, triple) in writes {
            let subject = resolve(state, &triple.subject);
            let object = match triple.object {
                ObjectValue::Node(node) => ObjectValue::Node(resolve(state, &node)),
                other => other,
            };
            resolved.push(Write {
                op,
                triple: Triple {
                    subject,
                    predicate: triple.predicate,
                    object,
                },
            });
        }

        let keys: BTreeSet<String> = resolved.iter().map(Write::key).collect();
        let preds: BTreeSet<String> = resolved
            .iter()
            .map(|w| w.triple.predicate.clone())
            .collect();

        let pending = state.pending.entry(start_ts).or_default();
        pending.keys.extend(keys.iter().cloned());
        pending.writes.extend(resolved);
        Ok((keys, preds, uids))
    }
}

fn resolve_term(term: &str, vars: &HashMap<String, String>) -> Result<String, RpcStatus> {
    if term.starts_with('$') {
        return vars
            .get(term)
            .or_else(|| vars.get(&term[1..]))
            .cloned()
            .ok_or_else(|| RpcStatus::invalid_argument(format!("variable {} is not defined", term)));
    }
    let inner = term
        .strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .unwrap_or(term);
    if inner.is_empty() {
        return Err(RpcStatus::invalid_argument("empty query term"));
    }
    Ok(inner.to_string())
}

fn render_value(value: &ObjectValue) -> Value {
    match value {
        ObjectValue::Literal(s) => Value::String(s.clone()),
        ObjectValue::Node(uid) => json!({ "uid": uid }),
        ObjectValue::Star => Value::Null,
    }
}

fn render_values(values: &[ObjectValue]) -> Option<Value> {
    match values {
        [] => None,
        [single] => Some(render_value(single)),
        many => Some(Value::Array(many.iter().map(render_value).collect())),
    }
}

#[async_trait]
impl Transport for MemoryCluster {
    async fn begin(&self, request: BeginRequest) -> Result<BeginResponse, RpcStatus> {
        self.record_call(Operation::Begin);
        let lost = before_call(&self.faults, Operation::Begin).await?;
        let start_ts = self.start_ts_for(Timestamp::UNASSIGNED, request.best_effort);
        reply(lost, Operation::Begin)?;
        Ok(BeginResponse {
            start_ts: Timestamp::new(start_ts),
        })
    }

    async fn query(&self, request: Request) -> Result<Response, RpcStatus> {
        self.record_call(Operation::Query);
        self.log_request(Operation::Query, &request);
        let lost = before_call(&self.faults, Operation::Query).await?;

        let start_ts = self.start_ts_for(request.start_ts, request.best_effort);
        let json = {
            let state = self.state.lock();
            self.run_query(&state, &request.query, &request.vars, start_ts)?
        };
        reply(lost, Operation::Query)?;
        Ok(Response {
            json,
            txn: Some(self.context(start_ts)),
            uids: HashMap::new(),
        })
    }

    async fn mutate(&self, request: Request) -> Result<Response, RpcStatus> {
        self.record_call(Operation::Mutate);
        self.log_request(Operation::Mutate, &request);
        let lost = before_call(&self.faults, Operation::Mutate).await?;

        if request.read_only {
            return Err(RpcStatus::invalid_argument(
                "mutation sent on a read-only transaction",
            ));
        }
        if request.mutations.is_empty() {
            return Err(RpcStatus::invalid_argument("request carries no mutations"));
        }

        let start_ts = self.start_ts_for(request.start_ts, false);
        let response = {
            let mut state = self.state.lock();
            if state.shared_reads.contains(&start_ts) {
                return Err(RpcStatus::new(
                    lattice_core::StatusCode::FailedPrecondition,
                    format!(
                        "start timestamp {} was issued for best-effort reads and cannot write",
                        start_ts
                    ),
                ));
            }
            let json = self.run_query(&state, &request.query, &request.vars, start_ts)?;
            let (keys, preds, uids) = self.stage_mutations(&mut state, start_ts, &request)?;

            let mut context = self.context(start_ts);
            context.keys = keys.into_iter().collect();
            context.preds = preds.into_iter().collect();
            if request.commit_now {
                match self.commit_locked(&mut state, start_ts, &[]) {
                    CommitDecision::Committed { commit_ts } => context.commit_ts = commit_ts,
                    CommitDecision::Conflict { reason } => {
                        return Err(RpcStatus::aborted(reason));
                    }
                }
            }
            Response {
                json,
                txn: Some(context),
                uids,
            }
        };
        reply(lost, Operation::Mutate)?;
        Ok(response)
    }

    async fn commit(&self, context: TxnContext) -> Result<CommitDecision, RpcStatus> {
        self.record_call(Operation::Commit);
        let lost = before_call(&self.faults, Operation::Commit).await?;

        if !context.start_ts.is_assigned() {
            return Err(RpcStatus::invalid_argument(
                "commit requires an assigned start timestamp",
            ));
        }
        if context.aborted {
            return Err(RpcStatus::invalid_argument(
                "commit received an aborted context; use discard",
            ));
        }
        let decision = {
            let mut state = self.state.lock();
            self.commit_locked(&mut state, context.start_ts.as_u64(), &context.keys)
        };
        reply(lost, Operation::Commit)?;
        Ok(decision)
    }

    async fn discard(&self, context: TxnContext) -> Result<(), RpcStatus> {
        self.record_call(Operation::Discard);
        let lost = before_call(&self.faults, Operation::Discard).await?;

        if !context.aborted {
            return Err(RpcStatus::new(
                lattice_core::StatusCode::FailedPrecondition,
                "discard requires an aborted context",
            ));
        }
        let removed = self
            .state
            .lock()
            .pending
            .remove(&context.start_ts.as_u64())
            .is_some();
        debug!(start_ts = %context.start_ts, removed, "Transaction discarded");
        reply(lost, Operation::Discard)
    }
}

/// Report a reply lost after processing
fn reply(lost: Option<FaultType>, operation: Operation) -> Result<(), RpcStatus> {
    match lost {
        Some(FaultType::ReplyLost) => Err(RpcStatus::deadline_exceeded(format!(
            "reply to {} was lost",
            operation
        ))),
        _ => Ok(()),
    }
}
