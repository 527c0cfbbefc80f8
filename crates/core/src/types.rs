//! Core types exchanged between the client and the cluster
//!
//! This module defines:
//! - Timestamp: logical clock value issued by the cluster's oracle
//! - TxnState: lifecycle state of a client transaction
//! - TxnContext: linearization token threaded through every call
//! - Request/Response: query and mutation round trips
//! - BeginRequest/BeginResponse, CommitDecision: oracle and conflict checker
//! - AssignedKeys: result of a mutation

use crate::mutation::Mutation;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Logical timestamp issued by the cluster
///
/// Timestamps are monotonically increasing per cluster. The zero value means
/// "not yet assigned": a transaction created lazily carries it until the
/// first response fixes its start timestamp.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The unassigned timestamp
    pub const UNASSIGNED: Timestamp = Timestamp(0);

    /// Wrap a raw timestamp value
    #[inline]
    pub const fn new(value: u64) -> Self {
        Timestamp(value)
    }

    /// Raw value
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether the cluster has assigned this timestamp
    #[inline]
    pub const fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Timestamp(value)
    }
}

/// Lifecycle state of a transaction
///
/// State transitions:
/// - `Active` → `Committed` (explicit commit or commit-now mutation)
/// - `Active` → `Failed` (conflict, ambiguous commit, context mismatch)
/// - `Active` → `Discarded` (discard)
///
/// Terminal states (no transitions allowed):
/// - `Committed`
/// - `Discarded`
/// - `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnState {
    /// Transaction accepts reads and writes
    Active,
    /// Transaction committed successfully
    Committed,
    /// Transaction was discarded by the caller
    Discarded,
    /// Transaction ended without committing (conflict or fault)
    Failed,
}

impl TxnState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxnState::Active)
    }

    /// Canonical lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnState::Active => "active",
            TxnState::Committed => "committed",
            TxnState::Discarded => "discarded",
            TxnState::Failed => "failed",
        }
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Linearization token for a transaction
///
/// Returned by the cluster with every query and mutation response, and sent
/// back with the next call so the server can order operations within the
/// transaction. At commit time `keys` is the set the conflict checker
/// validates against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnContext {
    /// Snapshot timestamp
    pub start_ts: Timestamp,
    /// Commit timestamp, assigned once the transaction commits
    pub commit_ts: Timestamp,
    /// Set when the client asks the server to abort
    pub aborted: bool,
    /// Conflict keys touched by the transaction
    pub keys: Vec<String>,
    /// Predicates touched by the transaction
    pub preds: Vec<String>,
    /// Opaque server hash for request routing
    pub hash: String,
}

impl TxnContext {
    /// Empty context for a transaction whose start timestamp is known
    pub fn with_start_ts(start_ts: Timestamp) -> Self {
        TxnContext {
            start_ts,
            ..Default::default()
        }
    }

    /// Build a context from accumulated key and predicate sets
    pub fn from_sets(
        start_ts: Timestamp,
        hash: &str,
        keys: &BTreeSet<String>,
        preds: &BTreeSet<String>,
    ) -> Self {
        TxnContext {
            start_ts,
            commit_ts: Timestamp::UNASSIGNED,
            aborted: false,
            keys: keys.iter().cloned().collect(),
            preds: preds.iter().cloned().collect(),
            hash: hash.to_string(),
        }
    }
}

/// A query or mutation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Snapshot timestamp, unassigned on a lazily started transaction
    pub start_ts: Timestamp,
    /// Query text, empty for a pure mutation
    pub query: String,
    /// Query variables
    pub vars: HashMap<String, String>,
    /// Mutations applied in the same round trip
    pub mutations: Vec<Mutation>,
    /// Commit in the same round trip
    pub commit_now: bool,
    /// Read-only transaction
    pub read_only: bool,
    /// Skip waiting for pending commits before reading
    pub best_effort: bool,
    /// Opaque hash from the last response context
    pub hash: String,
}

/// Response to a query or mutation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Query result encoded as JSON
    pub json: Vec<u8>,
    /// Updated transaction context
    pub txn: Option<TxnContext>,
    /// Uids assigned to blank nodes, keyed by blank-node name
    pub uids: HashMap<String, String>,
}

impl Response {
    /// Decode the JSON payload into a caller-chosen type
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        serde_json::from_slice(&self.json)
            .map_err(|e| crate::Error::cluster(format!("failed to decode response json: {}", e)))
    }
}

/// Result of a mutation: assigned uids and the context after the mutation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignedKeys {
    /// Uids assigned to blank nodes, keyed by blank-node name
    pub uids: HashMap<String, String>,
    /// Transaction context returned with the mutation
    pub context: TxnContext,
}

impl From<Response> for AssignedKeys {
    fn from(response: Response) -> Self {
        AssignedKeys {
            uids: response.uids,
            context: response.txn.unwrap_or_default(),
        }
    }
}

/// Request for a start timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginRequest {
    /// Read without waiting for in-flight commits
    pub best_effort: bool,
    /// The transaction will not mutate
    pub read_only: bool,
}

/// Start timestamp issued by the oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginResponse {
    /// The assigned start timestamp
    pub start_ts: Timestamp,
}

/// Decision returned by the cluster's conflict checker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitDecision {
    /// No overlapping write since the start timestamp
    Committed {
        /// Timestamp at which the writes became visible
        commit_ts: Timestamp,
    },
    /// Another transaction committed an overlapping write first
    Conflict {
        /// Reason reported by the conflict checker
        reason: String,
    },
}
