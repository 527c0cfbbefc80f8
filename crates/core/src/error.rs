//! Error types for the transaction client
//!
//! Two layers live here:
//! - [`RpcStatus`]: the raw fault reported by a transport (a status code plus
//!   a message), as produced by whatever sits behind the
//!   [`Transport`](crate::traits::Transport) trait.
//! - [`Error`]: the stable, client-facing taxonomy. Every transport fault is
//!   mapped onto it by [`fault::translate`](crate::fault::translate) with the
//!   original status kept as the error source.
//!
//! We use `thiserror` for the `Display` and `Error` implementations.

use crate::types::TxnState;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Status code carried by a transport fault
///
/// Mirrors the subset of RPC status codes a cluster node can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// No node could be reached
    Unavailable,
    /// The call did not finish before its deadline
    DeadlineExceeded,
    /// The call was cancelled before completion
    Cancelled,
    /// The server aborted the transaction (conflict)
    Aborted,
    /// The server hit an internal fault
    Internal,
    /// The request was malformed
    InvalidArgument,
    /// The request is not valid in the server's current state
    FailedPrecondition,
    /// Anything the transport could not classify
    Unknown,
}

impl StatusCode {
    /// Canonical lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Unavailable => "unavailable",
            StatusCode::DeadlineExceeded => "deadline_exceeded",
            StatusCode::Cancelled => "cancelled",
            StatusCode::Aborted => "aborted",
            StatusCode::Internal => "internal",
            StatusCode::InvalidArgument => "invalid_argument",
            StatusCode::FailedPrecondition => "failed_precondition",
            StatusCode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw fault returned by a transport call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct RpcStatus {
    /// Status code
    pub code: StatusCode,
    /// Human-readable detail from the server or transport
    pub message: String,
}

impl RpcStatus {
    /// Create a status with the given code and message
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// No node could be reached
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    /// Deadline exceeded
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(StatusCode::DeadlineExceeded, message)
    }

    /// Transaction aborted by the conflict checker
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Aborted, message)
    }

    /// Internal server fault
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    /// Malformed request
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }
}

/// Client-facing error taxonomy
///
/// # Categories
///
/// | Category | Variants | Caller recovery |
/// |----------|----------|-----------------|
/// | State | `ActiveStateRequired`, `ReadOnly`, `BestEffortWithMutations` | Fix the call sequence |
/// | Concurrency | `Conflict` | Start a new transaction and re-run the logic |
/// | Transport | `Transport`, `Unavailable` | Retry policy is the caller's |
/// | Server | `Cluster` | Usually not retryable |
/// | Input | `InvalidRequest`, `Config` | Fix the input |
#[derive(Debug, Error)]
pub enum Error {
    /// Operation attempted on a transaction that is no longer active
    #[error("transaction is not active (state: {state})")]
    ActiveStateRequired {
        /// State the transaction was in
        state: TxnState,
    },

    /// Another committed transaction wrote an overlapping key
    #[error("transaction conflict: {reason}")]
    Conflict {
        /// Reason reported by the conflict checker
        reason: String,
        /// Underlying status, when the conflict arrived as a fault
        #[source]
        source: Option<RpcStatus>,
    },

    /// Network or connection failure reaching the cluster
    #[error("transport error: {source}")]
    Transport {
        /// Underlying status
        #[source]
        source: RpcStatus,
    },

    /// No cluster node could be reached
    #[error("cluster unavailable: {source}")]
    Unavailable {
        /// Underlying status
        #[source]
        source: RpcStatus,
    },

    /// The cluster reported a fault unrelated to conflict detection
    #[error("cluster error: {message}")]
    Cluster {
        /// Description of the fault
        message: String,
        /// Underlying status, if the fault came from the transport
        #[source]
        source: Option<RpcStatus>,
    },

    /// Write operation attempted on a read-only transaction
    #[error("read-only transaction does not allow {operation}")]
    ReadOnly {
        /// The rejected operation
        operation: &'static str,
    },

    /// Best-effort reads combined with staged mutations
    #[error("best-effort reads are only allowed on transactions without mutations")]
    BestEffortWithMutations,

    /// Request rejected before reaching the network
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// Why the request was rejected
        reason: String,
    },

    /// Configuration could not be loaded or parsed
    #[error("invalid configuration: {reason}")]
    Config {
        /// Why the configuration was rejected
        reason: String,
    },
}

impl Error {
    /// Create an `ActiveStateRequired` error
    pub fn not_active(state: TxnState) -> Self {
        Error::ActiveStateRequired { state }
    }

    /// Create a `Conflict` error without an underlying status
    pub fn conflict(reason: impl Into<String>) -> Self {
        Error::Conflict {
            reason: reason.into(),
            source: None,
        }
    }

    /// Create a `Cluster` error without an underlying status
    pub fn cluster(message: impl Into<String>) -> Self {
        Error::Cluster {
            message: message.into(),
            source: None,
        }
    }

    /// Create an `InvalidRequest` error
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Error::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Create a `Config` error
    pub fn config(reason: impl Into<String>) -> Self {
        Error::Config {
            reason: reason.into(),
        }
    }

    /// Whether this is a conflict detected by the server
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Whether this is a transport-class failure
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Unavailable { .. })
    }

    /// Whether the underlying call ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Transport { source } if source.code == StatusCode::DeadlineExceeded
        )
    }

    /// Whether re-running the business logic in a fresh transaction may succeed
    ///
    /// Only conflicts qualify. Transport faults are left to the caller's own
    /// policy since a timed-out commit may still have been applied.
    pub fn is_retryable(&self) -> bool {
        self.is_conflict()
    }

    /// The raw transport status behind this error, if any
    pub fn status(&self) -> Option<&RpcStatus> {
        match self {
            Error::Transport { source } | Error::Unavailable { source } => Some(source),
            Error::Conflict { source, .. } | Error::Cluster { source, .. } => source.as_ref(),
            _ => None,
        }
    }
}
