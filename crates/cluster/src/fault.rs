//! Fault injection for deterministic testing
//!
//! Rules are matched in registration order against each incoming call. The
//! first rule that applies fires; its trigger count limits how often.

use lattice_core::RpcStatus;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Transport operation of the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Start timestamp request
    Begin,
    /// Read
    Query,
    /// Mutation, possibly with a query and commit-now
    Mutate,
    /// Commit decision
    Commit,
    /// Abort notification
    Discard,
}

impl Operation {
    /// All operations, in index order
    pub const ALL: [Operation; 5] = [
        Operation::Begin,
        Operation::Query,
        Operation::Mutate,
        Operation::Commit,
        Operation::Discard,
    ];

    /// Stable index for per-operation tables
    pub fn index(&self) -> usize {
        match self {
            Operation::Begin => 0,
            Operation::Query => 1,
            Operation::Mutate => 2,
            Operation::Commit => 3,
            Operation::Discard => 4,
        }
    }

    /// Canonical lower-case name
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Begin => "begin",
            Operation::Query => "query",
            Operation::Mutate => "mutate",
            Operation::Commit => "commit",
            Operation::Discard => "discard",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Types of faults that can be injected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultType {
    /// Fail with `Unavailable` before processing
    Unavailable,
    /// Fail with `Internal` before processing
    Internal,
    /// Fail with `Aborted` before processing
    Abort,
    /// Delay before processing, then proceed normally
    Delay {
        /// Delay in milliseconds
        ms: u64,
    },
    /// Process the call, then fail with `DeadlineExceeded` (reply lost)
    ReplyLost,
}

impl FaultType {
    /// Get a human-readable name for this fault type
    pub fn name(&self) -> &'static str {
        match self {
            FaultType::Unavailable => "unavailable",
            FaultType::Internal => "internal",
            FaultType::Abort => "abort",
            FaultType::Delay { .. } => "delay",
            FaultType::ReplyLost => "reply_lost",
        }
    }

    /// The status a failing fault reports, if it fails before processing
    pub(crate) fn status(&self, operation: Operation) -> Option<RpcStatus> {
        let message = format!("injected {} fault on {}", self.name(), operation);
        match self {
            FaultType::Unavailable => Some(RpcStatus::unavailable(message)),
            FaultType::Internal => Some(RpcStatus::internal(message)),
            FaultType::Abort => Some(RpcStatus::aborted(message)),
            FaultType::Delay { .. } | FaultType::ReplyLost => None,
        }
    }
}

/// Configuration for a fault injection rule
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// The type of fault to inject
    pub fault_type: FaultType,
    /// Operation the rule applies to (`None` = every operation)
    pub operation: Option<Operation>,
    /// Only trigger after this many matching calls
    pub after_calls: u64,
    /// Maximum number of times to trigger
    pub max_triggers: Option<u64>,
}

impl FaultConfig {
    /// Create a rule that fires on every call
    pub fn new(fault_type: FaultType) -> Self {
        Self {
            fault_type,
            operation: None,
            after_calls: 0,
            max_triggers: None,
        }
    }

    /// Restrict the rule to one operation
    pub fn on(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Skip the first `calls` matching calls
    pub fn after(mut self, calls: u64) -> Self {
        self.after_calls = calls;
        self
    }

    /// Set the maximum number of triggers
    pub fn max_triggers(mut self, max: u64) -> Self {
        self.max_triggers = Some(max);
        self
    }

    /// Fire exactly once
    pub fn once(self) -> Self {
        self.max_triggers(1)
    }
}

#[derive(Debug)]
struct FaultState {
    config: FaultConfig,
    seen: u64,
    trigger_count: u64,
}

/// Fault injector shared by every caller of a cluster
#[derive(Debug, Default)]
pub struct FaultInjector {
    faults: Mutex<Vec<FaultState>>,
}

impl FaultInjector {
    /// Create an injector with no rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fault rule
    pub fn register(&self, config: FaultConfig) {
        self.faults.lock().push(FaultState {
            config,
            seen: 0,
            trigger_count: 0,
        });
    }

    /// Remove every rule
    pub fn clear(&self) {
        self.faults.lock().clear();
    }

    /// Check whether a fault fires for this call
    pub fn should_inject(&self, operation: Operation) -> Option<FaultType> {
        let mut faults = self.faults.lock();
        for state in faults.iter_mut() {
            if state.config.operation.is_some_and(|op| op != operation) {
                continue;
            }
            state.seen += 1;
            if state.seen <= state.config.after_calls {
                continue;
            }
            if let Some(max) = state.config.max_triggers {
                if state.trigger_count >= max {
                    continue;
                }
            }
            state.trigger_count += 1;
            debug!(
                fault = state.config.fault_type.name(),
                operation = operation.name(),
                trigger_count = state.trigger_count,
                "Injecting fault"
            );
            return Some(state.config.fault_type.clone());
        }
        None
    }

    /// Total triggers across all rules
    pub fn trigger_count(&self) -> u64 {
        self.faults.lock().iter().map(|s| s.trigger_count).sum()
    }
}

/// Handle a fault before the call is processed
///
/// Returns the fault still pending after processing (`ReplyLost`), or the
/// status to fail with right away.
pub(crate) async fn before_call(
    injector: &FaultInjector,
    operation: Operation,
) -> Result<Option<FaultType>, RpcStatus> {
    let Some(fault) = injector.should_inject(operation) else {
        return Ok(None);
    };
    if let Some(status) = fault.status(operation) {
        return Err(status);
    }
    if let FaultType::Delay { ms } = fault {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        return Ok(None);
    }
    Ok(Some(fault))
}
