//! Transaction lifecycle engine for Lattice
//!
//! This crate implements the client side of optimistic transactions against
//! an MVCC cluster:
//! - TimestampOracle: start timestamp acquisition (eager policy)
//! - MutationBuffer: staged mutations and touched keys
//! - QueryExecutor: snapshot reads, optionally best-effort
//! - Coordinator: mutate, commit and discard state machine
//! - Transaction: the handle applications hold
//! - Client: transaction factory, conflict retry and lifecycle metrics
//!
//! All network-bound operations are async and suspend only at the
//! [`Transport`](lattice_core::Transport) boundary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod client;
pub mod context;
pub mod coordinator;
pub mod metrics;
pub mod oracle;
pub mod query;
pub mod transaction;

pub use buffer::MutationBuffer;
pub use client::{retry_delay, Client, TxnFuture, TxnOptions};
pub use context::TxnCore;
pub use coordinator::Coordinator;
pub use metrics::{ClientMetrics, TransactionMetrics};
pub use oracle::TimestampOracle;
pub use query::QueryExecutor;
pub use transaction::Transaction;
