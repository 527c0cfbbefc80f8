//! Core types and traits for Lattice
//!
//! This crate defines the foundational types shared by the transaction
//! engine and every cluster implementation:
//! - Timestamp, TxnState, TxnContext: transaction identity and lifecycle
//! - Request, Response, AssignedKeys: query and mutation round trips
//! - Mutation, Payload, Triple: mutation payloads and conflict keys
//! - Error, RpcStatus: client error taxonomy and raw transport faults
//! - fault: translation of transport faults at the boundary
//! - Transport: the cluster RPC seam
//! - ClientConfig: `lattice.toml` configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod fault;
pub mod mutation;
pub mod traits;
pub mod types;

pub use config::{ClientConfig, RetryConfig, StartTimestampPolicy, CONFIG_FILE_NAME};
pub use error::{Error, Result, RpcStatus, StatusCode};
pub use mutation::{conflict_key, is_blank_node, Mutation, ObjectValue, Payload, Triple};
pub use traits::Transport;
pub use types::{
    AssignedKeys, BeginRequest, BeginResponse, CommitDecision, Request, Response, Timestamp,
    TxnContext, TxnState,
};
