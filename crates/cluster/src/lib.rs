//! In-process cluster for Lattice
//!
//! `MemoryCluster` implements the [`Transport`](lattice_core::Transport)
//! trait entirely in memory. It backs the test suites and can be embedded
//! wherever a real cluster is not needed.
//!
//! Modules:
//! - store: versioned triple store with snapshot reads
//! - validation: first-committer-wins commit validation
//! - fault: deterministic fault injection per operation
//! - cluster: the transport implementation, call counters and request log

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod fault;
pub mod store;
pub mod validation;

pub use cluster::{MemoryCluster, RequestRecord};
pub use fault::{FaultConfig, FaultInjector, FaultType, Operation};
pub use store::{VersionedStore, Write, WriteOp};
pub use validation::{validate_keys, ConflictType, ValidationResult};
