//! Lattice - client-side transactions for an MVCC graph cluster
//!
//! Lattice runs optimistic transactions against a cluster that does the
//! storage and conflict detection. The client assigns start timestamps,
//! buffers mutations and their touched keys, reads at the transaction's
//! snapshot and drives the commit/discard protocol.
//!
//! # Quick Start
//!
//! ```ignore
//! use lattice::{Client, ClientConfig, MemoryCluster, Mutation};
//!
//! let client = Client::new(MemoryCluster::new(), ClientConfig::default());
//! let mut txn = client.new_transaction();
//! let assigned = txn.mutate(Mutation::set_nquads("_:alice <name> \"Alice\" .")).await?;
//! txn.commit().await?;
//! ```
//!
//! # Architecture
//!
//! The async engine lives in `lattice-concurrency` over the
//! [`Transport`] trait from `lattice-core`. [`blocking`] wraps it for callers
//! that want linear code. `lattice-cluster` provides [`MemoryCluster`], an
//! in-process implementation of the transport.

pub mod blocking;

pub use lattice_cluster::{FaultConfig, FaultType, MemoryCluster, Operation};
pub use lattice_concurrency::{Client, Transaction, TransactionMetrics, TxnFuture, TxnOptions};
pub use lattice_core::*;
