//! Mutation buffer
//!
//! Holds the mutations a transaction has sent and the keys they touch. The
//! buffer never talks to the network: a mutation is staged right before its
//! request goes out, and the commit decision later covers everything staged.
//!
//! Key sets only grow. Keys come from two sources:
//! - extraction from the mutation encoding when it is staged
//! - the response context returned by the cluster (blank-node keys, index
//!   keys and anything else the client cannot derive)

use lattice_core::Mutation;
use std::collections::BTreeSet;

/// Staged mutations and their touched keys
#[derive(Debug, Default, Clone)]
pub struct MutationBuffer {
    staged: Vec<Mutation>,
    flushed: usize,
    keys: BTreeSet<String>,
    predicates: BTreeSet<String>,
}

impl MutationBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mutation and merge the keys its payload exposes
    pub fn stage(&mut self, mutation: Mutation) {
        self.keys.extend(mutation.touched_keys());
        self.predicates.extend(mutation.touched_predicates());
        self.staged.push(mutation);
    }

    /// Merge keys and predicates reported by the cluster
    pub fn merge_context(&mut self, keys: &[String], preds: &[String]) {
        self.keys.extend(keys.iter().cloned());
        self.predicates.extend(preds.iter().cloned());
    }

    /// Mark every staged mutation as covered by a commit decision
    ///
    /// Returns the number of mutations newly flushed. Nothing is re-sent:
    /// the mutations already reached the cluster when they were staged.
    pub fn flush(&mut self) -> usize {
        let newly = self.staged.len() - self.flushed;
        self.flushed = self.staged.len();
        newly
    }

    /// Number of staged mutations
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Whether nothing has been staged
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Number of staged mutations not yet covered by a commit
    pub fn unflushed(&self) -> usize {
        self.staged.len() - self.flushed
    }

    /// Staged mutations in program order
    pub fn staged(&self) -> &[Mutation] {
        &self.staged
    }

    /// Touched conflict keys
    pub fn keys(&self) -> &BTreeSet<String> {
        &self.keys
    }

    /// Touched predicates
    pub fn predicates(&self) -> &BTreeSet<String> {
        &self.predicates
    }
}
