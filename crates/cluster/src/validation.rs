//! Commit validation
//!
//! First-committer-wins on the write set: a transaction conflicts if any key
//! it touched was committed by another transaction after its start
//! timestamp. Reads are not validated, so write skew is allowed.

use crate::store::VersionedStore;
use std::fmt;

/// Types of conflicts found during validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// Another transaction committed the key after this one started
    WriteWriteConflict {
        /// The conflicting key
        key: String,
        /// Start timestamp of the validated transaction
        start_ts: u64,
        /// Commit timestamp of the newer write
        committed_at: u64,
    },
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictType::WriteWriteConflict {
                key,
                start_ts,
                committed_at,
            } => write!(
                f,
                "key {} committed at {} after start {}",
                key, committed_at, start_ts
            ),
        }
    }
}

/// Result of transaction validation
///
/// A transaction commits only if `is_valid()` returns true.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// All conflicts detected during validation
    pub conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// A successful validation result (no conflicts)
    pub fn ok() -> Self {
        Self::default()
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    /// Human-readable summary for the abort message
    pub fn reason(&self) -> String {
        match self.conflicts.first() {
            None => "no conflict".to_string(),
            Some(first) if self.conflicts.len() == 1 => format!("transaction aborted: {}", first),
            Some(first) => format!(
                "transaction aborted: {} (and {} more)",
                first,
                self.conflicts.len() - 1
            ),
        }
    }
}

/// Validate a transaction's touched keys against committed state
pub fn validate_keys<'k>(
    store: &VersionedStore,
    start_ts: u64,
    keys: impl IntoIterator<Item = &'k String>,
) -> ValidationResult {
    let mut result = ValidationResult::ok();
    for key in keys {
        if let Some(committed_at) = store.last_commit(key) {
            if committed_at > start_ts {
                result.conflicts.push(ConflictType::WriteWriteConflict {
                    key: key.clone(),
                    start_ts,
                    committed_at,
                });
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_commits_is_valid() {
        let store = VersionedStore::new();
        let keys = vec!["0x1|name".to_string()];
        assert!(validate_keys(&store, 3, &keys).is_valid());
    }

    #[test]
    fn test_commit_before_start_is_valid() {
        let mut store = VersionedStore::new();
        let keys = vec!["0x1|name".to_string()];
        store.apply(2, &[], &keys);
        assert!(validate_keys(&store, 3, &keys).is_valid());
    }

    #[test]
    fn test_commit_after_start_conflicts() {
        let mut store = VersionedStore::new();
        let keys = vec!["0x1|name".to_string(), "0x1|age".to_string()];
        store.apply(7, &[], &keys);

        let result = validate_keys(&store, 3, &keys);
        assert!(!result.is_valid());
        assert_eq!(result.conflict_count(), 2);
        assert!(result.reason().contains("and 1 more"));
        assert_eq!(
            result.conflicts[0],
            ConflictType::WriteWriteConflict {
                key: "0x1|name".into(),
                start_ts: 3,
                committed_at: 7
            }
        );
    }
}
