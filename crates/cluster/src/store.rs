//! Versioned triple store
//!
//! Each `(subject, predicate)` cell holds its full value list per commit
//! timestamp, oldest first. A read at timestamp `ts` sees the newest version
//! with `commit_ts <= ts`. Committed versions are never modified.

use lattice_core::{conflict_key, ObjectValue, Triple};
use std::collections::{BTreeMap, HashMap};

/// Whether a write adds or removes values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    /// Add a value (literals replace, edges accumulate)
    Set,
    /// Remove a value, or every value for `*`
    Delete,
}

/// A resolved write: the subject already carries a uid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    /// Set or delete
    pub op: WriteOp,
    /// The resolved triple
    pub triple: Triple,
}

impl Write {
    /// Conflict key of the written cell
    pub fn key(&self) -> String {
        conflict_key(&self.triple.subject, &self.triple.predicate)
    }

    /// Apply this write to a cell's value list
    pub fn apply_to(&self, values: &mut Vec<ObjectValue>) {
        let object = &self.triple.object;
        match (self.op, object) {
            (WriteOp::Set, ObjectValue::Literal(_)) => {
                values.retain(|v| !matches!(v, ObjectValue::Literal(_)));
                values.push(object.clone());
            }
            (WriteOp::Set, _) => {
                if !values.contains(object) {
                    values.push(object.clone());
                }
            }
            (WriteOp::Delete, ObjectValue::Star) => values.clear(),
            (WriteOp::Delete, _) => values.retain(|v| v != object),
        }
    }
}

#[derive(Debug, Clone)]
struct Version {
    commit_ts: u64,
    values: Vec<ObjectValue>,
}

/// Multi-version store of committed writes
#[derive(Debug, Default)]
pub struct VersionedStore {
    cells: BTreeMap<(String, String), Vec<Version>>,
    last_commit: HashMap<String, u64>,
}

impl VersionedStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Values of one cell as of `ts`
    pub fn read(&self, subject: &str, predicate: &str, ts: u64) -> Vec<ObjectValue> {
        self.cells
            .get(&(subject.to_string(), predicate.to_string()))
            .and_then(|versions| versions.iter().rev().find(|v| v.commit_ts <= ts))
            .map(|v| v.values.clone())
            .unwrap_or_default()
    }

    /// Every predicate of a subject with at least one value as of `ts`
    pub fn predicates_of(&self, subject: &str, ts: u64) -> Vec<String> {
        self.cells
            .keys()
            .filter(|(s, _)| s == subject)
            .map(|(_, p)| p.clone())
            .filter(|p| !self.read(subject, p, ts).is_empty())
            .collect()
    }

    /// Latest commit timestamp recorded for a conflict key
    pub fn last_commit(&self, key: &str) -> Option<u64> {
        self.last_commit.get(key).copied()
    }

    /// Apply a committed transaction's writes at `commit_ts`
    ///
    /// Every key in `keys` is stamped with `commit_ts`, written or not.
    pub fn apply<'k>(
        &mut self,
        commit_ts: u64,
        writes: &[Write],
        keys: impl IntoIterator<Item = &'k String>,
    ) {
        let mut touched: BTreeMap<(String, String), Vec<ObjectValue>> = BTreeMap::new();
        for write in writes {
            let cell = (write.triple.subject.clone(), write.triple.predicate.clone());
            let values = touched
                .entry(cell)
                .or_insert_with_key(|(s, p)| self.read(s, p, commit_ts));
            write.apply_to(values);
        }
        for (cell, values) in touched {
            self.last_commit
                .insert(conflict_key(&cell.0, &cell.1), commit_ts);
            self.cells
                .entry(cell)
                .or_default()
                .push(Version { commit_ts, values });
        }
        for key in keys {
            self.last_commit.insert(key.clone(), commit_ts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(subject: &str, predicate: &str, literal: &str) -> Write {
        Write {
            op: WriteOp::Set,
            triple: Triple {
                subject: subject.into(),
                predicate: predicate.into(),
                object: ObjectValue::Literal(literal.into()),
            },
        }
    }

    #[test]
    fn test_snapshot_reads() {
        let mut store = VersionedStore::new();
        store.apply(5, &[set("0x1", "name", "Alice")], []);
        store.apply(9, &[set("0x1", "name", "Alicia")], []);

        assert!(store.read("0x1", "name", 4).is_empty());
        assert_eq!(
            store.read("0x1", "name", 5),
            vec![ObjectValue::Literal("Alice".into())]
        );
        assert_eq!(
            store.read("0x1", "name", 100),
            vec![ObjectValue::Literal("Alicia".into())]
        );
        assert_eq!(store.last_commit("0x1|name"), Some(9));
    }

    #[test]
    fn test_edges_accumulate_and_star_clears() {
        let mut store = VersionedStore::new();
        let edge = |target: &str| Write {
            op: WriteOp::Set,
            triple: Triple {
                subject: "0x1".into(),
                predicate: "friend".into(),
                object: ObjectValue::Node(target.into()),
            },
        };
        store.apply(2, &[edge("0x2"), edge("0x3"), edge("0x2")], []);
        assert_eq!(store.read("0x1", "friend", 2).len(), 2);

        let clear = Write {
            op: WriteOp::Delete,
            triple: Triple {
                subject: "0x1".into(),
                predicate: "friend".into(),
                object: ObjectValue::Star,
            },
        };
        store.apply(3, &[clear], []);
        assert!(store.read("0x1", "friend", 3).is_empty());
        assert_eq!(store.read("0x1", "friend", 2).len(), 2);
        assert!(store.predicates_of("0x1", 3).is_empty());
    }

    #[test]
    fn test_extra_keys_are_stamped() {
        let mut store = VersionedStore::new();
        let keys = vec!["0x7|index".to_string()];
        store.apply(4, &[], &keys);
        assert_eq!(store.last_commit("0x7|index"), Some(4));
        assert_eq!(store.last_commit("0x7|other"), None);
    }
}
