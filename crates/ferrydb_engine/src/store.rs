//! Per-database document store.
//!
//! Documents are kept in an ordered map from id to the latest revision.
//! Deletions leave a tombstone (a revision with no body) so replication
//! checkpoints can observe them; tombstones are invisible to reads.

use crate::dir::DatabaseDir;
use ferrydb_boundary::{BoundaryError, BoundaryResult, DatabaseHandle};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Current records file format.
pub(crate) const FORMAT_VERSION: u32 = 1;

/// The latest revision of one document.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredDocument {
    /// Commit sequence that produced this revision.
    pub sequence: u64,
    /// Body, or None for a deletion tombstone.
    pub body: Option<Value>,
}

/// One pending write: `None` body deletes the id.
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    /// Document id.
    pub id: String,
    /// New body, or None to delete.
    pub body: Option<Value>,
}

/// Serialized form of a database's records.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PersistedDatabase {
    /// Records file format version.
    pub format_version: u32,
    /// Next commit sequence.
    pub next_sequence: u64,
    /// Latest revision per document id.
    pub documents: BTreeMap<String, PersistedDocument>,
}

/// Serialized form of one document revision.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PersistedDocument {
    /// Commit sequence of the revision.
    pub sequence: u64,
    /// Body, absent for tombstones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug)]
pub(crate) struct DbState {
    pub documents: BTreeMap<String, StoredDocument>,
    pub next_sequence: u64,
}

impl DbState {
    fn new() -> Self {
        Self {
            documents: BTreeMap::new(),
            next_sequence: 1,
        }
    }

    fn from_persisted(persisted: PersistedDatabase) -> Self {
        let documents = persisted
            .documents
            .into_iter()
            .map(|(id, doc)| {
                (
                    id,
                    StoredDocument {
                        sequence: doc.sequence,
                        body: doc.body,
                    },
                )
            })
            .collect();
        Self {
            documents,
            next_sequence: persisted.next_sequence,
        }
    }

    fn to_persisted(&self) -> PersistedDatabase {
        let documents = self
            .documents
            .iter()
            .map(|(id, doc)| {
                (
                    id.clone(),
                    PersistedDocument {
                        sequence: doc.sequence,
                        body: doc.body.clone(),
                    },
                )
            })
            .collect();
        PersistedDatabase {
            format_version: FORMAT_VERSION,
            next_sequence: self.next_sequence,
            documents,
        }
    }
}

/// One open database inside the engine.
pub(crate) struct DbShard {
    /// Handle the database was registered under.
    pub handle: DatabaseHandle,
    /// Logical name the database was opened with.
    pub name: String,
    /// Directory and lock for persistent databases; None for in-memory.
    pub dir: Option<DatabaseDir>,
    /// Document records.
    pub state: RwLock<DbState>,
    /// Writes buffered by an open transaction.
    pub txn: Mutex<Option<Vec<PendingWrite>>>,
}

impl DbShard {
    /// Opens a shard, loading persisted records when a directory is given.
    pub fn open(
        handle: DatabaseHandle,
        name: String,
        dir: Option<DatabaseDir>,
    ) -> BoundaryResult<Self> {
        let state = match &dir {
            Some(dir) => match dir.load_records()? {
                Some(persisted) => {
                    if persisted.format_version != FORMAT_VERSION {
                        return Err(BoundaryError::corrupt(format!(
                            "unsupported records format v{}, expected v{}",
                            persisted.format_version, FORMAT_VERSION
                        )));
                    }
                    DbState::from_persisted(persisted)
                }
                None => DbState::new(),
            },
            None => DbState::new(),
        };

        Ok(Self {
            handle,
            name,
            dir,
            state: RwLock::new(state),
            txn: Mutex::new(None),
        })
    }

    /// Applies writes as one atomic batch and persists the result.
    ///
    /// Returns the distinct changed ids in first-write order.
    pub fn commit(&self, writes: Vec<PendingWrite>) -> BoundaryResult<Vec<String>> {
        let mut state = self.state.write();
        let mut changed: Vec<String> = Vec::new();

        for write in writes {
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.documents.insert(
                write.id.clone(),
                StoredDocument {
                    sequence,
                    body: write.body,
                },
            );
            if !changed.contains(&write.id) {
                changed.push(write.id);
            }
        }

        if let Some(dir) = &self.dir {
            dir.save_records(&state.to_persisted())?;
        }

        Ok(changed)
    }

    /// Returns the live body for an id, if any.
    pub fn get(&self, id: &str) -> Option<Value> {
        self.state.read().documents.get(id).and_then(|d| d.body.clone())
    }

    /// Returns the full revision for an id, tombstones included.
    pub fn revision(&self, id: &str) -> Option<StoredDocument> {
        self.state.read().documents.get(id).cloned()
    }

    /// Returns true if the id has a live (non-deleted) revision.
    pub fn contains(&self, id: &str) -> bool {
        self.state
            .read()
            .documents
            .get(id)
            .is_some_and(|d| d.body.is_some())
    }

    /// Revisions committed after the cursor, oldest first.
    pub fn changes_since(&self, cursor: u64) -> Vec<(u64, String)> {
        let state = self.state.read();
        let mut changes: Vec<(u64, String)> = state
            .documents
            .iter()
            .filter(|(_, doc)| doc.sequence > cursor)
            .map(|(id, doc)| (doc.sequence, id.clone()))
            .collect();
        changes.sort_by_key(|(sequence, _)| *sequence);
        changes
    }

    /// Highest committed sequence.
    pub fn last_sequence(&self) -> u64 {
        self.state.read().next_sequence - 1
    }

    /// Snapshot of live documents for query evaluation.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.state
            .read()
            .documents
            .iter()
            .filter_map(|(id, doc)| doc.body.clone().map(|body| (id.clone(), body)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shard() -> DbShard {
        DbShard::open(DatabaseHandle::mint(), "test".into(), None).unwrap()
    }

    fn put(id: &str, body: Value) -> PendingWrite {
        PendingWrite {
            id: id.into(),
            body: Some(body),
        }
    }

    fn delete(id: &str) -> PendingWrite {
        PendingWrite {
            id: id.into(),
            body: None,
        }
    }

    #[test]
    fn commit_and_get() {
        let shard = shard();
        let changed = shard.commit(vec![put("a", json!({"n": 1}))]).unwrap();
        assert_eq!(changed, vec!["a"]);
        assert_eq!(shard.get("a"), Some(json!({"n": 1})));
        assert!(shard.contains("a"));
    }

    #[test]
    fn missing_id_reads_none() {
        let shard = shard();
        assert_eq!(shard.get("nope"), None);
        assert!(!shard.contains("nope"));
    }

    #[test]
    fn delete_leaves_tombstone() {
        let shard = shard();
        shard.commit(vec![put("a", json!({}))]).unwrap();
        shard.commit(vec![delete("a")]).unwrap();

        assert_eq!(shard.get("a"), None);
        assert!(!shard.contains("a"));
        let revision = shard.revision("a").unwrap();
        assert!(revision.body.is_none());
        assert_eq!(revision.sequence, 2);
    }

    #[test]
    fn batch_commit_dedupes_changed_ids() {
        let shard = shard();
        let changed = shard
            .commit(vec![
                put("a", json!({"v": 1})),
                put("b", json!({"v": 2})),
                put("a", json!({"v": 3})),
            ])
            .unwrap();

        assert_eq!(changed, vec!["a", "b"]);
        // last write wins
        assert_eq!(shard.get("a"), Some(json!({"v": 3})));
        assert_eq!(shard.last_sequence(), 3);
    }

    #[test]
    fn changes_since_cursor() {
        let shard = shard();
        shard.commit(vec![put("a", json!({}))]).unwrap();
        shard.commit(vec![put("b", json!({}))]).unwrap();
        shard.commit(vec![put("a", json!({"v": 2}))]).unwrap();

        // "a" was rewritten at sequence 3, so only its latest shows up
        let all = shard.changes_since(0);
        assert_eq!(all, vec![(2, "b".to_string()), (3, "a".to_string())]);

        let tail = shard.changes_since(2);
        assert_eq!(tail, vec![(3, "a".to_string())]);

        assert!(shard.changes_since(3).is_empty());
    }

    #[test]
    fn snapshot_excludes_tombstones() {
        let shard = shard();
        shard
            .commit(vec![put("a", json!({"n": 1})), put("b", json!({"n": 2}))])
            .unwrap();
        shard.commit(vec![delete("a")]).unwrap();

        let snapshot = shard.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("b"), Some(&json!({"n": 2})));
    }

    #[test]
    fn persisted_round_trip() {
        let state = DbState {
            documents: BTreeMap::from([
                (
                    "a".to_string(),
                    StoredDocument {
                        sequence: 1,
                        body: Some(json!({"x": true})),
                    },
                ),
                (
                    "b".to_string(),
                    StoredDocument {
                        sequence: 2,
                        body: None,
                    },
                ),
            ]),
            next_sequence: 3,
        };

        let text = serde_json::to_string(&state.to_persisted()).unwrap();
        let restored = DbState::from_persisted(serde_json::from_str(&text).unwrap());

        assert_eq!(restored.next_sequence, 3);
        assert_eq!(restored.documents.len(), 2);
        assert_eq!(
            restored.documents.get("a").unwrap().body,
            Some(json!({"x": true}))
        );
        assert!(restored.documents.get("b").unwrap().body.is_none());
    }
}
