//! Authoritative per-node ledger with scoped, journaled transactions.
//!
//! Every mutation runs against a private draft of exactly one entry while that
//! entry's lock is held. The draft is appended to the commit log and only then
//! swapped in, so a failing closure or a failing append leaves the entry as it
//! was. Different entries never contend with each other.

use crate::entry::LedgerEntry;
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use costing_tree::{NodeStore, append_record_to_path, read_records_from_path, write_records_to_path};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info};

/// One committed transaction. `entry: None` records a deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    pub node_key: String,
    pub version: u64,
    pub committed_at: DateTime<Utc>,
    pub entry: Option<LedgerEntry>,
}

impl CommitRecord {
    fn upsert(entry: &LedgerEntry) -> Self {
        Self {
            node_key: entry.node_key.clone(),
            version: entry.version,
            committed_at: entry.updated_at,
            entry: Some(entry.clone()),
        }
    }

    fn tombstone(node_key: &str, version: u64) -> Self {
        Self {
            node_key: node_key.to_string(),
            version,
            committed_at: Utc::now(),
            entry: None,
        }
    }
}

/// Durable sink for committed transactions.
///
/// `append` must not return before the record is durable.
pub trait CommitLog: Send + Sync {
    fn append(&self, record: &CommitRecord) -> Result<(), LedgerError>;

    /// Replace the whole log with one snapshot record per live entry.
    fn rewrite(&self, records: &[CommitRecord]) -> Result<(), LedgerError>;
}

/// Commit log that keeps nothing. For ephemeral ledgers and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLog;

impl CommitLog for NullLog {
    fn append(&self, _record: &CommitRecord) -> Result<(), LedgerError> {
        Ok(())
    }

    fn rewrite(&self, _records: &[CommitRecord]) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// Append-only JSONL journal, fsynced per commit.
#[derive(Debug, Clone)]
pub struct JournalLog {
    path: PathBuf,
}

impl JournalLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay the journal, last write per node wins. Missing file ⇒ empty.
    pub fn replay(&self) -> Result<BTreeMap<String, LedgerEntry>, LedgerError> {
        let mut entries = BTreeMap::new();
        if !self.path.exists() {
            return Ok(entries);
        }
        let records: Vec<CommitRecord> = read_records_from_path(&self.path)?;
        for record in records {
            match record.entry {
                Some(entry) => {
                    entries.insert(record.node_key, entry);
                }
                None => {
                    entries.remove(&record.node_key);
                }
            }
        }
        Ok(entries)
    }
}

impl CommitLog for JournalLog {
    fn append(&self, record: &CommitRecord) -> Result<(), LedgerError> {
        append_record_to_path(&self.path, record).map_err(|err| LedgerError::CommitFailed {
            node_key: record.node_key.clone(),
            message: err.to_string(),
        })
    }

    fn rewrite(&self, records: &[CommitRecord]) -> Result<(), LedgerError> {
        write_records_to_path(&self.path, records)?;
        Ok(())
    }
}

type Slot = Arc<Mutex<LedgerEntry>>;

pub struct LedgerStore {
    entries: RwLock<BTreeMap<String, Slot>>,
    log: Box<dyn CommitLog>,
    /// Commits hold this shared; compaction holds it exclusively. Always
    /// taken before any entry or map lock.
    gate: RwLock<()>,
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

fn lock(slot: &Slot) -> MutexGuard<'_, LedgerEntry> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LedgerStore {
    pub fn in_memory() -> Self {
        Self::with_log(Box::new(NullLog))
    }

    pub fn with_log(log: Box<dyn CommitLog>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            log,
            gate: RwLock::new(()),
        }
    }

    /// Open a journal-backed ledger, replaying existing commits.
    pub fn open_journal(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let journal = JournalLog::new(path);
        let replayed = journal.replay()?;
        debug!(path = %journal.path().display(), entries = replayed.len(), "ledger journal replayed");
        let store = Self::with_log(Box::new(journal));
        {
            let mut entries = store.entries.write().unwrap_or_else(PoisonError::into_inner);
            for (key, entry) in replayed {
                entries.insert(key, Arc::new(Mutex::new(entry)));
            }
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    pub fn contains(&self, node_key: &str) -> bool {
        self.read_map().contains_key(node_key)
    }

    /// Snapshot of one entry.
    pub fn get(&self, node_key: &str) -> Option<LedgerEntry> {
        self.slot(node_key).map(|slot| lock(&slot).clone())
    }

    /// Snapshot of every entry in key order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let slots: Vec<Slot> = self.read_map().values().cloned().collect();
        slots.iter().map(|slot| lock(slot).clone()).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.read_map().keys().cloned().collect()
    }

    /// Insert `entry` unless one exists for its key. Returns whether it was created.
    pub fn ensure_entry(&self, mut entry: LedgerEntry) -> Result<bool, LedgerError> {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&entry.node_key) {
            return Ok(false);
        }
        entry.version = 1;
        entry.updated_at = Utc::now();
        self.log.append(&CommitRecord::upsert(&entry))?;
        map.insert(entry.node_key.clone(), Arc::new(Mutex::new(entry)));
        Ok(true)
    }

    /// Create opening entries for leaves that have none. Existing entries are
    /// never overwritten. Returns how many were created.
    pub fn seed_from_nodes(&self, nodes: &NodeStore) -> Result<usize, LedgerError> {
        let mut created = 0;
        for node in nodes.nodes().filter(|node| !node.is_group) {
            if self.ensure_entry(LedgerEntry::for_node(node))? {
                created += 1;
            }
        }
        info!(created, "ledger seeded from nodes");
        Ok(created)
    }

    /// Run `mutate` against a draft of one entry and commit it atomically.
    ///
    /// The closure's error, or a commit-log failure, discards the draft.
    pub fn transact<T, F>(&self, node_key: &str, mutate: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut LedgerEntry) -> Result<T, LedgerError>,
    {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        let slot = self
            .slot(node_key)
            .ok_or_else(|| LedgerError::EntryNotFound(node_key.to_string()))?;
        let mut current = lock(&slot);
        if !self.is_live(node_key, &slot) {
            return Err(LedgerError::EntryNotFound(node_key.to_string()));
        }

        let mut draft = current.clone();
        let value = mutate(&mut draft)?;
        draft.node_key = current.node_key.clone();
        draft.version = current.version + 1;
        draft.updated_at = Utc::now();

        self.log
            .append(&CommitRecord::upsert(&draft))
            .map_err(|err| match err {
                LedgerError::CommitFailed { .. } => err,
                other => LedgerError::CommitFailed {
                    node_key: node_key.to_string(),
                    message: other.to_string(),
                },
            })?;
        *current = draft;
        Ok(value)
    }

    /// Delete one entry. Returns whether it existed.
    pub fn remove(&self, node_key: &str) -> Result<bool, LedgerError> {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = self.slot(node_key) else {
            return Ok(false);
        };
        let current = lock(&slot);
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !map.get(node_key).is_some_and(|live| Arc::ptr_eq(live, &slot)) {
            return Ok(false);
        }
        self.log
            .append(&CommitRecord::tombstone(node_key, current.version + 1))?;
        map.remove(node_key);
        Ok(true)
    }

    /// SHA-256 over every entry's quantity fields in key order.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for entry in self.entries() {
            entry.feed_digest(&mut hasher);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Rewrite the commit log as one record per live entry. Returns the count.
    pub fn compact(&self) -> Result<usize, LedgerError> {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        let records: Vec<CommitRecord> = self
            .entries()
            .iter()
            .map(CommitRecord::upsert)
            .collect();
        self.log.rewrite(&records)?;
        info!(entries = records.len(), "ledger journal compacted");
        Ok(records.len())
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Slot>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, node_key: &str) -> Option<Slot> {
        self.read_map().get(node_key).cloned()
    }

    fn is_live(&self, node_key: &str, slot: &Slot) -> bool {
        self.read_map()
            .get(node_key)
            .is_some_and(|live| Arc::ptr_eq(live, slot))
    }
}
