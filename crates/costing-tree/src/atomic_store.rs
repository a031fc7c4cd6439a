//! Lock-scoped mutation helpers for the JSONL node store.

use crate::store::{NodeStore, NodeStoreError};
use chrono::Utc;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn lock_path_for(data_path: &Path) -> PathBuf {
    let mut path: OsString = data_path.as_os_str().to_os_string();
    path.push(".lock");
    PathBuf::from(path)
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("store lock busy: {lock_path}")]
    Busy { lock_path: String },

    #[error("failed to acquire store lock {lock_path}: {message}")]
    Io { lock_path: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum NodeMutationError<E> {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(NodeStoreError),

    #[error("{0}")]
    Mutation(E),
}

/// Exclusive advisory lock held as a sibling `.lock` file.
///
/// Acquisition fails fast when the lock file exists; the file is removed on drop.
#[derive(Debug)]
pub struct StoreLock {
    lock_path: PathBuf,
    _file: File,
}

impl StoreLock {
    pub fn acquire(data_path: impl AsRef<Path>) -> Result<Self, LockError> {
        let lock_path = lock_path_for(data_path.as_ref());
        let io_error = |message: String| LockError::Io {
            lock_path: lock_path.display().to_string(),
            message,
        };

        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| io_error(e.to_string()))?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                let _ = writeln!(
                    file,
                    "pid={}\nutc={}",
                    std::process::id(),
                    Utc::now().to_rfc3339()
                );
                Ok(Self {
                    lock_path,
                    _file: file,
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Err(LockError::Busy {
                lock_path: lock_path.display().to_string(),
            }),
            Err(err) => Err(io_error(err.to_string())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

/// Execute one lock-scoped mutation against a nodes JSONL path.
///
/// The mutator returns `(value, changed)`; `changed=true` persists the store
/// before the lock is released.
pub fn mutate_nodes_jsonl<T, E, F>(path: impl AsRef<Path>, mutator: F) -> Result<T, NodeMutationError<E>>
where
    F: FnOnce(&mut NodeStore) -> Result<(T, bool), E>,
{
    let path = path.as_ref();
    let _lock = StoreLock::acquire(path)?;

    let mut store = NodeStore::load_jsonl(path).map_err(NodeMutationError::Store)?;
    let (value, changed) = mutator(&mut store).map_err(NodeMutationError::Mutation)?;
    if changed {
        store.save_jsonl(path).map_err(NodeMutationError::Store)?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::WbsNode;
    use std::convert::Infallible;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "costing-lock-{prefix}-{}-{unique}.jsonl",
            std::process::id()
        ))
    }

    #[test]
    fn second_lock_is_busy_until_first_drops() {
        let path = temp_path("busy");
        let first = StoreLock::acquire(&path).expect("first lock should succeed");
        assert!(matches!(StoreLock::acquire(&path), Err(LockError::Busy { .. })));
        drop(first);
        let again = StoreLock::acquire(&path).expect("lock should be free again");
        assert!(again.path().exists());
    }

    #[test]
    fn mutation_persists_only_when_changed() {
        let path = temp_path("mutate");

        mutate_nodes_jsonl::<_, Infallible, _>(&path, |store| {
            store.upsert(WbsNode::new("WBS-0001", "boq-1", "A", 1, None));
            Ok(((), false))
        })
        .expect("unchanged mutation should succeed");
        assert!(!path.exists());

        let len = mutate_nodes_jsonl::<_, Infallible, _>(&path, |store| {
            store.upsert(WbsNode::new("WBS-0001", "boq-1", "A", 1, None));
            Ok((store.len(), true))
        })
        .expect("changed mutation should succeed");
        assert_eq!(len, 1);
        assert_eq!(NodeStore::load_jsonl(&path).expect("reload").len(), 1);
        assert!(!lock_path_for(&path).exists());

        let _ = fs::remove_file(path);
    }
}
