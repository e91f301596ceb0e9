//! File-based key-value store for persistent storage.

use crate::backend::{KeyValueStore, StoredValue};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A file-based key-value store.
///
/// All values are held in memory and the whole map is written to a single
/// CBOR file after every mutation. Data survives process restarts.
///
/// # Durability
///
/// - Each write goes to `<path>.tmp` and is renamed over `<path>`, so a
///   crash leaves either the old or the new snapshot, never a torn file
/// - Writes are serialized; a later write always persists a newer snapshot
///
/// # Locking
///
/// An exclusive advisory lock is taken on `<path>.lock` for the lifetime of
/// the store, so two processes cannot write the same file.
///
/// # Example
///
/// ```no_run
/// use skiff_storage::{FileStore, KeyValueStore};
/// use std::path::Path;
///
/// # async fn demo() -> skiff_storage::StorageResult<()> {
/// let store = FileStore::open(Path::new("data/skiff.cbor"))?;
/// store.set_int("launches", 1).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: RwLock<HashMap<String, StoredValue>>,
    write_lock: tokio::sync::Mutex<()>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store at the given path.
    ///
    /// Parent directories are created if needed. An existing file is loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not a valid snapshot,
    /// or is locked by another process.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let lock_path = path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StorageError::Locked(path.display().to_string()))?;

        let data = if path.exists() {
            let file = File::open(path)?;
            ciborium::from_reader(std::io::BufReader::new(file))
                .map_err(|e| StorageError::Corrupted(e.to_string()))?
        } else {
            HashMap::new()
        };

        debug!(path = %path.display(), keys = data.len(), "opened file store");

        Ok(Self {
            path: path.to_path_buf(),
            data: RwLock::new(data),
            write_lock: tokio::sync::Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn mutate<F>(&self, f: F) -> StorageResult<()>
    where
        F: FnOnce(&mut HashMap<String, StoredValue>),
    {
        let _guard = self.write_lock.lock().await;

        let bytes = {
            let mut data = self.data.write();
            f(&mut data);
            let mut buf = Vec::new();
            ciborium::into_writer(&*data, &mut buf)
                .map_err(|e| StorageError::Corrupted(e.to_string()))?;
            buf
        };

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> StorageResult<Option<StoredValue>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: StoredValue) -> StorageResult<()> {
        let key = key.to_string();
        self.mutate(move |data| {
            data.insert(key, value);
        })
        .await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        if !self.data.read().contains_key(key) {
            return Ok(());
        }
        self.mutate(|data| {
            data.remove(key);
        })
        .await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.data.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.cbor");

        let store = FileStore::open(&path).unwrap();
        assert!(store.keys().await.unwrap().is_empty());
        // Nothing is written until the first mutation
        assert!(!path.exists());

        store.set_bool("ready", true).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn file_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.cbor");

        {
            let store = FileStore::open(&path).unwrap();
            store.set_string("name", "skiff".into()).await.unwrap();
            store.set_int("count", 7).await.unwrap();
            store
                .set_string_list("tags", vec!["x".into(), "y".into()])
                .await
                .unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get_string("name").await.unwrap().as_deref(), Some("skiff"));
        assert_eq!(store.get_int("count").await.unwrap(), Some(7));
        assert_eq!(
            store.get_string_list("tags").await.unwrap(),
            Some(vec!["x".to_string(), "y".to_string()])
        );
    }

    #[tokio::test]
    async fn file_remove_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.cbor");

        {
            let store = FileStore::open(&path).unwrap();
            store.set_bool("a", true).await.unwrap();
            store.set_bool("b", false).await.unwrap();
            store.remove("a").await.unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.cbor");

        let _first = FileStore::open(&path).unwrap();
        let second = FileStore::open(&path);
        assert!(matches!(second, Err(StorageError::Locked(_))));
    }

    #[tokio::test]
    async fn file_corrupted_snapshot_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.cbor");
        std::fs::write(&path, b"\xff\xff not cbor").unwrap();

        let result = FileStore::open(&path);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[tokio::test]
    async fn file_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("store.cbor");

        let store = FileStore::open(&path).unwrap();
        store.set_int("x", 1).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
    }
}
