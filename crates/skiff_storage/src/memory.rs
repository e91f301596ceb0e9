//! In-memory key-value store for testing.

use crate::backend::{KeyValueStore, StoredValue};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory key-value store.
///
/// This store keeps all values in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral engines that don't need persistence
///
/// Writes can be made to fail on demand with [`InMemoryStore::fail_writes`],
/// which is how tests exercise the engine's local-storage error paths.
///
/// # Example
///
/// ```rust
/// use skiff_storage::{InMemoryStore, KeyValueStore};
///
/// # tokio_test_block_on(async {
/// let store = InMemoryStore::new();
/// store.set_string("greeting", "hello".into()).await.unwrap();
/// assert_eq!(store.get_string("greeting").await.unwrap().as_deref(), Some("hello"));
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<HashMap<String, StoredValue>>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory store with pre-existing values.
    #[must_use]
    pub fn with_data(data: HashMap<String, StoredValue>) -> Self {
        Self {
            data: RwLock::new(data),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Returns a copy of all values in the store.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, StoredValue> {
        self.data.read().clone()
    }

    /// Returns the number of keys in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Makes every subsequent `set` and `remove` fail with an I/O error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "write rejected by test store",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<StoredValue>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: StoredValue) -> StorageResult<()> {
        self.check_writable()?;
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.check_writable()?;
        self.data.write().remove(key);
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.data.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_new_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_typed_roundtrips() {
        let store = InMemoryStore::new();

        store.set_string("s", "value".into()).await.unwrap();
        store.set_bool("b", true).await.unwrap();
        store.set_int("i", -42).await.unwrap();
        store
            .set_string_list("l", vec!["a".into(), "b".into()])
            .await
            .unwrap();

        assert_eq!(store.get_string("s").await.unwrap().as_deref(), Some("value"));
        assert_eq!(store.get_bool("b").await.unwrap(), Some(true));
        assert_eq!(store.get_int("i").await.unwrap(), Some(-42));
        assert_eq!(
            store.get_string_list("l").await.unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn memory_missing_key_is_none() {
        let store = InMemoryStore::new();
        assert_eq!(store.get_string("nope").await.unwrap(), None);
        assert_eq!(store.get_int("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_type_mismatch() {
        let store = InMemoryStore::new();
        store.set_int("count", 3).await.unwrap();

        let result = store.get_string("count").await;
        assert!(matches!(
            result,
            Err(StorageError::TypeMismatch { expected: "string", found: "int", .. })
        ));
    }

    #[tokio::test]
    async fn memory_remove_missing_is_ok() {
        let store = InMemoryStore::new();
        store.remove("ghost").await.unwrap();

        store.set_bool("flag", false).await.unwrap();
        store.remove("flag").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn memory_keys_with_prefix() {
        let store = InMemoryStore::new();
        store.set_string("outbox:1", "a".into()).await.unwrap();
        store.set_string("outbox:2", "b".into()).await.unwrap();
        store.set_string("other", "c".into()).await.unwrap();

        let mut keys = store.keys_with_prefix("outbox:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["outbox:1", "outbox:2"]);
    }

    #[tokio::test]
    async fn memory_fail_writes() {
        let store = InMemoryStore::new();
        store.fail_writes(true);
        assert!(store.set_string("k", "v".into()).await.is_err());
        assert!(store.remove("k").await.is_err());

        store.fail_writes(false);
        store.set_string("k", "v".into()).await.unwrap();
    }
}
