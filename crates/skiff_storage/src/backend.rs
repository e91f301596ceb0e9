//! Key-value store trait definition.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A value held by a [`KeyValueStore`].
///
/// Mirrors the value kinds a host platform's preference store can hold:
/// strings, booleans, integers and string lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredValue {
    /// A UTF-8 string.
    Str(String),
    /// A boolean flag.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// An ordered list of strings.
    StrList(Vec<String>),
}

impl StoredValue {
    /// Returns the name of this value's kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            StoredValue::Str(_) => "string",
            StoredValue::Bool(_) => "bool",
            StoredValue::Int(_) => "int",
            StoredValue::StrList(_) => "string list",
        }
    }
}

/// A durable key-value store.
///
/// Stores are **flat namespaces** of string keys. Callers partition the
/// namespace with key prefixes (for example `outbox:` and `sync_error:`);
/// the store itself never interprets keys or values.
///
/// # Invariants
///
/// - `set` followed by `get` on the same key returns the value just written
/// - `remove` on a missing key is not an error
/// - `keys` enumerates every key currently present, in no particular order
/// - Implementations must be `Send + Sync`; every call is a suspension point
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the raw value stored under `key`.
    async fn get(&self, key: &str) -> StorageResult<Option<StoredValue>>;

    /// Writes `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: StoredValue) -> StorageResult<()>;

    /// Removes `key`. Missing keys are ignored.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Enumerates all keys in the store.
    async fn keys(&self) -> StorageResult<Vec<String>>;

    /// Reads a string value.
    async fn get_string(&self, key: &str) -> StorageResult<Option<String>> {
        match self.get(key).await? {
            None => Ok(None),
            Some(StoredValue::Str(s)) => Ok(Some(s)),
            Some(other) => Err(mismatch(key, "string", &other)),
        }
    }

    /// Writes a string value.
    async fn set_string(&self, key: &str, value: String) -> StorageResult<()> {
        self.set(key, StoredValue::Str(value)).await
    }

    /// Reads a boolean value.
    async fn get_bool(&self, key: &str) -> StorageResult<Option<bool>> {
        match self.get(key).await? {
            None => Ok(None),
            Some(StoredValue::Bool(b)) => Ok(Some(b)),
            Some(other) => Err(mismatch(key, "bool", &other)),
        }
    }

    /// Writes a boolean value.
    async fn set_bool(&self, key: &str, value: bool) -> StorageResult<()> {
        self.set(key, StoredValue::Bool(value)).await
    }

    /// Reads an integer value.
    async fn get_int(&self, key: &str) -> StorageResult<Option<i64>> {
        match self.get(key).await? {
            None => Ok(None),
            Some(StoredValue::Int(i)) => Ok(Some(i)),
            Some(other) => Err(mismatch(key, "int", &other)),
        }
    }

    /// Writes an integer value.
    async fn set_int(&self, key: &str, value: i64) -> StorageResult<()> {
        self.set(key, StoredValue::Int(value)).await
    }

    /// Reads a string list value.
    async fn get_string_list(&self, key: &str) -> StorageResult<Option<Vec<String>>> {
        match self.get(key).await? {
            None => Ok(None),
            Some(StoredValue::StrList(list)) => Ok(Some(list)),
            Some(other) => Err(mismatch(key, "string list", &other)),
        }
    }

    /// Writes a string list value.
    async fn set_string_list(&self, key: &str, value: Vec<String>) -> StorageResult<()> {
        self.set(key, StoredValue::StrList(value)).await
    }

    /// Enumerates keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

fn mismatch(key: &str, expected: &'static str, found: &StoredValue) -> StorageError {
    StorageError::TypeMismatch {
        key: key.to_string(),
        expected,
        found: found.kind(),
    }
}
