//! # Skiff Storage
//!
//! Durable key-value store contract and implementations for Skiff.
//!
//! This crate provides the lowest-level persistence abstraction used by the
//! sync engine. Stores are **flat string-keyed maps** - they do not interpret
//! the records the engine keeps in them.
//!
//! ## Design Principles
//!
//! - Stores hold strings, booleans, integers and string lists
//! - No knowledge of outbox entries, error records or checkpoints
//! - Must be `Send + Sync`; every call is async
//! - The engine owns all record encoding
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral engines
//! - [`FileStore`] - For persistent storage in a single CBOR snapshot file

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{KeyValueStore, StoredValue};
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
