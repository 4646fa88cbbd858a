//! Key/value storage scopes used by the secure channel.
//!
//! A session-scoped store holds bearer tokens and the exported storage key; a
//! persistent store holds user data, encrypted or in the plaintext fallback.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to persist store: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// String key to string value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}
