//! Snapshot backend trait definition.

use crate::error::StorageResult;

/// A key-value persistence backend for state snapshots.
///
/// Backends are **opaque byte stores** addressed by string keys. The state
/// container encodes snapshots before handing them over and validates them
/// after reading them back; backends never interpret the bytes.
///
/// # Invariants
///
/// - `get` returns exactly the bytes of the last successful `set` for a key
/// - `set` replaces any previous value for the key
/// - `remove` reports whether a value existed
/// - Backends must be `Send + Sync`, since one backend is shared by every
///   domain persisting to the same scope
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For tests and non-durable scopes
/// - [`super::FileBackend`] - For durable local storage
pub trait SnapshotBackend: Send + Sync {
    /// Reads the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be written.
    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes the value stored under `key`.
    ///
    /// Returns `true` if a value was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Lists all keys currently stored, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be enumerated.
    fn keys(&self) -> StorageResult<Vec<String>>;
}
