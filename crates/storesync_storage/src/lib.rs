//! # storesync storage
//!
//! Persistence backends for storesync state snapshots.
//!
//! Backends are **opaque key-value byte stores**. They do not know what a
//! snapshot looks like; the state container owns encoding, envelope
//! validation, and the decision to ignore failures.
//!
//! ## Design Principles
//!
//! - Backends are simple keyed byte stores (get, set, remove)
//! - Must be `Send + Sync` so several domains can share one backend
//! - A [`StorageScope`] selects which backend a domain persists to
//! - Persistence is best effort: callers log failures and carry on
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests, session and memory scopes
//! - [`FileBackend`] - One file per key under a directory, for the local scope
//!
//! ## Example
//!
//! ```rust
//! use storesync_storage::{InMemoryBackend, SnapshotBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.set("cart", b"snapshot bytes").unwrap();
//! assert_eq!(backend.get("cart").unwrap().as_deref(), Some(&b"snapshot bytes"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod scope;

pub use backend::SnapshotBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use scope::{StorageProvider, StorageScope};
