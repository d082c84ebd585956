//! Storage scopes and the provider that resolves them to backends.

use crate::backend::SnapshotBackend;
use crate::error::StorageResult;
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Where a domain's snapshots are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageScope {
    /// Durable storage that survives restarts.
    Local,
    /// Storage that lives as long as the user session.
    Session,
    /// Storage private to one provider instance.
    Memory,
    /// No persistence.
    None,
}

impl StorageScope {
    /// Returns the lowercase scope name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            StorageScope::Local => "local",
            StorageScope::Session => "session",
            StorageScope::Memory => "memory",
            StorageScope::None => "none",
        }
    }

    /// Returns the backend key for `key` in this scope.
    #[must_use]
    pub fn qualify(self, key: &str) -> String {
        format!("{}/{key}", self.as_str())
    }
}

impl fmt::Display for StorageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(StorageScope::Local),
            "session" => Ok(StorageScope::Session),
            "memory" => Ok(StorageScope::Memory),
            "none" => Ok(StorageScope::None),
            other => Err(format!("unknown storage scope: {other}")),
        }
    }
}

/// Resolves a [`StorageScope`] to the backend that serves it.
///
/// One provider is shared by every domain of an application, so all domains
/// persisting to the same scope share one backend.
///
/// - `Local` → durable backend (a [`FileBackend`] or a caller-supplied one)
/// - `Session` → a backend the caller may share between providers
/// - `Memory` → an in-memory backend owned by this provider
/// - `None` → no backend
#[derive(Clone)]
pub struct StorageProvider {
    local: Arc<dyn SnapshotBackend>,
    session: Arc<dyn SnapshotBackend>,
    memory: Arc<InMemoryBackend>,
}

impl StorageProvider {
    /// Creates a provider where every scope is served from memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            local: Arc::new(InMemoryBackend::new()),
            session: Arc::new(InMemoryBackend::new()),
            memory: Arc::new(InMemoryBackend::new()),
        }
    }

    /// Creates a provider whose local scope is a [`FileBackend`] rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn with_local_dir(dir: &Path) -> StorageResult<Self> {
        Ok(Self::in_memory().with_local(Arc::new(FileBackend::open(dir)?)))
    }

    /// Replaces the local-scope backend.
    #[must_use]
    pub fn with_local(mut self, backend: Arc<dyn SnapshotBackend>) -> Self {
        self.local = backend;
        self
    }

    /// Replaces the session-scope backend.
    #[must_use]
    pub fn with_session(mut self, backend: Arc<dyn SnapshotBackend>) -> Self {
        self.session = backend;
        self
    }

    /// Returns the backend serving `scope`, or `None` for [`StorageScope::None`].
    #[must_use]
    pub fn backend(&self, scope: StorageScope) -> Option<Arc<dyn SnapshotBackend>> {
        match scope {
            StorageScope::Local => Some(Arc::clone(&self.local)),
            StorageScope::Session => Some(Arc::clone(&self.session)),
            StorageScope::Memory => Some(self.memory.clone() as Arc<dyn SnapshotBackend>),
            StorageScope::None => None,
        }
    }
}

impl Default for StorageProvider {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageProvider")
            .field("memory_entries", &self.memory.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn scope_parse_and_display() {
        for scope in [
            StorageScope::Local,
            StorageScope::Session,
            StorageScope::Memory,
            StorageScope::None,
        ] {
            assert_eq!(scope.to_string().parse::<StorageScope>().unwrap(), scope);
        }
        assert_eq!("LOCAL".parse::<StorageScope>().unwrap(), StorageScope::Local);
        assert!("cloud".parse::<StorageScope>().is_err());
    }

    #[test]
    fn scope_qualify() {
        assert_eq!(StorageScope::Session.qualify("cart"), "session/cart");
    }

    #[test]
    fn none_scope_has_no_backend() {
        let provider = StorageProvider::in_memory();
        assert!(provider.backend(StorageScope::None).is_none());
        assert!(provider.backend(StorageScope::Memory).is_some());
    }

    #[test]
    fn clones_share_backends() {
        let provider = StorageProvider::in_memory();
        let clone = provider.clone();

        provider
            .backend(StorageScope::Memory)
            .unwrap()
            .set("cart", b"x")
            .unwrap();
        assert_eq!(
            clone.backend(StorageScope::Memory).unwrap().get("cart").unwrap(),
            Some(b"x".to_vec())
        );
    }

    #[test]
    fn shared_session_backend() {
        let session: Arc<dyn SnapshotBackend> = Arc::new(InMemoryBackend::new());
        let a = StorageProvider::in_memory().with_session(Arc::clone(&session));
        let b = StorageProvider::in_memory().with_session(session);

        a.backend(StorageScope::Session).unwrap().set("cart", b"1").unwrap();
        assert!(b.backend(StorageScope::Session).unwrap().get("cart").unwrap().is_some());
        assert!(b.backend(StorageScope::Memory).unwrap().get("cart").unwrap().is_none());
    }

    #[test]
    fn local_dir_provider_is_durable() {
        let dir = tempdir().unwrap();
        {
            let provider = StorageProvider::with_local_dir(dir.path()).unwrap();
            provider
                .backend(StorageScope::Local)
                .unwrap()
                .set("local/cart", b"kept")
                .unwrap();
        }
        let provider = StorageProvider::with_local_dir(dir.path()).unwrap();
        assert_eq!(
            provider.backend(StorageScope::Local).unwrap().get("local/cart").unwrap(),
            Some(b"kept".to_vec())
        );
    }
}
